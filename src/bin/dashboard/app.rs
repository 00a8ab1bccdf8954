use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::view::CoinListView;

// ---------------------------------------------------------------------------
// API response types (mirror the server's /api/coins payload)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[allow(dead_code)]
pub struct Coin {
    pub symbol: String,
    pub name: String,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
    pub price_change_pct_24h: Option<f64>,
    pub ai_index_value: Option<f64>,
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
pub struct CoinsPayload {
    pub timestamp: String,
    pub response_time: String,
    pub count: usize,
    pub coins: Vec<Coin>,
}

pub async fn fetch_coins(client: reqwest::Client, url: String) -> Result<CoinsPayload, String> {
    let resp = client.get(&url).send().await.map_err(|e| format!("request failed: {e}"))?;
    let status = resp.status();
    if !status.is_success() {
        let detail = resp
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v["error"].as_str().map(str::to_string))
            .unwrap_or_else(|| status.to_string());
        return Err(format!("{status}: {detail}"));
    }
    resp.json::<CoinsPayload>()
        .await
        .map_err(|e| format!("parse error: {e}"))
}

// ---------------------------------------------------------------------------
// Refresh cancellation
// ---------------------------------------------------------------------------

/// Result of one refresh, tagged with the generation that started it.
#[derive(Debug)]
pub struct FetchOutcome {
    pub generation: u64,
    pub result: Result<CoinsPayload, String>,
}

/// Runs at most one refresh at a time. Starting a new one aborts the task
/// in flight; results carry their generation so late arrivals are dropped.
pub struct Refresher {
    generation: u64,
    in_flight: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<FetchOutcome>,
}

impl Refresher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FetchOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                generation: 0,
                in_flight: None,
                tx,
            },
            rx,
        )
    }

    pub fn start<F>(&mut self, fetch: F) -> u64
    where
        F: Future<Output = Result<CoinsPayload, String>> + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let tx = self.tx.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = fetch.await;
            let _ = tx.send(FetchOutcome { generation, result });
        }));
        generation
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Screen {
    Loading,
    Coins,
    /// Full-screen error panel; `r` reloads.
    Error(String),
}

pub struct AppState {
    pub screen: Screen,
    pub coins: Arc<Vec<Coin>>,
    pub server_timestamp: Option<String>,
    pub response_time: Option<String>,
    pub last_refresh: Option<Instant>,
    pub base_url: String,
    pub view: CoinListView,
    pub refresher: Refresher,
}

impl AppState {
    pub fn new(base_url: String) -> (Self, mpsc::UnboundedReceiver<FetchOutcome>) {
        let (refresher, rx) = Refresher::new();
        (
            Self {
                screen: Screen::Loading,
                coins: Arc::new(Vec::new()),
                server_timestamp: None,
                response_time: None,
                last_refresh: None,
                base_url,
                view: CoinListView::default(),
                refresher,
            },
            rx,
        )
    }

    pub fn coins_url(&self) -> String {
        format!("{}/api/coins?limit=100", self.base_url.trim_end_matches('/'))
    }

    pub fn refresh(&mut self, client: &reqwest::Client) -> u64 {
        self.refresher.start(fetch_coins(client.clone(), self.coins_url()))
    }

    /// Reload from the error panel.
    pub fn reload(&mut self, client: &reqwest::Client) -> u64 {
        self.screen = Screen::Loading;
        self.refresh(client)
    }

    /// Apply a finished refresh. Returns false for stale outcomes.
    pub fn apply(&mut self, outcome: FetchOutcome) -> bool {
        if !self.refresher.is_current(outcome.generation) {
            return false;
        }
        match outcome.result {
            Ok(payload) => {
                // Keep the old allocation when nothing changed so the
                // formatted rows are reused.
                if *self.coins != payload.coins {
                    self.coins = Arc::new(payload.coins);
                }
                self.server_timestamp = Some(payload.timestamp);
                self.response_time = Some(payload.response_time);
                self.last_refresh = Some(Instant::now());
                self.screen = Screen::Coins;
            }
            Err(e) => self.screen = Screen::Error(e),
        }
        true
    }

    pub fn shutdown(&mut self) {
        self.refresher.cancel();
    }
}
