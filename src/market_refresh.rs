use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::config::{Config, MARKET_REFRESH_INTERVAL_SECS};
use crate::db::{CoinRepository, Role};
use crate::error::Result;
use crate::fetcher::{fetch_klines, http_client};
use crate::types::{Candle, PriceUpdate};

const DAY_SECS: i64 = 24 * 3600;

/// Per-pass counters, logged after every refresh.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub coins: usize,
    pub failed: usize,
    pub candles_inserted: u64,
}

/// Pulls candles for every active coin and keeps `coins` prices current.
pub struct MarketRefresher {
    cfg: Config,
    repo: CoinRepository,
    health: Arc<HealthState>,
}

impl MarketRefresher {
    pub fn new(cfg: Config, repo: CoinRepository, health: Arc<HealthState>) -> Self {
        Self { cfg, repo, health }
    }

    pub async fn run(self) {
        let client = match http_client() {
            Ok(c) => c,
            Err(e) => {
                error!("Market refresher disabled, HTTP client build failed: {e}");
                return;
            }
        };

        // First tick fires immediately so prices are populated at startup.
        let mut ticker = interval(Duration::from_secs(MARKET_REFRESH_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            match self.refresh(&client).await {
                Ok(s) => info!(
                    coins = s.coins,
                    failed = s.failed,
                    inserted = s.candles_inserted,
                    "Market refresh complete: {} coins, {} failed, +{} candles",
                    s.coins, s.failed, s.candles_inserted,
                ),
                Err(e) => error!("Market refresh failed: {e}"),
            }
        }
    }

    async fn refresh(&self, client: &reqwest::Client) -> Result<RefreshSummary> {
        let coins = self.repo.get_all_coins(Role::Service, true, i64::MAX).await?;
        let mut summary = RefreshSummary {
            coins: coins.len(),
            ..Default::default()
        };

        for coin in &coins {
            let candles = match fetch_klines(client, &self.cfg, &coin.symbol).await {
                Ok((candles, _)) => candles,
                Err(e) => {
                    warn!(symbol = %coin.symbol, "kline fetch failed: {e}");
                    summary.failed += 1;
                    self.health.inc_refresh_failures();
                    continue;
                }
            };
            match self.apply_candles(&coin.symbol, &candles).await {
                Ok(inserted) => summary.candles_inserted += inserted,
                Err(e) => {
                    warn!(symbol = %coin.symbol, "storing candles failed: {e}");
                    summary.failed += 1;
                    self.health.inc_refresh_failures();
                }
            }
        }

        self.health.mark_refreshed();
        Ok(summary)
    }

    /// Store candles (oldest first) and derive the coin's price fields from
    /// them. Returns the number of new candles.
    pub async fn apply_candles(&self, symbol: &str, candles: &[Candle]) -> Result<u64> {
        if candles.is_empty() {
            return Ok(0);
        }
        let inserted = self
            .repo
            .add_price_history_batch(Role::Service, symbol, candles)
            .await?;
        if let Some(update) = PriceUpdate::from_candles(candles, DAY_SECS) {
            self.repo.update_coin_price(Role::Service, symbol, &update).await?;
        }
        Ok(inserted)
    }
}

/// Insert the configured symbols that are not yet in the database.
pub async fn seed_coins(repo: &CoinRepository, symbols: &[String]) -> Result<usize> {
    let mut added = 0;
    for symbol in symbols {
        if repo.get_coin(Role::Service, symbol).await?.is_none() {
            repo.upsert_coin(Role::Service, symbol, &crate::types::coin_name(symbol))
                .await?;
            added += 1;
        }
    }
    Ok(added)
}
