use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::config::{SCORER_HISTORY_LEN, SCORER_INTERVAL_SECS};
use crate::db::{CoinRepository, Role};
use crate::error::Result;
use crate::indicators::IndicatorFrame;
use crate::scorer::composite::{latest_index, IndicatorSnapshot};

/// Minimum candles before a coin is scored.
pub const MIN_CANDLES: usize = 2;

/// Composite index for one coin at its latest candle.
#[derive(Debug, Clone, Serialize)]
pub struct CoinScore {
    pub symbol: String,
    pub index: f64,
    /// Unix seconds of the newest candle used.
    pub as_of: i64,
    pub indicators: IndicatorSnapshot,
}

/// Load recent history for `symbol` and compute its index. `Ok(None)` when
/// there is not enough history yet.
pub async fn score_coin(repo: &CoinRepository, role: Role, symbol: &str) -> Result<Option<CoinScore>> {
    let candles = repo.recent_candles(role, symbol, SCORER_HISTORY_LEN).await?;
    if candles.len() < MIN_CANDLES {
        return Ok(None);
    }
    let frame = IndicatorFrame::compute(&candles);
    let (Some(index), Some(indicators)) = (latest_index(&frame), IndicatorSnapshot::latest(&frame)) else {
        return Ok(None);
    };
    let as_of = candles.last().map(|c| c.timestamp).unwrap_or_default();

    Ok(Some(CoinScore {
        symbol: symbol.to_string(),
        index,
        as_of,
        indicators,
    }))
}

/// Background task that rescores every active coin each minute and stores
/// the result on `coins.ai_index_value`.
pub struct IndexScorer {
    repo: CoinRepository,
    health: Arc<HealthState>,
}

impl IndexScorer {
    pub fn new(repo: CoinRepository, health: Arc<HealthState>) -> Self {
        Self { repo, health }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(SCORER_INTERVAL_SECS));

        loop {
            interval.tick().await;
            if let Err(e) = self.score_all_coins().await {
                error!("Scorer error: {e}");
            }
        }
    }

    /// Returns the number of coins scored.
    pub async fn score_all_coins(&self) -> Result<usize> {
        let coins = self.repo.get_all_coins(Role::Service, true, i64::MAX).await?;
        let mut scored = 0;

        for coin in &coins {
            match score_coin(&self.repo, Role::Service, &coin.symbol).await {
                Ok(Some(score)) => {
                    if let Err(e) = self
                        .repo
                        .update_ai_prediction(Role::Service, &coin.symbol, score.index)
                        .await
                    {
                        warn!(symbol = %coin.symbol, "storing index failed: {e}");
                        continue;
                    }
                    debug!(
                        symbol = %coin.symbol,
                        index = score.index,
                        as_of = score.as_of,
                        rsi = score.indicators.rsi,
                        "scored coin"
                    );
                    scored += 1;
                }
                Ok(None) => debug!(symbol = %coin.symbol, "not enough history to score"),
                Err(e) => warn!(symbol = %coin.symbol, "scoring failed: {e}"),
            }
        }

        self.health.mark_scored();
        info!("Scorer updated index for {scored}/{} coins", coins.len());
        Ok(scored)
    }
}
