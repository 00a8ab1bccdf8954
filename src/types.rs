use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// One OHLCV candle. `timestamp` is the candle open time in Unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Mirrors the CHECK constraints on `coin_price_history`.
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be a non-negative number"));
            }
        }
        if self.high < self.low {
            return Err("high must be >= low".to_string());
        }
        Ok(())
    }
}

/// Fields written onto `coins` by the market refresher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
    pub price_change_24h: Option<f64>,
    pub price_change_pct_24h: Option<f64>,
}

impl PriceUpdate {
    /// Derive a price update from candles sorted oldest first.
    /// `day_secs` bounds the trailing window used for volume and change.
    pub fn from_candles(candles: &[Candle], day_secs: i64) -> Option<Self> {
        let last = candles.last()?;
        let cutoff = last.timestamp - day_secs;
        let window: Vec<&Candle> = candles.iter().filter(|c| c.timestamp > cutoff).collect();
        let first = window.first().copied().unwrap_or(last);

        let volume_24h: f64 = window.iter().map(|c| c.volume).sum();
        let change = last.close - first.open;
        let change_pct = if first.open > 0.0 {
            Some(change / first.open * 100.0)
        } else {
            None
        };

        Some(Self {
            current_price: Some(last.close),
            market_cap: None,
            volume_24h: Some(volume_24h),
            price_change_24h: Some(change),
            price_change_pct_24h: change_pct,
        })
    }
}

// ---------------------------------------------------------------------------
// News
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    pub content: Option<String>,
    pub url: Option<String>,
    pub source: Option<String>,
    /// Sentiment in [-1, 1].
    pub sentiment_score: Option<f64>,
    /// Unix seconds.
    pub published_at: i64,
}

impl NewsArticle {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".to_string());
        }
        if let Some(score) = self.sentiment_score {
            if !(-1.0..=1.0).contains(&score) {
                return Err("sentiment_score must be within [-1, 1]".to_string());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

/// Display name for a `BASE-QUOTE` symbol, e.g. `BTC-USD` → `Bitcoin`.
pub fn coin_name(symbol: &str) -> String {
    let base = symbol.split('-').next().unwrap_or(symbol).to_ascii_uppercase();
    let name = match base.as_str() {
        "BTC" => "Bitcoin",
        "ETH" => "Ethereum",
        "SOL" => "Solana",
        "ADA" => "Cardano",
        "XRP" => "XRP",
        "DOGE" => "Dogecoin",
        "DOT" => "Polkadot",
        "AVAX" => "Avalanche",
        "LTC" => "Litecoin",
        "LINK" => "Chainlink",
        _ => return base,
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, open: f64, close: f64, volume: f64) -> Candle {
        Candle {
            timestamp: ts,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume,
        }
    }

    #[test]
    fn candle_rejects_inverted_range() {
        let mut c = candle(0, 10.0, 12.0, 1.0);
        assert!(c.validate().is_ok());
        c.high = 5.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn candle_rejects_negative_volume() {
        let c = candle(0, 10.0, 12.0, -1.0);
        assert!(c.validate().is_err());
    }

    #[test]
    fn price_update_uses_trailing_day() {
        let hour = 3600;
        let candles = vec![
            candle(0, 50.0, 60.0, 1000.0),
            candle(30 * hour, 100.0, 105.0, 10.0),
            candle(40 * hour, 105.0, 110.0, 20.0),
        ];
        let update = PriceUpdate::from_candles(&candles, 24 * hour).unwrap();
        assert_eq!(update.current_price, Some(110.0));
        assert_eq!(update.volume_24h, Some(30.0));
        assert_eq!(update.price_change_24h, Some(10.0));
        let pct = update.price_change_pct_24h.unwrap();
        assert!((pct - 10.0).abs() < 1e-9, "pct={pct}");
    }

    #[test]
    fn price_update_empty_is_none() {
        assert!(PriceUpdate::from_candles(&[], 86_400).is_none());
    }

    #[test]
    fn news_sentiment_bounds() {
        let mut article = NewsArticle {
            title: "BTC rallies".to_string(),
            content: None,
            url: None,
            source: None,
            sentiment_score: Some(0.4),
            published_at: 0,
        };
        assert!(article.validate().is_ok());
        article.sentiment_score = Some(1.5);
        assert!(article.validate().is_err());
    }

    #[test]
    fn coin_names() {
        assert_eq!(coin_name("BTC-USD"), "Bitcoin");
        assert_eq!(coin_name("pepe-usd"), "PEPE");
    }
}
