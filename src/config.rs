use crate::error::{AppError, Result};

pub const MARKET_DATA_URL: &str = "https://api.binance.com";

pub const DEFAULT_SYMBOLS: &str = "BTC-USD,ETH-USD,SOL-USD,ADA-USD,XRP-USD";

pub const API_VERSION: &str = "0.1.0";

/// Requests a single client may issue inside one rate-limit window.
pub const RATE_LIMIT_MAX_REQUESTS: u32 = 60;

/// Length of one rate-limit window (seconds). Also sent as `Retry-After`.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Number of windows kept in the limiter ring. The live window plus the one
/// before it; older slots are wiped on reuse or by the sweeper.
pub const RATE_LIMIT_RING_SLOTS: usize = 2;

/// How often the limiter sweeper wipes expired slots (seconds).
pub const RATE_LIMIT_SWEEP_SECS: u64 = 30;

/// Bounds for the `limit` query parameter on the coin listing.
pub const LIMIT_MIN: i64 = 1;
pub const LIMIT_MAX: i64 = 100;
pub const LIMIT_DEFAULT: i64 = 10;

/// Market data refresh interval (seconds).
pub const MARKET_REFRESH_INTERVAL_SECS: u64 = 300;

/// Index scorer update interval (seconds).
pub const SCORER_INTERVAL_SECS: u64 = 60;

/// Candles loaded per coin when computing the composite index.
pub const SCORER_HISTORY_LEN: i64 = 500;

/// Candle intervals the market data API accepts.
pub const KLINE_INTERVALS: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
];

/// Upper bound on candles per klines request.
pub const KLINE_LIMIT_MAX: u32 = 1000;

/// Outbound HTTP timeout (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Technical indicator windows.
pub mod indicator_windows {
    pub const MA_SHORT: usize = 7;
    pub const MA_LONG: usize = 30;
    pub const EMA_FAST: usize = 12;
    pub const EMA_SLOW: usize = 26;
    pub const RSI_PERIOD: usize = 14;
    pub const VOLATILITY: usize = 30;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Bearer token that grants the service role (SERVICE_KEY). Writes are
    /// refused for everyone when unset.
    pub service_key: Option<String>,
    /// Allowed CORS origins (CORS_ORIGINS, comma-separated). `*` allows any.
    pub cors_origins: Vec<String>,
    pub market_data_url: String,
    /// Coins seeded into the database at startup (COIN_SYMBOLS, comma-separated).
    pub symbols: Vec<String>,
    /// Candle interval requested from the market data API (KLINE_INTERVAL).
    pub kline_interval: String,
    /// Candles requested per refresh (KLINE_LIMIT).
    pub kline_limit: u32,
    /// Background market refresh on/off (REFRESH_ENABLED).
    pub refresh_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "coinscribe.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            service_key: std::env::var("SERVICE_KEY").ok().filter(|k| !k.is_empty()),
            cors_origins: split_list(&std::env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string())),
            market_data_url: std::env::var("MARKET_DATA_URL")
                .unwrap_or_else(|_| MARKET_DATA_URL.to_string()),
            symbols: split_list(
                &std::env::var("COIN_SYMBOLS").unwrap_or_else(|_| DEFAULT_SYMBOLS.to_string()),
            ),
            kline_interval: parse_kline_interval(
                &std::env::var("KLINE_INTERVAL").unwrap_or_else(|_| "1h".to_string()),
            )?,
            kline_limit: parse_kline_limit(
                &std::env::var("KLINE_LIMIT").unwrap_or_else(|_| "200".to_string()),
            )?,
            refresh_enabled: std::env::var("REFRESH_ENABLED")
                .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(true),
        })
    }
}

pub fn parse_kline_interval(raw: &str) -> Result<String> {
    let interval = raw.trim();
    if KLINE_INTERVALS.contains(&interval) {
        Ok(interval.to_string())
    } else {
        Err(AppError::Config(format!(
            "KLINE_INTERVAL must be one of {}",
            KLINE_INTERVALS.join(", ")
        )))
    }
}

fn parse_kline_limit(raw: &str) -> Result<u32> {
    match raw.trim().parse::<u32>() {
        Ok(n) if (1..=KLINE_LIMIT_MAX).contains(&n) => Ok(n),
        _ => Err(AppError::Config(format!(
            "KLINE_LIMIT must be a number between 1 and {KLINE_LIMIT_MAX}"
        ))),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
impl Config {
    /// Configuration used by handler and task tests.
    pub fn for_tests() -> Self {
        Self {
            log_level: "debug".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 0,
            service_key: Some("test-service-key".to_string()),
            cors_origins: vec!["*".to_string()],
            market_data_url: "http://127.0.0.1:9".to_string(),
            symbols: split_list(DEFAULT_SYMBOLS),
            kline_interval: "1h".to_string(),
            kline_limit: 50,
            refresh_enabled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_trims_and_drops_empty_entries() {
        assert_eq!(
            split_list(" BTC-USD, ,ETH-USD ,"),
            vec!["BTC-USD".to_string(), "ETH-USD".to_string()]
        );
    }

    #[test]
    fn kline_limit_must_be_in_range() {
        assert_eq!(parse_kline_limit("200").unwrap(), 200);
        assert_eq!(parse_kline_limit(" 1000 ").unwrap(), 1000);
        for bad in ["abc", "", "0", "1001", "-5"] {
            assert!(matches!(parse_kline_limit(bad), Err(AppError::Config(_))), "{bad:?}");
        }
    }

    #[test]
    fn kline_interval_must_be_known() {
        assert_eq!(parse_kline_interval("4h").unwrap(), "4h");
        assert!(matches!(parse_kline_interval("7h"), Err(AppError::Config(_))));
    }
}
