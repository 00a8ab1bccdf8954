use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{Config, HTTP_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::types::Candle;

#[derive(Debug, Default)]
pub struct FetchStats {
    pub rows_total: usize,
    pub rejected_malformed: usize,
    pub rejected_invalid: usize,
}

pub fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()?)
}

/// Exchange pair for a `BASE-QUOTE` symbol. USD quotes trade against USDT:
/// `BTC-USD` → `BTCUSDT`, `ETH-BTC` → `ETHBTC`.
pub fn exchange_symbol(symbol: &str) -> String {
    let mut parts = symbol.split('-');
    let base = parts.next().unwrap_or_default().to_ascii_uppercase();
    let quote = match parts.next().map(|q| q.to_ascii_uppercase()) {
        Some(q) if q == "USD" => "USDT".to_string(),
        Some(q) => q,
        None => "USDT".to_string(),
    };
    format!("{base}{quote}")
}

/// Fetch the most recent candles for `symbol`, oldest first.
pub async fn fetch_klines(
    client: &reqwest::Client,
    cfg: &Config,
    symbol: &str,
) -> Result<(Vec<Candle>, FetchStats)> {
    let url = format!(
        "{}/api/v3/klines?symbol={}&interval={}&limit={}",
        cfg.market_data_url.trim_end_matches('/'),
        exchange_symbol(symbol),
        cfg.kline_interval,
        cfg.kline_limit,
    );
    debug!(%symbol, %url, "fetching klines");

    let resp = client.get(&url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(AppError::Fetch(format!("{symbol}: market data API returned {status}")));
    }
    let body: serde_json::Value = resp.json().await?;
    let (candles, stats) = parse_klines(&body)?;
    if stats.rejected_malformed + stats.rejected_invalid > 0 {
        warn!(
            %symbol,
            malformed = stats.rejected_malformed,
            invalid = stats.rejected_invalid,
            "[FETCH] skipped {} of {} kline rows",
            stats.rejected_malformed + stats.rejected_invalid,
            stats.rows_total,
        );
    }
    Ok((candles, stats))
}

/// Parse a klines payload: an array of
/// `[open_time_ms, "open", "high", "low", "close", "volume", ...]` rows.
/// Malformed or constraint-violating rows are skipped and counted.
pub fn parse_klines(v: &serde_json::Value) -> Result<(Vec<Candle>, FetchStats)> {
    let rows = v
        .as_array()
        .ok_or_else(|| AppError::Fetch("klines response was not an array".to_string()))?;

    let mut stats = FetchStats {
        rows_total: rows.len(),
        ..Default::default()
    };
    let mut candles = Vec::with_capacity(rows.len());

    for row in rows {
        let Some(candle) = parse_kline_row(row) else {
            stats.rejected_malformed += 1;
            continue;
        };
        if candle.validate().is_err() {
            stats.rejected_invalid += 1;
            continue;
        }
        candles.push(candle);
    }

    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    Ok((candles, stats))
}

fn parse_kline_row(row: &serde_json::Value) -> Option<Candle> {
    let fields = row.as_array()?;
    if fields.len() < 6 {
        return None;
    }
    let open_time_ms = fields[0].as_i64()?;
    Some(Candle {
        timestamp: open_time_ms / 1000,
        open: number(&fields[1])?,
        high: number(&fields[2])?,
        low: number(&fields[3])?,
        close: number(&fields[4])?,
        volume: number(&fields[5])?,
    })
}

/// Prices arrive as decimal strings; accept bare numbers too.
fn number(v: &serde_json::Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        .filter(|n: &f64| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exchange_symbol_maps_usd_to_usdt() {
        assert_eq!(exchange_symbol("BTC-USD"), "BTCUSDT");
        assert_eq!(exchange_symbol("eth-btc"), "ETHBTC");
        assert_eq!(exchange_symbol("SOL"), "SOLUSDT");
    }

    #[test]
    fn parses_string_and_numeric_fields() {
        let body = json!([
            [1_700_003_600_000i64, "101.0", "103.5", "100.0", "102.0", "12.5", 1_700_007_199_999i64],
            [1_700_000_000_000i64, 100.0, 102.0, 99.0, 101.0, 10.0, 1_700_003_599_999i64]
        ]);
        let (candles, stats) = parse_klines(&body).unwrap();
        assert_eq!(stats.rows_total, 2);
        assert_eq!(candles.len(), 2);
        // Sorted oldest first, timestamps in seconds.
        assert_eq!(candles[0].timestamp, 1_700_000_000);
        assert_eq!(candles[1].close, 102.0);
        assert_eq!(candles[1].volume, 12.5);
    }

    #[test]
    fn skips_malformed_and_invalid_rows() {
        let body = json!([
            [1_700_000_000_000i64, "1", "2"],
            "not a row",
            [1_700_000_000_000i64, "10", "5", "8", "9", "1"],
            [1_700_003_600_000i64, "10", "12", "9", "11", "nan-ish"],
            [1_700_007_200_000i64, "10", "12", "9", "11", "3"]
        ]);
        let (candles, stats) = parse_klines(&body).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(stats.rejected_malformed, 3);
        assert_eq!(stats.rejected_invalid, 1);
    }

    #[test]
    fn non_array_body_is_an_error() {
        let err = parse_klines(&json!({"code": -1121, "msg": "Invalid symbol."})).unwrap_err();
        assert!(matches!(err, AppError::Fetch(_)));
    }
}
