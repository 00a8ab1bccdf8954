//! Row types for the tables created by `migrations/`.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CoinRow {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
    pub price_change_24h: Option<f64>,
    pub price_change_pct_24h: Option<f64>,
    pub ai_index_value: Option<f64>,
    pub last_ai_prediction: Option<String>,
    pub is_active: bool,
    pub last_updated: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PriceHistoryRow {
    pub id: i64,
    pub coin_id: i64,
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl From<&PriceHistoryRow> for crate::types::Candle {
    fn from(r: &PriceHistoryRow) -> Self {
        Self {
            timestamp: r.timestamp,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.volume,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct NewsRow {
    pub id: i64,
    pub coin_id: i64,
    pub title: String,
    pub content: Option<String>,
    pub url: Option<String>,
    pub source: Option<String>,
    pub sentiment_score: Option<f64>,
    pub published_at: i64,
}
