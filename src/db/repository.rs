use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::{CoinRow, NewsRow, PriceHistoryRow};
use crate::db::policy::{authorize, Action, Role, RowFilter, Table};
use crate::error::{AppError, Result};
use crate::types::{Candle, NewsArticle, PriceUpdate};

const COIN_COLUMNS: &str = "id, symbol, name, current_price, market_cap, volume_24h, \
     price_change_24h, price_change_pct_24h, ai_index_value, last_ai_prediction, \
     is_active, last_updated, created_at";

/// Policy-checked access to the coin tables.
#[derive(Clone)]
pub struct CoinRepository {
    pool: SqlitePool,
}

impl CoinRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -----------------------------------------------------------------------
    // coins
    // -----------------------------------------------------------------------

    /// Look up a coin by symbol. Inactive coins are invisible to anon callers.
    pub async fn get_coin(&self, role: Role, symbol: &str) -> Result<Option<CoinRow>> {
        let filter = authorize(role, Table::Coins, Action::Select)?;
        let sql = format!(
            "SELECT {COIN_COLUMNS} FROM coins WHERE symbol = ?{}",
            active_clause(filter, "AND")
        );
        let row = sqlx::query_as::<_, CoinRow>(&sql)
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Coins ordered by market cap (unknown caps last), then symbol.
    pub async fn get_all_coins(&self, role: Role, active_only: bool, limit: i64) -> Result<Vec<CoinRow>> {
        let filter = authorize(role, Table::Coins, Action::Select)?;
        let filter = if active_only { RowFilter::ActiveOnly } else { filter };
        let sql = format!(
            "SELECT {COIN_COLUMNS} FROM coins{} \
             ORDER BY market_cap IS NULL, market_cap DESC, symbol ASC LIMIT ?",
            active_clause(filter, "WHERE")
        );
        let rows = sqlx::query_as::<_, CoinRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Insert a coin if missing. Returns the coin id.
    pub async fn upsert_coin(&self, role: Role, symbol: &str, name: &str) -> Result<i64> {
        authorize(role, Table::Coins, Action::Insert)?;
        sqlx::query("INSERT OR IGNORE INTO coins (symbol, name) VALUES (?, ?)")
            .bind(symbol)
            .bind(name)
            .execute(&self.pool)
            .await?;
        self.coin_id(symbol).await
    }

    pub async fn update_coin_price(&self, role: Role, symbol: &str, update: &PriceUpdate) -> Result<CoinRow> {
        authorize(role, Table::Coins, Action::Update)?;
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE coins SET
                current_price = COALESCE(?, current_price),
                market_cap = COALESCE(?, market_cap),
                volume_24h = COALESCE(?, volume_24h),
                price_change_24h = COALESCE(?, price_change_24h),
                price_change_pct_24h = COALESCE(?, price_change_pct_24h),
                last_updated = ?
            WHERE symbol = ?
            "#,
        )
        .bind(update.current_price)
        .bind(update.market_cap)
        .bind(update.volume_24h)
        .bind(update.price_change_24h)
        .bind(update.price_change_pct_24h)
        .bind(now)
        .bind(symbol)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(symbol));
        }
        self.get_coin(Role::Service, symbol)
            .await?
            .ok_or_else(|| not_found(symbol))
    }

    /// Store the latest composite index (0..=10) for a coin.
    pub async fn update_ai_prediction(&self, role: Role, symbol: &str, index_value: f64) -> Result<CoinRow> {
        authorize(role, Table::Coins, Action::Update)?;
        if !(0.0..=10.0).contains(&index_value) {
            return Err(AppError::BadRequest(format!(
                "index value {index_value} outside [0, 10]"
            )));
        }
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE coins SET ai_index_value = ?, last_ai_prediction = ? WHERE symbol = ?",
        )
        .bind(index_value)
        .bind(now)
        .bind(symbol)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(symbol));
        }
        self.get_coin(Role::Service, symbol)
            .await?
            .ok_or_else(|| not_found(symbol))
    }

    // -----------------------------------------------------------------------
    // coin_price_history
    // -----------------------------------------------------------------------

    /// Insert one candle. Returns false when a candle with the same timestamp
    /// already exists for the coin.
    pub async fn add_price_history(&self, role: Role, symbol: &str, candle: &Candle) -> Result<bool> {
        Ok(self
            .add_price_history_batch(role, symbol, std::slice::from_ref(candle))
            .await?
            == 1)
    }

    /// Insert candles in one transaction, skipping duplicates. Returns the
    /// number of rows actually inserted.
    pub async fn add_price_history_batch(&self, role: Role, symbol: &str, candles: &[Candle]) -> Result<u64> {
        authorize(role, Table::CoinPriceHistory, Action::Insert)?;
        for candle in candles {
            candle.validate().map_err(AppError::BadRequest)?;
        }
        let coin_id = self.coin_id(symbol).await?;

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for c in candles {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO coin_price_history
                    (coin_id, timestamp, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(coin_id)
            .bind(c.timestamp)
            .bind(c.open)
            .bind(c.high)
            .bind(c.low)
            .bind(c.close)
            .bind(c.volume)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Price history newest first, optionally bounded by `[start, end]`
    /// (Unix seconds, inclusive).
    pub async fn get_price_history(
        &self,
        role: Role,
        symbol: &str,
        start: Option<i64>,
        end: Option<i64>,
        limit: i64,
    ) -> Result<Vec<PriceHistoryRow>> {
        authorize(role, Table::CoinPriceHistory, Action::Select)?;
        let coin = self
            .get_coin(role, symbol)
            .await?
            .ok_or_else(|| not_found(symbol))?;

        let rows = sqlx::query_as::<_, PriceHistoryRow>(
            r#"
            SELECT id, coin_id, timestamp, open, high, low, close, volume
            FROM coin_price_history
            WHERE coin_id = ?
              AND (? IS NULL OR timestamp >= ?)
              AND (? IS NULL OR timestamp <= ?)
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(coin.id)
        .bind(start)
        .bind(start)
        .bind(end)
        .bind(end)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The most recent `limit` candles, oldest first, for indicator work.
    pub async fn recent_candles(&self, role: Role, symbol: &str, limit: i64) -> Result<Vec<Candle>> {
        let rows = self.get_price_history(role, symbol, None, None, limit).await?;
        Ok(rows.iter().rev().map(Candle::from).collect())
    }

    // -----------------------------------------------------------------------
    // coin_news
    // -----------------------------------------------------------------------

    pub async fn add_news_article(&self, role: Role, symbol: &str, article: &NewsArticle) -> Result<NewsRow> {
        authorize(role, Table::CoinNews, Action::Insert)?;
        article.validate().map_err(AppError::BadRequest)?;
        let coin_id = self.coin_id(symbol).await?;

        let id = sqlx::query(
            r#"
            INSERT INTO coin_news (coin_id, title, content, url, source, sentiment_score, published_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(coin_id)
        .bind(&article.title)
        .bind(&article.content)
        .bind(&article.url)
        .bind(&article.source)
        .bind(article.sentiment_score)
        .bind(article.published_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::BadRequest("a news article with this url already exists".to_string())
            }
            _ => AppError::Database(e),
        })?
        .last_insert_rowid();

        Ok(NewsRow {
            id,
            coin_id,
            title: article.title.clone(),
            content: article.content.clone(),
            url: article.url.clone(),
            source: article.source.clone(),
            sentiment_score: article.sentiment_score,
            published_at: article.published_at,
        })
    }

    /// Most recent news for a coin, newest first.
    pub async fn get_recent_news(&self, role: Role, symbol: &str, limit: i64) -> Result<Vec<NewsRow>> {
        authorize(role, Table::CoinNews, Action::Select)?;
        let coin = self
            .get_coin(role, symbol)
            .await?
            .ok_or_else(|| not_found(symbol))?;

        let rows = sqlx::query_as::<_, NewsRow>(
            r#"
            SELECT id, coin_id, title, content, url, source, sentiment_score, published_at
            FROM coin_news
            WHERE coin_id = ?
            ORDER BY published_at DESC
            LIMIT ?
            "#,
        )
        .bind(coin.id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // helpers
    // -----------------------------------------------------------------------

    async fn coin_id(&self, symbol: &str) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM coins WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| not_found(symbol))
    }
}

fn active_clause(filter: RowFilter, joiner: &str) -> String {
    match filter {
        RowFilter::ActiveOnly => format!(" {joiner} is_active = 1"),
        RowFilter::All => String::new(),
    }
}

fn not_found(symbol: &str) -> AppError {
    AppError::NotFound(format!("coin {symbol} not found"))
}
