use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use crate::api::extract::{optional_json, AppJson, AppQuery};
use crate::api::health::HealthState;
use crate::api::latency::{LatencySnapshot, LatencyStats};
use crate::api::middleware::{rate_limit, record_latency};
use crate::config::{
    indicator_windows, parse_kline_interval, Config, API_VERSION, KLINE_INTERVALS, LIMIT_DEFAULT,
    LIMIT_MAX, LIMIT_MIN, MARKET_REFRESH_INTERVAL_SECS, SCORER_HISTORY_LEN, SCORER_INTERVAL_SECS,
};
use crate::db::models::{CoinRow, NewsRow, PriceHistoryRow};
use crate::db::schema::{self, SchemaReport};
use crate::db::{CoinRepository, Role};
use crate::error::AppError;
use crate::fetcher::fetch_klines;
use crate::scorer::composite::{
    confidence, IndicatorSnapshot, CLOSE_WEIGHT, INDEX_SCALE, PRICE_VOLUME_BLEND, TREND_BLEND,
    VOLUME_WEIGHT,
};
use crate::scorer::index_scorer::MIN_CANDLES;
use crate::scorer::score_coin;
use crate::state::RateLimiter;
use crate::types::{Candle, NewsArticle};

const HISTORY_LIMIT_DEFAULT: i64 = 100;
const HISTORY_LIMIT_MAX: i64 = 1000;

/// Column order of rows returned by /api/data/fetch.
const MARKET_DATA_COLUMNS: [&str; 7] =
    ["symbol", "timestamp", "open", "high", "low", "close", "volume"];

#[derive(Clone)]
pub struct ApiState {
    pub repo: CoinRepository,
    pub limiter: Arc<RateLimiter>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub config: Arc<Config>,
    /// Client for on-demand market data fetches.
    pub http: reqwest::Client,
}

pub fn router(state: ApiState) -> Router {
    // Only the public coin listing is rate limited.
    let limited = Router::new()
        .route("/api/coins", get(list_coins).fallback(method_not_allowed))
        .route_layer(from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/api/status", get(get_status).fallback(method_not_allowed))
        .route("/health", get(get_health).fallback(method_not_allowed))
        .route("/api/config", get(get_config).fallback(method_not_allowed))
        .route("/api/indices/list", get(list_indices).fallback(method_not_allowed))
        .route("/api/predict/indices", post(predict_indices).fallback(method_not_allowed))
        .route("/api/data/fetch", post(fetch_market_data).fallback(method_not_allowed))
        .route("/api/model/info", get(get_model_info).fallback(method_not_allowed))
        .route("/api/coins/:symbol", get(get_coin).fallback(method_not_allowed))
        .route(
            "/api/coins/:symbol/history",
            get(get_history).post(add_history).fallback(method_not_allowed),
        )
        .route(
            "/api/coins/:symbol/news",
            get(get_news).post(add_news).fallback(method_not_allowed),
        )
        .route("/api/stats/latency", get(get_stats_latency).fallback(method_not_allowed))
        .merge(limited)
        .fallback(not_found)
        .layer(from_fn_with_state(Arc::clone(&state.latency), record_latency))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Effective page size for the coin listing. Missing or non-numeric input
/// falls back to the default; numbers are clamped into range.
pub fn clamp_limit(raw: Option<&str>) -> i64 {
    match raw.and_then(|s| s.trim().parse::<i64>().ok()) {
        Some(n) => n.clamp(LIMIT_MIN, LIMIT_MAX),
        None => LIMIT_DEFAULT,
    }
}

/// `Authorization: Bearer <SERVICE_KEY>` grants the service role; anything
/// else is anonymous.
fn caller_role(headers: &HeaderMap, cfg: &Config) -> Role {
    let Some(key) = cfg.service_key.as_deref() else {
        return Role::Anon;
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(key) {
        Role::Service
    } else {
        Role::Anon
    }
}

fn response_time(started: Instant) -> String {
    format!("{}ms", started.elapsed().as_millis())
}

fn ns_to_rfc3339(ns: u64) -> Option<String> {
    if ns == 0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp((ns / 1_000_000_000) as i64, (ns % 1_000_000_000) as u32)
        .map(|t| t.to_rfc3339())
}

// ---------------------------------------------------------------------------
// Query / body structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CoinsQuery {
    /// Kept as text so garbage input falls back to the default instead of
    /// rejecting the request.
    pub limit: Option<String>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

#[derive(Deserialize)]
pub struct NewsQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize, Default)]
pub struct PredictRequest {
    pub symbols: Option<Vec<String>>,
}

#[derive(Deserialize, Default)]
pub struct FetchRequest {
    pub symbols: Option<Vec<String>>,
    pub interval: Option<String>,
}

/// Either `{"candles": [...]}` or a single candle object.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum HistoryUpload {
    Batch { candles: Vec<Candle> },
    Single(Candle),
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub message: String,
    pub timestamp: String,
    pub response_time: String,
    pub database: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinsResponse {
    pub message: String,
    pub timestamp: String,
    pub response_time: String,
    pub limit: i64,
    pub count: usize,
    pub coins: Vec<CoinRow>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    pub last_refresh_at: Option<String>,
    pub last_score_at: Option<String>,
    pub refresh_failures: u64,
    /// Table and index counts plus policy coverage; absent when the
    /// database cannot be inspected.
    pub schema: Option<SchemaReport>,
}

#[derive(Serialize)]
pub struct IndexEntry {
    pub symbol: String,
    pub name: String,
    pub index: Option<f64>,
    pub last_prediction: Option<String>,
}

#[derive(Serialize)]
pub struct IndexListResponse {
    pub indices: Vec<IndexEntry>,
    pub count: usize,
}

#[derive(Serialize)]
pub struct PredictResponse {
    pub indices: Vec<f64>,
    pub index_names: Vec<String>,
    pub confidence: f64,
    pub symbols: Vec<String>,
    pub indicators: BTreeMap<String, IndicatorSnapshot>,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct MarketDataRow {
    pub symbol: String,
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl MarketDataRow {
    fn new(symbol: &str, c: &Candle) -> Self {
        Self {
            symbol: symbol.to_string(),
            timestamp: c.timestamp,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
        }
    }
}

#[derive(Serialize)]
pub struct FetchResponse {
    pub data: Vec<MarketDataRow>,
    pub count: usize,
    pub symbols: Vec<String>,
    pub columns: [&'static str; 7],
}

#[derive(Serialize)]
pub struct HistoryUploadResponse {
    pub symbol: String,
    pub received: usize,
    pub inserted: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("no route for {}", uri.path()))
}

async fn get_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let started = Instant::now();
    let database = if schema::ping(state.repo.pool()).await {
        "connected"
    } else {
        "unreachable"
    };
    Json(StatusResponse {
        message: "CoinScribe API is running".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        response_time: response_time(started),
        database,
    })
}

async fn list_coins(
    State(state): State<ApiState>,
    AppQuery(params): AppQuery<CoinsQuery>,
) -> Result<Json<CoinsResponse>, AppError> {
    let started = Instant::now();
    let limit = clamp_limit(params.limit.as_deref());
    let coins = state.repo.get_all_coins(Role::Anon, true, limit).await?;

    Ok(Json(CoinsResponse {
        message: "Coins retrieved".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        response_time: response_time(started),
        limit,
        count: coins.len(),
        coins,
    }))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let db_ok = schema::ping(state.repo.pool()).await;
    let report = if db_ok {
        schema::inspect(state.repo.pool())
            .await
            .map_err(|e| warn!("schema inspection failed: {e}"))
            .ok()
    } else {
        None
    };
    Json(HealthResponse {
        status: if db_ok { "healthy" } else { "degraded" },
        version: API_VERSION,
        database: if db_ok { "connected" } else { "unreachable" },
        last_refresh_at: ns_to_rfc3339(state.health.last_refresh_at_ns()),
        last_score_at: ns_to_rfc3339(state.health.last_score_at_ns()),
        refresh_failures: state.health.refresh_failures(),
        schema: report,
    })
}

async fn get_config(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let cfg = &state.config;
    Json(serde_json::json!({
        "version": API_VERSION,
        "symbols": cfg.symbols,
        "kline_interval": cfg.kline_interval,
        "kline_limit": cfg.kline_limit,
        "refresh_enabled": cfg.refresh_enabled,
        "refresh_interval_secs": MARKET_REFRESH_INTERVAL_SECS,
        "scorer_interval_secs": SCORER_INTERVAL_SECS,
        "rate_limit": {
            "max_requests": state.limiter.max_requests(),
            "window_secs": state.limiter.window().as_secs(),
        },
        "limit": { "min": LIMIT_MIN, "max": LIMIT_MAX, "default": LIMIT_DEFAULT },
    }))
}

async fn list_indices(State(state): State<ApiState>) -> Result<Json<IndexListResponse>, AppError> {
    let coins = state.repo.get_all_coins(Role::Anon, true, LIMIT_MAX).await?;
    let indices: Vec<IndexEntry> = coins
        .into_iter()
        .map(|c| IndexEntry {
            symbol: c.symbol,
            name: c.name,
            index: c.ai_index_value,
            last_prediction: c.last_ai_prediction,
        })
        .collect();
    Ok(Json(IndexListResponse {
        count: indices.len(),
        indices,
    }))
}

/// Symbols named in a request body, or every active coin when none are.
/// At most `LIMIT_MAX` are kept.
async fn requested_symbols(
    repo: &CoinRepository,
    requested: Option<Vec<String>>,
) -> Result<Vec<String>, AppError> {
    let mut symbols = match requested.filter(|s| !s.is_empty()) {
        Some(symbols) => symbols,
        None => repo
            .get_all_coins(Role::Anon, true, LIMIT_MAX)
            .await?
            .into_iter()
            .map(|c| c.symbol)
            .collect(),
    };
    symbols.truncate(LIMIT_MAX as usize);
    Ok(symbols)
}

async fn predict_indices(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<PredictResponse>, AppError> {
    let request: PredictRequest = optional_json(&body)?;
    let symbols = requested_symbols(&state.repo, request.symbols).await?;

    let mut response = PredictResponse {
        indices: Vec::new(),
        index_names: Vec::new(),
        confidence: 0.0,
        symbols: Vec::new(),
        indicators: BTreeMap::new(),
        timestamp: Utc::now().to_rfc3339(),
    };
    for symbol in &symbols {
        let score = match score_coin(&state.repo, Role::Anon, symbol).await {
            Ok(Some(score)) => score,
            Ok(None) => continue,
            Err(AppError::NotFound(_)) => {
                warn!(%symbol, "predict: skipping unknown coin");
                continue;
            }
            Err(e) => return Err(e),
        };
        response.indices.push(score.index);
        response.index_names.push(format!("{symbol} AI Index"));
        response.symbols.push(score.symbol.clone());
        response.indicators.insert(score.symbol, score.indicators);
    }

    if response.indices.is_empty() {
        return Err(AppError::BadRequest(
            "not enough price history to compute an index".to_string(),
        ));
    }
    response.confidence = confidence(&response.indices);
    Ok(Json(response))
}

async fn get_coin(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
) -> Result<Json<CoinRow>, AppError> {
    state
        .repo
        .get_coin(Role::Anon, &symbol)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("coin {symbol} not found")))
}

async fn get_history(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    AppQuery(params): AppQuery<HistoryQuery>,
) -> Result<Json<Vec<PriceHistoryRow>>, AppError> {
    let limit = params
        .limit
        .unwrap_or(HISTORY_LIMIT_DEFAULT)
        .clamp(1, HISTORY_LIMIT_MAX);
    let rows = state
        .repo
        .get_price_history(Role::Anon, &symbol, params.start, params.end, limit)
        .await?;
    Ok(Json(rows))
}

async fn add_history(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    headers: HeaderMap,
    AppJson(upload): AppJson<HistoryUpload>,
) -> Result<(StatusCode, Json<HistoryUploadResponse>), AppError> {
    let role = caller_role(&headers, &state.config);
    let (received, inserted) = match upload {
        HistoryUpload::Batch { candles } => {
            let inserted = state
                .repo
                .add_price_history_batch(role, &symbol, &candles)
                .await?;
            (candles.len(), inserted)
        }
        HistoryUpload::Single(candle) => {
            let inserted = state.repo.add_price_history(role, &symbol, &candle).await?;
            (1, u64::from(inserted))
        }
    };
    Ok((
        StatusCode::CREATED,
        Json(HistoryUploadResponse {
            symbol,
            received,
            inserted,
        }),
    ))
}

async fn get_news(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    AppQuery(params): AppQuery<NewsQuery>,
) -> Result<Json<Vec<NewsRow>>, AppError> {
    let limit = params.limit.unwrap_or(LIMIT_DEFAULT).clamp(LIMIT_MIN, LIMIT_MAX);
    let rows = state.repo.get_recent_news(Role::Anon, &symbol, limit).await?;
    Ok(Json(rows))
}

async fn add_news(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    headers: HeaderMap,
    AppJson(article): AppJson<NewsArticle>,
) -> Result<(StatusCode, Json<NewsRow>), AppError> {
    let role = caller_role(&headers, &state.config);
    let row = state.repo.add_news_article(role, &symbol, &article).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// Pull candles straight from the market data API without storing them.
/// Symbols that fail to fetch are logged and left out.
async fn fetch_market_data(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<FetchResponse>, AppError> {
    let request: FetchRequest = optional_json(&body)?;

    let mut cfg = Config::clone(&state.config);
    if let Some(interval) = request.interval {
        cfg.kline_interval = parse_kline_interval(&interval).map_err(|_| {
            AppError::BadRequest(format!(
                "interval must be one of {}",
                KLINE_INTERVALS.join(", ")
            ))
        })?;
    }
    let mut symbols = request
        .symbols
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| cfg.symbols.clone());
    symbols.truncate(LIMIT_MAX as usize);

    let mut data = Vec::new();
    let mut fetched = Vec::new();
    for symbol in symbols {
        match fetch_klines(&state.http, &cfg, &symbol).await {
            Ok((candles, _)) if !candles.is_empty() => {
                data.extend(candles.iter().map(|c| MarketDataRow::new(&symbol, c)));
                fetched.push(symbol);
            }
            Ok(_) => warn!(%symbol, "[FETCH] no candles returned"),
            Err(e) => warn!(%symbol, "[FETCH] on-demand fetch failed: {e}"),
        }
    }

    if data.is_empty() {
        return Err(AppError::NotFound("no market data retrieved".to_string()));
    }
    Ok(Json(FetchResponse {
        count: data.len(),
        data,
        symbols: fetched,
        columns: MARKET_DATA_COLUMNS,
    }))
}

async fn get_model_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "model_type": "composite_index",
        "version": API_VERSION,
        "index_scale": INDEX_SCALE,
        "weights": {
            "close": CLOSE_WEIGHT,
            "volume": VOLUME_WEIGHT,
            "price_volume": PRICE_VOLUME_BLEND,
            "trend": TREND_BLEND,
        },
        "indicator_windows": {
            "ma_short": indicator_windows::MA_SHORT,
            "ma_long": indicator_windows::MA_LONG,
            "ema_fast": indicator_windows::EMA_FAST,
            "ema_slow": indicator_windows::EMA_SLOW,
            "rsi": indicator_windows::RSI_PERIOD,
            "volatility": indicator_windows::VOLATILITY,
        },
        "history_len": SCORER_HISTORY_LEN,
        "min_candles": MIN_CANDLES,
        "scorer_interval_secs": SCORER_INTERVAL_SECS,
    }))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySnapshot> {
    Json(state.latency.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::db::connect_in_memory;

    async fn test_state() -> ApiState {
        let repo = CoinRepository::new(connect_in_memory().await);
        for (symbol, name) in [("BTC-USD", "Bitcoin"), ("ETH-USD", "Ethereum")] {
            repo.upsert_coin(Role::Service, symbol, name).await.unwrap();
        }
        ApiState {
            repo,
            limiter: Arc::new(RateLimiter::default()),
            health: Arc::new(HealthState::new()),
            latency: Arc::new(LatencyStats::new()),
            config: Arc::new(Config::for_tests()),
            http: reqwest::Client::new(),
        }
    }

    fn get_from(uri: &str, client: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-forwarded-for", client)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("authorization", "Bearer test-service-key")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Serves `/api/v3/klines`: two candles for BTCUSDT at the 4h interval,
    /// 400 for anything else.
    async fn klines_stub() -> String {
        use axum::extract::Query;
        use axum::response::IntoResponse;
        use std::collections::HashMap;

        let stub = Router::new().route(
            "/api/v3/klines",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let wanted = q.get("symbol").map(String::as_str) == Some("BTCUSDT")
                    && q.get("interval").map(String::as_str) == Some("4h");
                if !wanted {
                    return StatusCode::BAD_REQUEST.into_response();
                }
                let rows = serde_json::json!([
                    [1_700_000_000_000i64, "100.0", "102.0", "99.0", "101.0", "10.0"],
                    [1_700_014_400_000i64, "101.0", "103.0", "100.5", "102.5", "12.0"]
                ]);
                Json(rows).into_response()
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, stub).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn hourly_candles(n: i64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let close = 100.0 + (i % 7) as f64;
                Candle {
                    timestamp: 1_700_000_000 + i * 3600,
                    open: close - 0.5,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 20.0 + i as f64,
                }
            })
            .collect()
    }

    #[test]
    fn clamp_limit_bounds_input() {
        assert_eq!(clamp_limit(Some("0")), 1);
        assert_eq!(clamp_limit(Some("500")), 100);
        assert_eq!(clamp_limit(Some("42")), 42);
        assert_eq!(clamp_limit(Some("-3")), 1);
        assert_eq!(clamp_limit(Some("abc")), 10);
        assert_eq!(clamp_limit(None), 10);
    }

    #[tokio::test]
    async fn status_reports_database() {
        let app = router(test_state().await);
        let resp = app.oneshot(get_from("/api/status", "10.0.0.1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["database"], "connected");
        assert!(body["responseTime"].as_str().unwrap().ends_with("ms"));
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn coins_limit_is_clamped() {
        let app = router(test_state().await);

        let resp = app.clone().oneshot(get_from("/api/coins?limit=0", "10.0.0.2")).await.unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["limit"], 1);
        assert_eq!(body["count"], 1);

        let resp = app.clone().oneshot(get_from("/api/coins?limit=500", "10.0.0.2")).await.unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["limit"], 100);
        assert_eq!(body["coins"].as_array().unwrap().len(), 2);

        let resp = app.oneshot(get_from("/api/coins?limit=42", "10.0.0.2")).await.unwrap();
        assert_eq!(json_body(resp).await["limit"], 42);
    }

    #[tokio::test]
    async fn sixty_first_request_is_rate_limited() {
        let app = router(test_state().await);

        for i in 0..60 {
            let resp = app.clone().oneshot(get_from("/api/coins", "203.0.113.9")).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "request {}", i + 1);
        }

        let resp = app.clone().oneshot(get_from("/api/coins", "203.0.113.9")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[header::RETRY_AFTER], "60");
        assert_eq!(json_body(resp).await["status"], 429);

        // Other clients and the status endpoint are unaffected.
        let resp = app.clone().oneshot(get_from("/api/coins", "203.0.113.10")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = app.oneshot(get_from("/api/status", "203.0.113.9")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn non_get_returns_json_405() {
        let app = router(test_state().await);
        let req = Request::builder()
            .method("POST")
            .uri("/api/status")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(json_body(resp).await["status"], 405);
    }

    #[tokio::test]
    async fn unknown_route_returns_json_404() {
        let app = router(test_state().await);
        let resp = app.oneshot(get_from("/nope", "10.0.0.3")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(resp).await["status"], 404);
    }

    #[tokio::test]
    async fn history_upload_requires_service_key() {
        let state = test_state().await;
        let app = router(state.clone());
        let payload = serde_json::json!({ "candles": hourly_candles(3) }).to_string();

        let anon = Request::builder()
            .method("POST")
            .uri("/api/coins/BTC-USD/history")
            .header("content-type", "application/json")
            .body(Body::from(payload.clone()))
            .unwrap();
        let resp = app.clone().oneshot(anon).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let service = Request::builder()
            .method("POST")
            .uri("/api/coins/BTC-USD/history")
            .header("content-type", "application/json")
            .header("authorization", "Bearer test-service-key")
            .body(Body::from(payload))
            .unwrap();
        let resp = app.clone().oneshot(service).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(json_body(resp).await["inserted"], 3);

        let resp = app
            .oneshot(get_from("/api/coins/BTC-USD/history?limit=2", "10.0.0.4"))
            .await
            .unwrap();
        let rows = json_body(resp).await;
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0]["timestamp"].as_i64() > rows[1]["timestamp"].as_i64());
    }

    #[tokio::test]
    async fn news_roundtrip_through_api() {
        let app = router(test_state().await);
        let article = serde_json::json!({
            "title": "ETF inflows rise",
            "content": null,
            "url": "https://example.com/etf",
            "source": "wire",
            "sentiment_score": 0.4,
            "published_at": 1_700_000_000
        })
        .to_string();

        let req = Request::builder()
            .method("POST")
            .uri("/api/coins/BTC-USD/news")
            .header("content-type", "application/json")
            .header("authorization", "Bearer test-service-key")
            .body(Body::from(article))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app.oneshot(get_from("/api/coins/BTC-USD/news", "10.0.0.5")).await.unwrap();
        let news = json_body(resp).await;
        assert_eq!(news[0]["title"], "ETF inflows rise");
    }

    #[tokio::test]
    async fn predict_uses_stored_history() {
        let state = test_state().await;
        state
            .repo
            .add_price_history_batch(Role::Service, "BTC-USD", &hourly_candles(40))
            .await
            .unwrap();
        let app = router(state);

        let req = Request::builder()
            .method("POST")
            .uri("/api/predict/indices")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"symbols": ["BTC-USD", "ETH-USD"]}"#))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        // ETH has no history and is left out.
        assert_eq!(body["symbols"], serde_json::json!(["BTC-USD"]));
        assert_eq!(body["index_names"][0], "BTC-USD AI Index");
        let index = body["indices"][0].as_f64().unwrap();
        assert!((0.0..=10.0).contains(&index));
        assert_eq!(body["confidence"], 1.0);
        assert!(body["indicators"]["BTC-USD"]["rsi"].is_number());

        let req = Request::builder()
            .method("POST")
            .uri("/api/predict/indices")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"symbols": ["ETH-USD"]}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_and_latency_endpoints() {
        let state = test_state().await;
        state.health.mark_refreshed();
        let app = router(state);

        let resp = app.clone().oneshot(get_from("/health", "10.0.0.6")).await.unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], API_VERSION);
        assert!(body["last_refresh_at"].is_string());
        assert!(body["last_score_at"].is_null());
        assert_eq!(body["schema"]["tables"], 3);
        assert_eq!(body["schema"]["indexes"], 11);
        assert_eq!(body["schema"]["rls_enabled"], true);
        assert_eq!(body["schema"]["policies"]["coin_price_history"].as_array().unwrap().len(), 2);

        let resp = app.oneshot(get_from("/api/stats/latency", "10.0.0.6")).await.unwrap();
        let body = json_body(resp).await;
        // The /health call above was recorded.
        assert!(body["samples"].as_u64().unwrap() >= 1);
        assert!(body["p50_ms"].is_number());
        assert_eq!(body["rate_limited"], 0);
    }

    #[tokio::test]
    async fn unknown_coin_is_404() {
        let app = router(test_state().await);
        let resp = app.oneshot(get_from("/api/coins/DOGE-USD", "10.0.0.7")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_query_is_json_400() {
        let app = router(test_state().await);
        let resp = app
            .oneshot(get_from("/api/coins/BTC-USD/history?limit=abc", "10.0.0.8"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("application/json"));
        let body = json_body(resp).await;
        assert_eq!(body["status"], 400);
        assert!(body["error"].as_str().unwrap().starts_with("Bad request"));
    }

    #[tokio::test]
    async fn malformed_json_body_is_json_400() {
        let app = router(test_state().await);
        for uri in [
            "/api/coins/BTC-USD/news",
            "/api/coins/BTC-USD/history",
            "/api/predict/indices",
            "/api/data/fetch",
        ] {
            let resp = app.clone().oneshot(post_json(uri, "{not json")).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(json_body(resp).await["status"], 400, "{uri}");
        }
    }

    #[tokio::test]
    async fn single_candle_upload_skips_duplicates() {
        let app = router(test_state().await);
        let candle = serde_json::to_string(&hourly_candles(1)[0]).unwrap();

        let resp = app
            .clone()
            .oneshot(post_json("/api/coins/BTC-USD/history", &candle))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = json_body(resp).await;
        assert_eq!((body["received"].as_u64(), body["inserted"].as_u64()), (Some(1), Some(1)));

        let resp = app.oneshot(post_json("/api/coins/BTC-USD/history", &candle)).await.unwrap();
        assert_eq!(json_body(resp).await["inserted"], 0);
    }

    #[tokio::test]
    async fn predict_skips_unknown_symbols() {
        let state = test_state().await;
        state
            .repo
            .add_price_history_batch(Role::Service, "BTC-USD", &hourly_candles(40))
            .await
            .unwrap();
        let app = router(state);

        let resp = app
            .clone()
            .oneshot(post_json("/api/predict/indices", r#"{"symbols": ["DOGE-USD", "BTC-USD"]}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["symbols"], serde_json::json!(["BTC-USD"]));

        // Only the first LIMIT_MAX symbols are scored.
        let mut symbols = vec!["DOGE-USD".to_string(); LIMIT_MAX as usize];
        symbols.push("BTC-USD".to_string());
        let body = serde_json::json!({ "symbols": symbols }).to_string();
        let resp = app.oneshot(post_json("/api/predict/indices", &body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn data_fetch_returns_rows_from_market_api() {
        let mut state = test_state().await;
        let mut cfg = Config::for_tests();
        cfg.market_data_url = klines_stub().await;
        state.config = Arc::new(cfg);
        let app = router(state);

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/data/fetch",
                r#"{"symbols": ["BTC-USD", "DOGE-USD"], "interval": "4h"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        // DOGE fails upstream and is left out.
        assert_eq!(body["symbols"], serde_json::json!(["BTC-USD"]));
        assert_eq!(body["count"], 2);
        assert_eq!(body["columns"][0], "symbol");
        assert_eq!(body["columns"].as_array().unwrap().len(), 7);
        assert_eq!(body["data"][1]["timestamp"], 1_700_014_400);
        assert_eq!(body["data"][1]["close"], 102.5);

        // Default interval is 1h, which the stub refuses: nothing comes back.
        let resp = app
            .clone()
            .oneshot(post_json("/api/data/fetch", r#"{"symbols": ["BTC-USD"]}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(resp).await["status"], 404);

        let resp = app
            .oneshot(post_json("/api/data/fetch", r#"{"interval": "7h"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn model_info_reports_weights_and_windows() {
        let app = router(test_state().await);
        let resp = app.oneshot(get_from("/api/model/info", "10.0.0.9")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["index_scale"], 10.0);
        assert_eq!(body["weights"]["close"], 0.7);
        assert_eq!(body["weights"]["trend"], 0.4);
        assert_eq!(body["indicator_windows"]["rsi"], 14);
        assert_eq!(body["history_len"], SCORER_HISTORY_LEN);
    }
}
