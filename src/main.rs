mod api;
mod config;
mod db;
mod error;
mod fetcher;
mod indicators;
mod market_refresh;
mod scorer;
mod state;
mod types;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::{router, ApiState};
use crate::config::{Config, RATE_LIMIT_SWEEP_SECS};
use crate::db::CoinRepository;
use crate::error::Result;
use crate::market_refresh::{seed_coins, MarketRefresher};
use crate::scorer::IndexScorer;
use crate::state::RateLimiter;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);
    let repo = CoinRepository::new(pool);

    let added = seed_coins(&repo, &cfg.symbols).await?;
    info!("Tracking {} coins ({} newly added)", cfg.symbols.len(), added);

    if cfg.service_key.is_none() {
        warn!("SERVICE_KEY not set: write endpoints will refuse every caller");
    }

    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());
    let limiter = Arc::new(RateLimiter::default());

    // --- Background tasks ---

    // Market refresher (startup, then every 300s)
    if cfg.refresh_enabled {
        let refresher = MarketRefresher::new(cfg.clone(), repo.clone(), Arc::clone(&health));
        tokio::spawn(async move { refresher.run().await });
    } else {
        info!("REFRESH_ENABLED=false: market data refresher not started");
    }

    // Index scorer (every 60s)
    let scorer = IndexScorer::new(repo.clone(), Arc::clone(&health));
    tokio::spawn(async move { scorer.run().await });

    // Rate limiter sweeper
    let sweep_limiter = Arc::clone(&limiter);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(RATE_LIMIT_SWEEP_SECS));
        loop {
            interval.tick().await;
            let evicted = sweep_limiter.sweep();
            if evicted > 0 {
                debug!(evicted, tracked = sweep_limiter.tracked_clients(), "rate limiter sweep");
            }
        }
    });

    // --- HTTP API server ---
    let api_state = ApiState {
        repo,
        limiter,
        health,
        latency,
        config: Arc::new(cfg.clone()),
        http: fetcher::http_client()?,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
