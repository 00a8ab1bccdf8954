use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::api::latency::LatencyStats;
use crate::api::routes::ApiState;
use crate::error::AppError;
use crate::state::RateDecision;

/// Rate-limit identity for a request: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the socket peer.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|p| p.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit(
    State(state): State<ApiState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(req.headers(), peer);

    match state.limiter.check(&client) {
        RateDecision::Allowed { remaining } => {
            let mut resp = next.run(req).await;
            let headers = resp.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(state.limiter.max_requests()));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            Ok(resp)
        }
        RateDecision::Limited { retry_after_secs } => {
            warn!(%client, retry_after_secs, "rate limit exceeded");
            Err(AppError::RateLimited)
        }
    }
}

/// Records handling time of every response, errors included.
pub async fn record_latency(
    State(latency): State<Arc<LatencyStats>>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let resp = next.run(req).await;
    latency.record(started.elapsed(), resp.status());
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_for_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert_eq!(client_key(&headers, Some(peer)), "203.0.113.7");
    }

    #[test]
    fn falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_key(&headers, None), "198.51.100.2");

        let peer: SocketAddr = "192.0.2.1:443".parse().unwrap();
        assert_eq!(client_key(&HeaderMap::new(), Some(peer)), "192.0.2.1");
        assert_eq!(client_key(&HeaderMap::new(), None), "unknown");
    }
}
