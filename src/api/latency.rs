//! Request handling time and response outcome counters, fed by the API
//! middleware and served on /api/stats/latency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use axum::http::StatusCode;
use hdrhistogram::Histogram;
use serde::Serialize;

/// 1us to 100s at 3 significant figures.
const MAX_TRACKABLE_US: u64 = 100_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySnapshot {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub rate_limited: u64,
    pub server_errors: u64,
}

pub struct LatencyStats {
    histogram: Mutex<Histogram<u64>>,
    rate_limited: AtomicU64,
    server_errors: AtomicU64,
}

impl LatencyStats {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, MAX_TRACKABLE_US, 3)
            .expect("constant histogram bounds are valid");
        Self {
            histogram: Mutex::new(histogram),
            rate_limited: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
        }
    }

    /// Account for one finished response.
    pub fn record(&self, elapsed: Duration, status: StatusCode) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        if let Ok(mut h) = self.histogram.lock() {
            h.saturating_record(us.clamp(1, MAX_TRACKABLE_US));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.rate_limited.fetch_add(1, Ordering::Relaxed);
        } else if status.is_server_error() {
            self.server_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let mut snap = LatencySnapshot {
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
            ..Default::default()
        };
        let Ok(h) = self.histogram.lock() else {
            return snap;
        };
        snap.samples = h.len();
        if snap.samples > 0 {
            let ms = |us: u64| Some(us as f64 / 1000.0);
            snap.p50_ms = ms(h.value_at_quantile(0.5));
            snap.p95_ms = ms(h.value_at_quantile(0.95));
            snap.p99_ms = ms(h.value_at_quantile(0.99));
            snap.max_ms = ms(h.max());
        }
        snap
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats_have_no_percentiles() {
        let snap = LatencyStats::new().snapshot();
        assert_eq!(snap, LatencySnapshot::default());
    }

    #[test]
    fn percentiles_and_outcomes() {
        let stats = LatencyStats::new();
        for us in 1..=1000 {
            stats.record(Duration::from_micros(us), StatusCode::OK);
        }
        stats.record(Duration::from_millis(50), StatusCode::TOO_MANY_REQUESTS);
        stats.record(Duration::from_millis(2), StatusCode::INTERNAL_SERVER_ERROR);
        stats.record(Duration::from_millis(1), StatusCode::NOT_FOUND);

        let snap = stats.snapshot();
        assert_eq!(snap.samples, 1003);
        assert_eq!(snap.rate_limited, 1);
        assert_eq!(snap.server_errors, 1);
        let (p50, p95, p99) = (snap.p50_ms.unwrap(), snap.p95_ms.unwrap(), snap.p99_ms.unwrap());
        assert!(p50 <= p95 && p95 <= p99);
        assert!((0.49..=0.52).contains(&p50), "p50={p50}");
        assert!(snap.max_ms.unwrap() >= 49.9);
    }

    #[test]
    fn zero_duration_is_recorded() {
        let stats = LatencyStats::new();
        stats.record(Duration::ZERO, StatusCode::OK);
        assert_eq!(stats.snapshot().samples, 1);
    }
}
