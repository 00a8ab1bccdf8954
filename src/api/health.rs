//! Background task heartbeats reported by GET /health.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Default)]
pub struct HealthState {
    /// Nanosecond timestamp of the last completed market refresh (0 = none).
    pub last_refresh_at_ns: AtomicU64,
    /// Nanosecond timestamp of the last completed scoring pass (0 = none).
    pub last_score_at_ns: AtomicU64,
    /// Per-coin refresh failures since startup.
    pub refresh_failures: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_refreshed(&self) {
        self.last_refresh_at_ns.store(now_ns(), Ordering::Relaxed);
    }

    pub fn mark_scored(&self) {
        self.last_score_at_ns.store(now_ns(), Ordering::Relaxed);
    }

    pub fn inc_refresh_failures(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_refresh_at_ns(&self) -> u64 {
        self.last_refresh_at_ns.load(Ordering::Relaxed)
    }

    pub fn last_score_at_ns(&self) -> u64 {
        self.last_score_at_ns.load(Ordering::Relaxed)
    }

    pub fn refresh_failures(&self) -> u64 {
        self.refresh_failures.load(Ordering::Relaxed)
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeats_start_unset() {
        let health = HealthState::new();
        assert_eq!(health.last_refresh_at_ns(), 0);
        assert_eq!(health.last_score_at_ns(), 0);

        health.mark_scored();
        health.inc_refresh_failures();
        health.inc_refresh_failures();
        assert!(health.last_score_at_ns() > 0);
        assert_eq!(health.last_refresh_at_ns(), 0);
        assert_eq!(health.refresh_failures(), 2);
    }
}
