use std::sync::RwLock;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::{RATE_LIMIT_MAX_REQUESTS, RATE_LIMIT_RING_SLOTS, RATE_LIMIT_WINDOW_SECS};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

#[cfg(test)]
impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

// ---------------------------------------------------------------------------
// WindowSlot
// ---------------------------------------------------------------------------

/// Counters for one fixed window. `epoch` is the window index the counters
/// belong to; a slot whose epoch is behind the live window is stale and is
/// wiped before reuse.
struct WindowSlot {
    epoch: RwLock<Option<u64>>,
    counts: DashMap<String, u32>,
}

impl WindowSlot {
    fn new() -> Self {
        Self {
            epoch: RwLock::new(None),
            counts: DashMap::new(),
        }
    }

    /// Rotate the slot to `epoch` if it still holds an older window.
    fn claim(&self, epoch: u64) {
        let current = *self.epoch.read().unwrap_or_else(|e| e.into_inner());
        if current.is_some_and(|e| e >= epoch) {
            return;
        }
        let mut guard = self.epoch.write().unwrap_or_else(|e| e.into_inner());
        // Another request may have rotated it while we waited for the lock.
        if guard.map_or(true, |e| e < epoch) {
            self.counts.clear();
            *guard = Some(epoch);
        }
    }

    /// Clear the slot if it still holds window `expected`. A slot that a
    /// request rotated to a newer window in the meantime is left alone.
    fn wipe(&self, expected: u64) -> usize {
        let mut guard = self.epoch.write().unwrap_or_else(|e| e.into_inner());
        if *guard != Some(expected) {
            return 0;
        }
        let evicted = self.counts.len();
        self.counts.clear();
        *guard = None;
        evicted
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Fixed-window request counter keyed by client address.
///
/// Windows are numbered from `origin`; window `n` lives in ring slot
/// `n % slots`. Memory is bounded by the clients seen in the windows still
/// held by the ring: a slot is wiped when it is reused for a newer window,
/// and `sweep` wipes every slot that no longer holds a live window.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    origin: Instant,
    slots: Vec<WindowSlot>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::with_origin(max_requests, window, Instant::now())
    }

    pub fn with_origin(max_requests: u32, window: Duration, origin: Instant) -> Self {
        Self {
            max_requests,
            window,
            origin,
            slots: (0..RATE_LIMIT_RING_SLOTS.max(1)).map(|_| WindowSlot::new()).collect(),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn epoch_at(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin);
        (elapsed.as_nanos() / self.window.as_nanos().max(1)) as u64
    }

    fn slot(&self, epoch: u64) -> &WindowSlot {
        &self.slots[(epoch % self.slots.len() as u64) as usize]
    }

    pub fn check(&self, client: &str) -> RateDecision {
        self.check_at(client, Instant::now())
    }

    /// Count a request from `client` at `now` and decide whether it may proceed.
    pub fn check_at(&self, client: &str, now: Instant) -> RateDecision {
        let epoch = self.epoch_at(now);
        let slot = self.slot(epoch);
        slot.claim(epoch);

        // Hold the epoch read lock while counting so a concurrent rotation
        // cannot wipe the map between the check and the increment.
        let guard = slot.epoch.read().unwrap_or_else(|e| e.into_inner());
        if *guard != Some(epoch) {
            // The slot already moved on to a newer window; this request
            // belongs to a window that has ended.
            return RateDecision::Allowed { remaining: self.max_requests };
        }

        let mut count = slot.counts.entry(client.to_string()).or_insert(0);
        if *count >= self.max_requests {
            return RateDecision::Limited {
                retry_after_secs: RATE_LIMIT_WINDOW_SECS,
            };
        }
        *count += 1;
        RateDecision::Allowed {
            remaining: self.max_requests - *count,
        }
    }

    /// Wipe every slot that does not hold the live window or the one before
    /// it. Returns the number of client entries evicted.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let live = self.epoch_at(now);
        let mut evicted = 0;
        for slot in &self.slots {
            let epoch = *slot.epoch.read().unwrap_or_else(|e| e.into_inner());
            if let Some(e) = epoch {
                if e + 1 < live {
                    evicted += slot.wipe(e);
                }
            }
        }
        evicted
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Clients tracked across all slots.
    pub fn tracked_clients(&self) -> usize {
        self.slots.iter().map(|s| s.counts.len()).sum()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(
            RATE_LIMIT_MAX_REQUESTS,
            Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
