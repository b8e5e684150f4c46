//! Rolling request statistics and the snapshot handed to observers.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

use crate::throttle::Mode;

/// Point-in-time view of the client's throttling state.
///
/// Produced by [`Client::queue_stats`](crate::Client::queue_stats) under a
/// single lock, so the fields are mutually consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateStats {
    /// Network calls dispatched within the stats window (60 s by default).
    pub requests_in_window: usize,
    /// Lifetime number of `429` responses.
    pub rate_limit_hit_count: u64,
    /// Delay the scheduler currently leaves between dispatches.
    pub current_delay_ms: u64,
    /// Requests waiting for dispatch.
    pub queue_depth: usize,
    /// Network calls currently outstanding.
    pub in_flight: usize,
    /// Live entries in the response cache.
    pub cache_size: usize,
    /// Current throttling mode.
    pub mode: Mode,
    /// Wall-clock time of the latest `429`, in Unix milliseconds.
    pub last_rate_limited_at_ms: Option<u64>,
    /// Fallback snapshots that could not be written.
    pub fallback_write_failures: u64,
}

/// Rolling counters mutated by the scheduler.
#[derive(Debug)]
pub struct StatsStore {
    window: Duration,
    dispatched: VecDeque<Instant>,
    rate_limit_hits: u64,
    last_rate_limited_at: Option<SystemTime>,
}

impl StatsStore {
    /// Creates an empty store counting dispatches over `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            dispatched: VecDeque::new(),
            rate_limit_hits: 0,
            last_rate_limited_at: None,
        }
    }

    /// Records one dispatched network call.
    pub fn record_dispatch(&mut self) {
        let now = Instant::now();
        self.prune(now);
        self.dispatched.push_back(now);
    }

    /// Records one `429`.
    pub fn record_rate_limit_hit(&mut self, at: SystemTime) {
        self.rate_limit_hits += 1;
        self.last_rate_limited_at = Some(at);
    }

    /// Seeds the last hit time from a previous session without counting it.
    pub fn restore_last_rate_limited_at(&mut self, at: SystemTime) {
        if self.last_rate_limited_at.map_or(true, |current| current < at) {
            self.last_rate_limited_at = Some(at);
        }
    }

    /// Dispatches within the window ending now.
    pub fn requests_in_window(&mut self) -> usize {
        self.prune(Instant::now());
        self.dispatched.len()
    }

    /// Lifetime hit counter.
    pub fn rate_limit_hit_count(&self) -> u64 {
        self.rate_limit_hits
    }

    /// Wall-clock time of the latest hit seen by this store.
    pub fn last_rate_limited_at(&self) -> Option<SystemTime> {
        self.last_rate_limited_at
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.dispatched.front() {
            if now.saturating_duration_since(*front) >= self.window {
                self.dispatched.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Milliseconds since the Unix epoch, zero for times before it.
pub(crate) fn epoch_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
