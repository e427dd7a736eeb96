//! Per-client admission control.
//!
//! [`AdmissionControl`] is the seam the request pipeline consumes: given a
//! client key it answers accept or reject. [`SlidingWindowLimiter`] is the
//! shipped implementation: a per-key log of accepted request times, pruned
//! to the trailing window on every check. Rejected requests are not logged,
//! so a client hammering past its limit does not extend its own lockout.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use crate::clock::{ClockSource, SystemClock};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request may proceed. `remaining` is what is left of the budget in the current window.
    Accepted { remaining: usize },
    /// Request must be turned away. `retry_after` is when the oldest logged request ages out.
    Rejected { retry_after: Duration },
}

impl Admission {
    #[must_use]
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Accept/reject decision per client key.
pub trait AdmissionControl: Send + Sync {
    fn check(&self, client_key: &str) -> Admission;
}

/// Limits for the sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Requests accepted per client within one window.
    pub max_requests: usize,
    /// Length of the trailing window.
    pub window: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window: Duration::from_secs(60),
        }
    }
}

/// Sliding-log rate limiter keyed by client.
pub struct SlidingWindowLimiter {
    config: AdmissionConfig,
    clock: Arc<dyn ClockSource>,
    log: DashMap<String, VecDeque<u64>>,
}

impl std::fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("config", &self.config)
            .field("tracked_clients", &self.log.len())
            .finish_non_exhaustive()
    }
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(config: AdmissionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(config: AdmissionConfig, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            config,
            clock,
            log: DashMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> AdmissionConfig {
        self.config
    }

    /// Number of client keys currently holding a request log.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.log.len()
    }

    /// Drops clients whose whole log has aged out. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let window = self.window_millis();
        let before = self.log.len();
        self.log.retain(|_, times| {
            prune(times, now, window);
            !times.is_empty()
        });
        let dropped = before.saturating_sub(self.log.len());
        if dropped > 0 {
            debug!(dropped, "swept idle admission entries");
        }
        dropped
    }

    fn window_millis(&self) -> u64 {
        u64::try_from(self.config.window.as_millis()).unwrap_or(u64::MAX)
    }
}

impl AdmissionControl for SlidingWindowLimiter {
    fn check(&self, client_key: &str) -> Admission {
        let now = self.clock.now_millis();
        let window = self.window_millis();

        // The entry guard holds the shard lock, so check-and-record is atomic per key.
        let mut times = self.log.entry(client_key.to_owned()).or_default();
        prune(&mut times, now, window);

        if times.len() >= self.config.max_requests {
            let oldest = times.front().copied().unwrap_or(now);
            let retry_after =
                Duration::from_millis(oldest.saturating_add(window).saturating_sub(now));
            return Admission::Rejected { retry_after };
        }

        times.push_back(now);
        Admission::Accepted {
            remaining: self.config.max_requests - times.len(),
        }
    }
}

fn prune(times: &mut VecDeque<u64>, now: u64, window: u64) {
    while times
        .front()
        .is_some_and(|&t| now.saturating_sub(t) >= window)
    {
        times.pop_front();
    }
}
