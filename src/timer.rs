//! Idle-retry timer.
//!
//! The link has no per-packet retransmit timeout.  Instead the writer keeps a
//! single [`IdleTimer`] that is touched on every transmission; when it has
//! been quiet for longer than the configured interval while sends are still
//! unacknowledged, the writer speculatively retries the oldest one.
//!
//! Time is passed in explicitly so callers (and tests) decide what "now" is.

use std::time::{Duration, Instant};

/// Default quiet period before a speculative retry.
pub const DEFAULT_IDLE_RETRY: Duration = Duration::from_millis(200);

/// Tracks the last transmission time against a fixed interval.
#[derive(Debug, Clone)]
pub struct IdleTimer {
    interval: Duration,
    last_send: Instant,
}

impl IdleTimer {
    /// Start the timer at `now`.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_send: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record a transmission at `now`.
    pub fn touch(&mut self, now: Instant) {
        self.last_send = now;
    }

    /// Time since the last transmission.  Saturates at zero if `now` is
    /// earlier than the last touch.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_send)
    }

    /// `true` once strictly more than the interval has passed since the
    /// last transmission.
    pub fn expired(&self, now: Instant) -> bool {
        self.idle_for(now) > self.interval
    }
}
