//! Tunables for one link.

use std::time::Duration;

use crate::timer::DEFAULT_IDLE_RETRY;

/// Per-link configuration.
///
/// `LinkConfig::default()` gives the standard protocol parameters; tests and
/// the CLI override individual fields with struct-update syntax.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Maximum number of unacknowledged payloads in flight.
    pub max_window: usize,
    /// Quiet period after which the oldest pending payload is retried.
    pub idle_retry: Duration,
    /// Capacity of the outbound and inbound application queues.
    pub queue_capacity: usize,
    /// Capacity of each reader signal queue; overflow drops the oldest.
    pub signal_capacity: usize,
    /// Sleep after a tick that did nothing.  `None` just yields.
    pub idle_pause: Option<Duration>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_window: 4,
            idle_retry: DEFAULT_IDLE_RETRY,
            queue_capacity: 5,
            signal_capacity: 10,
            idle_pause: None,
        }
    }
}
