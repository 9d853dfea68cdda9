//! Controller tuning.

use std::time::Duration;

/// Timing and concurrency settings of a controller.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Re-check interval for converged objects.
    pub poll_interval: Duration,
    /// Delay before re-observing after a create, update or delete.
    pub short_wait: Duration,
    /// Backoff after the first consecutive failure.
    pub backoff_base: Duration,
    /// Upper bound on backoff.
    pub backoff_max: Duration,
    /// Number of workers draining the queue.
    pub max_concurrent_reconciles: usize,
    /// Interval at which every object of the kind is enqueued.
    pub resync_interval: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            short_wait: Duration::from_secs(1),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            max_concurrent_reconciles: 4,
            resync_interval: Duration::from_secs(300),
        }
    }
}
