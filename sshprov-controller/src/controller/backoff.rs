//! Per-item exponential backoff.

use std::collections::HashMap;
use std::time::Duration;

/// Tracks consecutive failures per item.
///
/// The delay after `n` consecutive failures is `base * 2^(n-1)`, capped at
/// `max`. A success resets the item.
#[derive(Debug, Clone)]
pub struct ItemBackoff {
    base: Duration,
    max: Duration,
    failures: HashMap<String, u32>,
}

impl ItemBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: HashMap::new(),
        }
    }

    /// Record a failure and return how long to wait before the next try.
    pub fn next_delay(&mut self, item: &str) -> Duration {
        let failures = self.failures.entry(item.to_string()).or_insert(0);
        *failures = failures.saturating_add(1);
        let n = *failures;
        self.delay_for(n)
    }

    /// Delay after `failures` consecutive failures.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exp = (failures - 1).min(31);
        self.base.saturating_mul(1u32 << exp).min(self.max)
    }

    /// Forget an item after a success.
    pub fn forget(&mut self, item: &str) {
        self.failures.remove(item);
    }

    pub fn failures(&self, item: &str) -> u32 {
        self.failures.get(item).copied().unwrap_or(0)
    }
}
