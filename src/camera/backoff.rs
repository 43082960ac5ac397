//! Reconnect delay policy

use serde::Serialize;
use std::time::Duration;

/// Capped exponential back-off
///
/// `delay(0)` is zero; afterwards the delay doubles per consecutive failure
/// starting at `base`, until it reaches `ceiling` and holds there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    pub base: Duration,
    pub ceiling: Duration,
}

impl RetryPolicy {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
        }
    }

    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let shift = (consecutive_failures - 1).min(31);
        self.base
            .checked_mul(1u32 << shift)
            .map_or(self.ceiling, |d| d.min(self.ceiling))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}
