//! Log throttling for repeated device faults
//!
//! A camera that is unplugged produces the same open error on every retry.
//! The throttler lets the first occurrence through and counts the repeats
//! until the interval elapses.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Entry {
    last_logged: Instant,
    suppressed: u64,
}

/// Limits how often the same message key is logged
pub struct LogThrottler {
    entries: Mutex<HashMap<String, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Check whether `key` may be logged now.
    ///
    /// Returns `Some(n)` when the caller should log, where `n` is the number of
    /// occurrences swallowed since the last logged one. Returns `None` while
    /// throttled.
    pub fn check(&self, key: &str) -> Option<u64> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Option<u64> {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last_logged) < self.interval => {
                entry.suppressed = entry.suppressed.saturating_add(1);
                None
            }
            Some(entry) => {
                let suppressed = entry.suppressed;
                entry.last_logged = now;
                entry.suppressed = 0;
                Some(suppressed)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Check if a message should be logged (not throttled)
    pub fn should_log(&self, key: &str) -> bool {
        self.check(key).is_some()
    }

    /// Forget `key`, so the next occurrence is logged immediately.
    ///
    /// Called when the error condition recovers.
    pub fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn clear_all(&self) {
        self.entries.lock().clear();
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`, keyed by `$key`
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}
