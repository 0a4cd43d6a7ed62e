//! Wall-clock abstraction.
//!
//! The store records access times in millisecond precision. Production
//! code uses [`SystemClock`]; tests inject a manual clock so ordering
//! by access time is deterministic.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Millisecond wall-clock timestamp provider.
pub trait Clock: Send + Sync {
    /// Current time as milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// System clock backed by the OS wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to. Test use.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a manual clock starting at the given timestamp.
    #[must_use]
    pub fn starting_at(millis: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(millis),
        })
    }

    /// Advance the clock by the given number of milliseconds.
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::starting_at(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 1_500);
    }

    #[test]
    fn system_clock_is_recent() {
        // Anything after 2020-01-01 counts as sane.
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
