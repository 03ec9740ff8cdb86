//! Wall-clock source with seconds granularity.
//!
//! Every timestamp in the system - observation stamps, trial issue times,
//! violation detection times - comes from a [`Clock`] so that the checker and
//! the store agree on "now" and tests can drive time by hand.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current time as Unix epoch seconds.
pub trait Clock: Send + Sync {
    /// Current time as whole seconds since the Unix epoch.
    fn now(&self) -> i64;
}

/// Production clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        // A host clock before 1970 is a misconfiguration we treat as t=0
        // rather than a panic path.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
    }
}

/// Manually driven clock for tests.
///
/// Starts at an explicit instant and only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock pinned at `now` epoch seconds.
    #[must_use]
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Move the clock forward by `secs`.
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Pin the clock at an absolute instant.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_past_2020() {
        let clock = SystemClock;
        assert!(clock.now() > 1_577_836_800);
    }

    #[test]
    fn test_manual_clock_advance_and_set() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now(), 100);

        clock.advance(25);
        assert_eq!(clock.now(), 125);

        clock.set(5);
        assert_eq!(clock.now(), 5);
    }
}
