//! Wall-clock sources for accounting timestamps.
//!
//! Bucket refill and access windows are computed from wall-clock seconds
//! because the timestamps are persisted in the shared store and compared
//! across processes.

use std::time::Duration;

use parking_lot::Mutex;

/// A source of the current time in seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time in (fractional) seconds since the Unix epoch.
    fn now(&self) -> f64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    /// Create a clock frozen at `start` seconds.
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by.as_secs_f64();
    }

    /// Jump to an absolute time, possibly backwards.
    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now() > 1_577_836_800.0);
    }

    #[test]
    fn test_manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(100.0);
        assert_eq!(clock.now(), 100.0);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), 101.5);

        clock.set(50.0);
        assert_eq!(clock.now(), 50.0);
    }
}
