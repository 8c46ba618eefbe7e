//! Monotonic time sources.
//!
//! Trackers store timestamps in atomics, so time is expressed as nanoseconds
//! since a clock-local epoch instead of `Instant`.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Nanoseconds elapsed since a clock's epoch.
pub type Nanos = u64;

/// A source of monotonic timestamps.
pub trait Clock: Send + Sync + Debug {
    /// Current time in nanoseconds since this clock's epoch.
    fn now(&self) -> Nanos;
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    /// Create a clock whose epoch is the moment of construction.
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Nanos {
        // u64 nanoseconds overflow after ~584 years of uptime
        self.epoch.elapsed().as_nanos() as Nanos
    }
}

/// A clock that only moves when told to.
///
/// Starts at one second past its epoch so that "zero" is never a valid
/// timestamp.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a manual clock.
    pub fn new() -> Self {
        Self { now: AtomicU64::new(Duration::from_secs(1).as_nanos() as Nanos) }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_nanos() as Nanos, Ordering::AcqRel);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Nanos {
        self.now.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::new();
        let start = clock.now();
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now() - start, 5_000_000);
    }

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
