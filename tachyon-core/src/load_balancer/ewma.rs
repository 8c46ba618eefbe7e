//! Exponentially Weighted Moving Average latency tracker, optionally peak-sensitive.
//!
//! The EWMA keeps O(1) state per host. Without a floor it would remember a
//! single slow burst forever on a host that stops receiving traffic, so the
//! average is only reported while samples keep arriving: once the host has
//! been silent for longer than the idle period the tracker reports no data
//! and the engine substitutes its neutral default.
//!
//! In peak mode a sample higher than the current average replaces it
//! outright, and lower samples decay the average back down gradually.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::clock::Nanos;
use crate::load_balancer::tracker::{clamp_latency, WindowStats};

/// Bit pattern marking "no average yet". It is a NaN, which finite EWMA
/// arithmetic never produces.
const EMPTY: u64 = u64::MAX;

/// Lock-free EWMA over a host's latency samples.
#[derive(Debug)]
pub struct PeakEwma {
    /// The current average in nanoseconds, stored as bits of an f64 to allow
    /// lock-free atomic updates.
    ewma: AtomicU64,

    /// Weight of the newest sample. Close to 1 follows the latest sample,
    /// close to 0 smooths heavily.
    alpha: f64,

    /// Jump to latency spikes instead of averaging them in.
    peak: bool,

    /// Silence after which the average is no longer reported.
    idle: Nanos,

    /// Timestamp of the most recent sample, 0 when the series is empty.
    last_update: AtomicU64,

    samples: AtomicU64,
    failures: AtomicU64,
}

impl PeakEwma {
    /// Create an empty tracker.
    pub fn new(alpha: f64, peak: bool, idle: Duration) -> Self {
        Self {
            ewma: AtomicU64::new(EMPTY),
            alpha,
            peak,
            idle: idle.as_nanos().max(1) as Nanos,
            last_update: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn is_idle(&self, last: Nanos, now: Nanos) -> bool {
        last == 0 || now.saturating_sub(last) > self.idle
    }

    /// Fold a sample into the average.
    pub fn record(&self, now: Nanos, latency: Duration, success: bool) {
        let sample = clamp_latency(latency) as f64;
        let failed = u64::from(!success);

        if self.is_idle(self.last_update.load(Ordering::Acquire), now) {
            // Start a fresh series; racing writers may each restart it, which
            // only loses the samples they raced with.
            self.ewma.store(sample.to_bits(), Ordering::Release);
            self.samples.store(1, Ordering::Relaxed);
            self.failures.store(failed, Ordering::Relaxed);
            self.last_update.fetch_max(now, Ordering::AcqRel);
            return;
        }

        let mut current_bits = self.ewma.load(Ordering::Acquire);
        loop {
            let next = if current_bits == EMPTY {
                sample
            } else {
                let current = f64::from_bits(current_bits);
                if self.peak && sample > current {
                    sample
                } else {
                    self.alpha * sample + (1.0 - self.alpha) * current
                }
            };

            match self.ewma.compare_exchange_weak(current_bits, next.to_bits(), Ordering::Release, Ordering::Acquire) {
                Ok(_) => break,
                Err(updated_bits) => current_bits = updated_bits,
            }
        }

        self.samples.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(failed, Ordering::Relaxed);
        self.last_update.fetch_max(now, Ordering::AcqRel);
    }

    /// Current average, or no data when the series is empty or idle.
    pub fn stats(&self, now: Nanos) -> WindowStats {
        let bits = self.ewma.load(Ordering::Acquire);
        if bits == EMPTY || self.is_idle(self.last_update.load(Ordering::Acquire), now) {
            return WindowStats::default();
        }

        let average = f64::from_bits(bits);
        let samples = self.samples.load(Ordering::Relaxed);
        WindowStats {
            average: (average.is_finite() && average >= 0.0).then(|| Duration::from_nanos(average.round() as u64)),
            samples,
            failures: self.failures.load(Ordering::Relaxed).min(samples),
        }
    }

    /// Forget the series if the host has gone idle. Returns the number of
    /// samples dropped.
    pub fn evict_expired(&self, now: Nanos) -> u64 {
        let last = self.last_update.load(Ordering::Acquire);
        if last == 0 || !self.is_idle(last, now) {
            return 0;
        }
        if self.last_update.compare_exchange(last, 0, Ordering::AcqRel, Ordering::Relaxed).is_err() {
            // a writer revived the series
            return 0;
        }
        self.ewma.store(EMPTY, Ordering::Release);
        self.failures.store(0, Ordering::Relaxed);
        self.samples.swap(0, Ordering::Relaxed)
    }
}
