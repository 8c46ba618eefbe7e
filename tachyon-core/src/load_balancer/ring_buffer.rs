//! Ring buffer of the most recent samples.
//!
//! Memory is bounded by sample count: a busy host only remembers its last `K`
//! samples even if they all fall within the window. Each slot still carries
//! its timestamp, so reads and the cleaner also drop samples older than the
//! window, which keeps quiet hosts from being judged on stale data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::clock::Nanos;
use crate::load_balancer::tracker::{clamp_latency, WindowStats};

#[derive(Debug, Default)]
struct Slot {
    /// Sample timestamp; 0 while empty or being written.
    stamp: AtomicU64,
    /// `latency_nanos << 1 | failed`
    packed: AtomicU64,
}

/// Lock-free ring of the last `K` timestamped samples.
#[derive(Debug)]
pub struct RingWindow {
    slots: Box<[Slot]>,
    cursor: AtomicU64,
    window: Nanos,
}

impl RingWindow {
    /// Create a ring with room for `capacity` samples.
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            slots: (0..capacity.max(1)).map(|_| Slot::default()).collect(),
            cursor: AtomicU64::new(0),
            window: window.as_nanos().max(1) as Nanos,
        }
    }

    fn is_live(&self, stamp: Nanos, now: Nanos) -> bool {
        stamp != 0 && now.saturating_sub(stamp) <= self.window
    }

    /// Overwrite the oldest slot with a new sample.
    pub fn record(&self, now: Nanos, latency: Duration, success: bool) {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len() as u64;
        let slot = &self.slots[index as usize];

        slot.stamp.store(0, Ordering::Release);
        slot.packed.store(clamp_latency(latency) << 1 | u64::from(!success), Ordering::Release);
        slot.stamp.store(now.max(1), Ordering::Release);
    }

    /// Aggregate the slots whose sample is inside the window.
    pub fn stats(&self, now: Nanos) -> WindowStats {
        let (mut sum, mut samples, mut failures) = (0_u128, 0_u64, 0_u64);

        for slot in self.slots.iter() {
            let stamp = slot.stamp.load(Ordering::Acquire);
            if !self.is_live(stamp, now) {
                continue;
            }
            let packed = slot.packed.load(Ordering::Acquire);
            if slot.stamp.load(Ordering::Acquire) != stamp {
                // overwritten while we were reading it
                continue;
            }
            samples += 1;
            sum += u128::from(packed >> 1);
            failures += packed & 1;
        }

        WindowStats::from_sum(sum, samples, failures)
    }

    /// Empty every slot older than the window. Returns the number of samples
    /// dropped.
    pub fn evict_expired(&self, now: Nanos) -> u64 {
        let mut evicted = 0;
        for slot in self.slots.iter() {
            let stamp = slot.stamp.load(Ordering::Acquire);
            if stamp == 0 || self.is_live(stamp, now) {
                continue;
            }
            if slot.stamp.compare_exchange(stamp, 0, Ordering::AcqRel, Ordering::Relaxed).is_ok() {
                evicted += 1;
            }
        }
        evicted
    }
}
