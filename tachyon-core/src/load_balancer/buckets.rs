//! Bucketed sliding window.
//!
//! The window is split into `B` buckets of `window / B` each. A bucket is
//! tagged with the absolute interval it currently holds; a writer landing on
//! a bucket whose tag is older claims it with a compare-and-swap, zeroes it
//! and then accumulates. Reads sum the buckets whose tag falls within the
//! last `B` intervals, so expiry follows wall time rather than traffic.
//!
//! A writer racing the reset of a freshly claimed bucket can lose its
//! sample. Counters only ever grow or get zeroed, so the aggregate cannot go
//! negative or run away.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::clock::Nanos;
use crate::load_balancer::tracker::{clamp_latency, WindowStats};

#[derive(Debug, Default)]
struct Bucket {
    /// Interval index + 1; 0 marks an unused bucket.
    tag: AtomicU64,
    sum_nanos: AtomicU64,
    count: AtomicU64,
    failures: AtomicU64,
}

impl Bucket {
    fn clear(&self) -> u64 {
        self.sum_nanos.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.count.swap(0, Ordering::Relaxed)
    }
}

/// Fixed-memory, time-indexed latency window.
#[derive(Debug)]
pub struct BucketWindow {
    buckets: Box<[Bucket]>,
    width: Nanos,
}

impl BucketWindow {
    /// Create a window of `bucket_count` buckets spanning `window`.
    pub fn new(window: Duration, bucket_count: usize) -> Self {
        let bucket_count = bucket_count.max(1);
        let width = (window.as_nanos() / bucket_count as u128).max(1) as Nanos;
        Self { buckets: (0..bucket_count).map(|_| Bucket::default()).collect(), width }
    }

    fn interval(&self, now: Nanos) -> u64 {
        now / self.width
    }

    fn slot(&self, interval: u64) -> &Bucket {
        &self.buckets[(interval % self.buckets.len() as u64) as usize]
    }

    fn is_live(&self, tag: u64, current: u64) -> bool {
        tag != 0 && tag - 1 <= current && current - (tag - 1) < self.buckets.len() as u64
    }

    /// Accumulate a sample into the bucket covering `now`.
    pub fn record(&self, now: Nanos, latency: Duration, success: bool) {
        let interval = self.interval(now);
        let tag = interval + 1;
        let bucket = self.slot(interval);

        let mut current = bucket.tag.load(Ordering::Acquire);
        while current != tag {
            if current > tag {
                // the bucket already moved on to a newer interval
                return;
            }
            match bucket.tag.compare_exchange(current, tag, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    bucket.clear();
                    break;
                }
                Err(actual) => current = actual,
            }
        }

        bucket.sum_nanos.fetch_add(clamp_latency(latency), Ordering::Relaxed);
        bucket.count.fetch_add(1, Ordering::Relaxed);
        if !success {
            bucket.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Aggregate the buckets still inside the window.
    pub fn stats(&self, now: Nanos) -> WindowStats {
        let current = self.interval(now);
        let (mut sum, mut samples, mut failures) = (0_u128, 0_u64, 0_u64);

        for bucket in self.buckets.iter() {
            if !self.is_live(bucket.tag.load(Ordering::Acquire), current) {
                continue;
            }
            let count = bucket.count.load(Ordering::Relaxed);
            samples += count;
            sum += u128::from(bucket.sum_nanos.load(Ordering::Relaxed));
            failures += bucket.failures.load(Ordering::Relaxed).min(count);
        }

        WindowStats::from_sum(sum, samples, failures)
    }

    /// Zero every bucket that fell out of the window. Returns the number of
    /// samples dropped.
    pub fn evict_expired(&self, now: Nanos) -> u64 {
        let current = self.interval(now);
        let mut evicted = 0;

        for bucket in self.buckets.iter() {
            let tag = bucket.tag.load(Ordering::Acquire);
            if tag == 0 || self.is_live(tag, current) {
                continue;
            }
            if bucket.tag.compare_exchange(tag, 0, Ordering::AcqRel, Ordering::Relaxed).is_ok() {
                evicted += bucket.clear();
            }
        }

        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Nanos = 1_000_000;

    #[test]
    fn empty_window_has_no_data() {
        let window = BucketWindow::new(Duration::from_secs(1), 10);
        assert_eq!(window.stats(5 * MS), WindowStats::default());
    }

    #[test]
    fn averages_samples_across_buckets() {
        let window = BucketWindow::new(Duration::from_secs(1), 10);
        window.record(10 * MS, Duration::from_millis(10), true);
        window.record(150 * MS, Duration::from_millis(30), true);
        window.record(420 * MS, Duration::from_millis(50), false);

        let stats = window.stats(500 * MS);
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.average, Some(Duration::from_millis(30)));
    }

    #[test]
    fn samples_expire_with_wall_time() {
        let window = BucketWindow::new(Duration::from_secs(1), 10);
        window.record(50 * MS, Duration::from_millis(100), true);
        window.record(900 * MS, Duration::from_millis(20), true);

        // the first bucket has rotated out, the second has not
        let stats = window.stats(1_500 * MS);
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.average, Some(Duration::from_millis(20)));

        assert_eq!(window.stats(3_000 * MS).average, None);
    }

    #[test]
    fn reused_bucket_starts_from_zero() {
        let window = BucketWindow::new(Duration::from_secs(1), 4);
        window.record(10 * MS, Duration::from_millis(100), false);
        // same slot, one full window later
        window.record(1_010 * MS, Duration::from_millis(10), true);

        let stats = window.stats(1_010 * MS);
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.average, Some(Duration::from_millis(10)));
    }

    #[test]
    fn late_samples_do_not_clobber_newer_buckets() {
        let window = BucketWindow::new(Duration::from_secs(1), 4);
        window.record(1_010 * MS, Duration::from_millis(10), true);
        window.record(10 * MS, Duration::from_millis(900), true);

        assert_eq!(window.stats(1_010 * MS).average, Some(Duration::from_millis(10)));
    }

    #[test]
    fn eviction_clears_only_stale_buckets() {
        let window = BucketWindow::new(Duration::from_secs(1), 10);
        window.record(0, Duration::from_millis(5), true);
        window.record(MS, Duration::from_millis(5), true);
        window.record(1_800 * MS, Duration::from_millis(5), true);

        assert_eq!(window.evict_expired(1_900 * MS), 2);
        assert_eq!(window.evict_expired(1_900 * MS), 0);
        assert_eq!(window.stats(1_900 * MS).samples, 1);
    }
}
