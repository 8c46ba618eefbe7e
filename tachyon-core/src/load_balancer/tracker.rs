//! Per-host latency tracking.
//!
//! [`LatencyTracker`] is one read/write contract over three window
//! realisations with different precision and memory trade-offs:
//!
//! | variant | memory | read | expiry |
//! |---|---|---|---|
//! | [`BucketWindow`] | O(B) | O(B) | by wall time, at bucket granularity |
//! | [`RingWindow`] | O(K) | O(K) | last K samples, then by timestamp |
//! | [`PeakEwma`] | O(1) | O(1) | whole series dropped after an idle period |
//!
//! Writers never block each other; all variants are updated with atomics only.

use std::time::Duration;

use crate::clock::Nanos;
use crate::config::{BalancerConfig, TrackerKind};
use crate::load_balancer::buckets::BucketWindow;
use crate::load_balancer::ewma::PeakEwma;
use crate::load_balancer::ring_buffer::RingWindow;

/// Samples are capped at ten minutes so accumulated sums cannot overflow.
pub const MAX_SAMPLE_LATENCY: Duration = Duration::from_secs(600);

pub(crate) fn clamp_latency(latency: Duration) -> u64 {
    latency.min(MAX_SAMPLE_LATENCY).as_nanos() as u64
}

/// What a tracker knows about its host right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStats {
    /// Mean latency over the window, `None` when there is no data.
    pub average: Option<Duration>,
    /// Samples contributing to the average.
    pub samples: u64,
    /// How many of those samples were failures.
    pub failures: u64,
}

impl WindowStats {
    pub(crate) fn from_sum(sum_nanos: u128, samples: u64, failures: u64) -> Self {
        if samples == 0 {
            return Self::default();
        }
        let mean = (sum_nanos / u128::from(samples)).min(u128::from(u64::MAX)) as u64;
        Self { average: Some(Duration::from_nanos(mean)), samples, failures: failures.min(samples) }
    }

    /// Fraction of failed samples, 0 without data.
    pub fn failure_ratio(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.failures as f64 / self.samples as f64
        }
    }
}

/// A host's latency window.
#[derive(Debug)]
pub enum LatencyTracker {
    /// Time-indexed buckets.
    Buckets(BucketWindow),
    /// Last K samples.
    Ring(RingWindow),
    /// Moving average.
    Ewma(PeakEwma),
}

impl LatencyTracker {
    /// Build the tracker variant selected by `config`.
    pub fn from_config(config: &BalancerConfig) -> Self {
        match config.tracker {
            TrackerKind::Buckets => Self::Buckets(BucketWindow::new(config.window(), config.bucket_count)),
            TrackerKind::Ring => Self::Ring(RingWindow::new(config.window(), config.ring_capacity)),
            TrackerKind::Ewma => Self::Ewma(PeakEwma::new(config.ewma_alpha, config.ewma_peak, config.ewma_idle())),
        }
    }

    /// Record one outcome observed at `now`.
    pub fn record(&self, now: Nanos, latency: Duration, success: bool) {
        match self {
            Self::Buckets(window) => window.record(now, latency, success),
            Self::Ring(window) => window.record(now, latency, success),
            Self::Ewma(window) => window.record(now, latency, success),
        }
    }

    /// Aggregate over `[now - window, now]`.
    pub fn stats(&self, now: Nanos) -> WindowStats {
        match self {
            Self::Buckets(window) => window.stats(now),
            Self::Ring(window) => window.stats(now),
            Self::Ewma(window) => window.stats(now),
        }
    }

    /// Mean latency over the window, `None` for no data.
    pub fn average(&self, now: Nanos) -> Option<Duration> {
        self.stats(now).average
    }

    /// Drop samples that fell out of the window. Returns how many were dropped.
    pub fn evict_expired(&self, now: Nanos) -> u64 {
        match self {
            Self::Buckets(window) => window.evict_expired(now),
            Self::Ring(window) => window.evict_expired(now),
            Self::Ewma(window) => window.evict_expired(now),
        }
    }
}
