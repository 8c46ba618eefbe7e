//! Runtime-settable engine parameters.
//!
//! Every knob of the engine lives here rather than in constants, so a
//! configuration source can hot-swap it through
//! [`LoadBalancer::update_config`](crate::engine::LoadBalancer::update_config).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BalancerError, Result};
use crate::load_balancer::selector::{Strategy, MAX_CHOICES};

/// Which sliding-window realisation backs each host's latency tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerKind {
    /// Time-indexed buckets; accurate wall-clock expiry in bounded memory.
    #[default]
    Buckets,
    /// The last `ring_capacity` samples; expiry is also checked per sample.
    Ring,
    /// Exponentially weighted moving average with an idle cut-off.
    Ewma,
}

/// What a host without samples in the window is assumed to cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDataPolicy {
    /// The mean latency of the hosts that do have data, recomputed on every
    /// rebuild.
    #[default]
    FleetAverage,
    /// A fixed latency in milliseconds.
    FixedMs(u64),
}

/// Tunables of the selection engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BalancerConfig {
    /// Strategy used when the engine is created.
    pub strategy: Strategy,
    /// Length of the trailing latency window.
    pub window_ms: u64,
    /// Window realisation.
    pub tracker: TrackerKind,
    /// Number of buckets per window for [`TrackerKind::Buckets`].
    pub bucket_count: usize,
    /// Samples retained by [`TrackerKind::Ring`].
    pub ring_capacity: usize,
    /// Weight of the newest sample for [`TrackerKind::Ewma`].
    pub ewma_alpha: f64,
    /// Jump straight to latency spikes and decay back slowly.
    pub ewma_peak: bool,
    /// Silence after which an EWMA stops reporting. Defaults to the window.
    pub ewma_idle_ms: Option<u64>,
    /// Exponent applied to the latency ratio; higher favours the fastest host
    /// more aggressively.
    pub sensitivity: f64,
    /// Weight floor.
    pub min_weight: f64,
    /// Weight ceiling.
    pub max_weight: f64,
    /// Exponent applied to the success ratio when scaling weights down.
    pub failure_penalty: f64,
    /// Neutral default for hosts without data, written `fleet_average` or
    /// `{ fixed_ms: n }`.
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub no_data: NoDataPolicy,
    /// Cadence of the periodic snapshot rebuild.
    pub rebuild_interval_ms: u64,
    /// Rebuild after this many reported samples; `0` disables the trigger.
    pub rebuild_every_samples: u64,
    /// Cadence of the background cleaner.
    pub cleanup_interval_ms: u64,
    /// Candidates drawn by power-of-two-choices.
    pub p2c_choices: usize,
    /// Virtual nodes per host on the consistent hash ring.
    pub virtual_nodes: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::WeightedRandom,
            window_ms: 30_000,
            tracker: TrackerKind::Buckets,
            bucket_count: 30,
            ring_capacity: 256,
            ewma_alpha: 0.3,
            ewma_peak: false,
            ewma_idle_ms: None,
            sensitivity: 2.0,
            min_weight: 0.1,
            max_weight: 1.0,
            failure_penalty: 1.0,
            no_data: NoDataPolicy::FleetAverage,
            rebuild_interval_ms: 250,
            rebuild_every_samples: 1_000,
            cleanup_interval_ms: 2_000,
            p2c_choices: 2,
            virtual_nodes: 160,
        }
    }
}

impl BalancerConfig {
    /// Trailing window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// EWMA idle cut-off, falling back to the window length.
    pub fn ewma_idle(&self) -> Duration {
        Duration::from_millis(self.ewma_idle_ms.unwrap_or(self.window_ms))
    }

    /// Periodic rebuild cadence.
    pub fn rebuild_interval(&self) -> Duration {
        Duration::from_millis(self.rebuild_interval_ms)
    }

    /// Cleaner cadence.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// True when `other` needs differently shaped tracker storage.
    pub fn window_shape_differs(&self, other: &Self) -> bool {
        self.tracker != other.tracker
            || self.window_ms != other.window_ms
            || match self.tracker {
                TrackerKind::Buckets => self.bucket_count != other.bucket_count,
                TrackerKind::Ring => self.ring_capacity != other.ring_capacity,
                TrackerKind::Ewma => {
                    self.ewma_alpha != other.ewma_alpha
                        || self.ewma_peak != other.ewma_peak
                        || self.ewma_idle() != other.ewma_idle()
                }
            }
    }

    /// Check every field against its accepted range.
    pub fn validate(&self) -> Result<()> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> Result<()> {
            Err(BalancerError::InvalidConfig { field, reason: reason.into() })
        }

        if self.window_ms == 0 {
            return invalid("window_ms", "must be positive");
        }
        if !(1..=4096).contains(&self.bucket_count) {
            return invalid("bucket_count", format!("{} is outside 1..=4096", self.bucket_count));
        }
        if !(1..=65_536).contains(&self.ring_capacity) {
            return invalid("ring_capacity", format!("{} is outside 1..=65536", self.ring_capacity));
        }
        if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
            return invalid("ewma_alpha", format!("{} is outside (0, 1]", self.ewma_alpha));
        }
        if self.ewma_idle_ms == Some(0) {
            return invalid("ewma_idle_ms", "must be positive");
        }
        if !self.sensitivity.is_finite() || self.sensitivity < 1.0 {
            return invalid("sensitivity", format!("{} must be finite and at least 1", self.sensitivity));
        }
        if !self.min_weight.is_finite() || self.min_weight <= 0.0 {
            return invalid("min_weight", format!("{} must be finite and positive", self.min_weight));
        }
        if !self.max_weight.is_finite() || self.max_weight < self.min_weight {
            return invalid("max_weight", format!("{} must be finite and at least min_weight", self.max_weight));
        }
        if !self.failure_penalty.is_finite() || self.failure_penalty < 0.0 {
            return invalid("failure_penalty", format!("{} must be finite and non-negative", self.failure_penalty));
        }
        if self.no_data == NoDataPolicy::FixedMs(0) {
            return invalid("no_data", "fixed_ms must be positive");
        }
        if self.rebuild_interval_ms == 0 {
            return invalid("rebuild_interval_ms", "must be positive");
        }
        if self.cleanup_interval_ms == 0 {
            return invalid("cleanup_interval_ms", "must be positive");
        }
        if !(2..=MAX_CHOICES).contains(&self.p2c_choices) {
            return invalid("p2c_choices", format!("{} is outside 2..={MAX_CHOICES}", self.p2c_choices));
        }
        if !(1..=10_000).contains(&self.virtual_nodes) {
            return invalid("virtual_nodes", format!("{} is outside 1..=10000", self.virtual_nodes));
        }
        Ok(())
    }
}
