//! Immutable, atomically published selection views.
//!
//! A [`Snapshot`] is a flat, index-addressed value: position `i` in every
//! array refers to the same host. Selectors read it without locking, and
//! rebuilds replace it wholesale.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, Guard};

use crate::clock::Nanos;
use crate::config::BalancerConfig;
use crate::domain::host::SharedHost;
use crate::domain::registry::Topology;
use crate::load_balancer::hash_ring::HashRing;
use crate::load_balancer::weights::{compute_weights, neutral_latency, HostMetrics, WeightParams};

/// A point-in-time view of hosts and their weights.
#[derive(Debug, Default)]
pub struct Snapshot {
    topology: Arc<Topology>,
    cumulative_weights: Vec<f64>,
    total_weight: f64,
    /// Windowed mean per host, with the neutral default substituted for
    /// hosts without data.
    latencies: Vec<Duration>,
    generation: u64,
}

impl Snapshot {
    /// Compute a snapshot from the live tracker state of `topology`.
    pub fn build(topology: Arc<Topology>, config: &BalancerConfig, now: Nanos, generation: u64) -> Self {
        let metrics: Vec<HostMetrics> = topology
            .hosts()
            .iter()
            .map(|host| {
                let stats = host.stats(now);
                HostMetrics {
                    average: stats.average,
                    samples: stats.samples,
                    failure_ratio: stats.failure_ratio(),
                    healthy: host.is_healthy(),
                }
            })
            .collect();

        let weights = compute_weights(&metrics, &WeightParams::from(config));
        let cumulative_weights: Vec<f64> = weights
            .iter()
            .scan(0.0, |running, weight| {
                *running += weight;
                Some(*running)
            })
            .collect();
        let total_weight = cumulative_weights.last().copied().unwrap_or(0.0);

        let neutral = neutral_latency(&metrics, config.no_data).unwrap_or_default();
        let latencies = metrics.iter().map(|host| host.average.unwrap_or(neutral)).collect();

        Self { topology, cumulative_weights, total_weight, latencies, generation }
    }

    /// Hosts, index-parallel to the weight arrays.
    pub fn hosts(&self) -> &[SharedHost] {
        self.topology.hosts()
    }

    /// Host ids in snapshot order.
    pub fn host_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.hosts().iter().map(|host| &**host.id())
    }

    /// Running sums of the weights; non-decreasing.
    pub fn cumulative_weights(&self) -> &[f64] {
        &self.cumulative_weights
    }

    /// Sum of all weights, equal to the last cumulative entry.
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Weight of the host at `index`.
    pub fn weight(&self, index: usize) -> Option<f64> {
        let upper = *self.cumulative_weights.get(index)?;
        let lower = index.checked_sub(1).map_or(0.0, |previous| self.cumulative_weights[previous]);
        Some(upper - lower)
    }

    /// Latency used to compare hosts, with the neutral default for hosts
    /// without data.
    pub fn effective_latency(&self, index: usize) -> Duration {
        self.latencies.get(index).copied().unwrap_or_default()
    }

    /// Hash ring of the topology this snapshot was built from.
    pub fn ring(&self) -> &HashRing {
        self.topology.ring()
    }

    /// Publication counter.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of hosts.
    pub fn len(&self) -> usize {
        self.cumulative_weights.len()
    }

    /// True when there is nothing to select from.
    pub fn is_empty(&self) -> bool {
        self.cumulative_weights.is_empty()
    }
}

/// Holds the current [`Snapshot`] and serialises its rebuilds.
///
/// Readers load the snapshot pointer and never block. At most one rebuild
/// runs at a time: a request arriving while one is running is folded into a
/// single follow-up pass instead of waiting or queueing.
#[derive(Debug)]
pub struct SnapshotPublisher {
    current: ArcSwap<Snapshot>,
    rebuilding: AtomicBool,
    pending: AtomicBool,
    last_rebuild: AtomicU64,
    samples_since_rebuild: AtomicU64,
    generation: AtomicU64,
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotPublisher {
    /// Start with an empty snapshot.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::default()),
            rebuilding: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            last_rebuild: AtomicU64::new(0),
            samples_since_rebuild: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// Borrow the current snapshot for a short read.
    pub fn load(&self) -> Guard<Arc<Snapshot>> {
        self.current.load()
    }

    /// Own a reference to the current snapshot.
    pub fn load_full(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Rebuild with `build` unless another thread is already rebuilding, in
    /// which case that thread runs one more pass on our behalf.
    ///
    /// `build` receives the generation to stamp and is called once per pass.
    /// Returns whether this call published anything.
    pub fn rebuild_with(&self, now: Nanos, mut build: impl FnMut(u64) -> Snapshot) -> bool {
        self.pending.store(true, Ordering::Release);
        let mut published = false;

        loop {
            if self.rebuilding.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed).is_err() {
                return published;
            }
            while self.pending.swap(false, Ordering::AcqRel) {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                let snapshot = build(generation);
                tracing::debug!(generation, hosts = snapshot.len(), total_weight = snapshot.total_weight(), "snapshot published");
                self.current.store(Arc::new(snapshot));
                self.last_rebuild.fetch_max(now, Ordering::AcqRel);
                self.samples_since_rebuild.store(0, Ordering::Relaxed);
                published = true;
            }
            self.rebuilding.store(false, Ordering::Release);

            // a request may have slipped in between the last swap and the release
            if !self.pending.load(Ordering::Acquire) {
                return published;
            }
        }
    }

    /// Whether the periodic trigger should fire at `now`.
    pub fn is_due(&self, now: Nanos, interval: Duration) -> bool {
        now.saturating_sub(self.last_rebuild.load(Ordering::Acquire)) >= interval.as_nanos() as Nanos
    }

    /// Count a reported sample. Returns true once `threshold` samples have
    /// accumulated since the last rebuild; `0` disables the trigger.
    pub fn note_sample(&self, threshold: u64) -> bool {
        threshold > 0 && self.samples_since_rebuild.fetch_add(1, Ordering::Relaxed) + 1 >= threshold
    }
}
