//! The engine facade tying registry, trackers, weights and selectors together.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::clock::{Clock, MonotonicClock};
use crate::config::BalancerConfig;
use crate::domain::host::HostId;
use crate::domain::registry::HostRegistry;
use crate::error::{BalancerError, Result};
use crate::load_balancer::cleaner::{sweep, SweepReport};
use crate::load_balancer::selector::{select, SelectorState, Strategy};
use crate::load_balancer::snapshot::{Snapshot, SnapshotPublisher};

/// Per-host statistics as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostStats {
    /// Mean latency over the window, `None` without data.
    pub avg_latency: Option<Duration>,
    /// Samples in the window.
    pub sample_count: u64,
    /// Failed samples in the window.
    pub failures: u64,
    /// Requests selected but not yet reported.
    pub active_connections: u64,
    /// External health verdict.
    pub healthy: bool,
}

/// Latency-aware host selection engine.
///
/// `select_host` and `report_outcome` only perform atomic operations and
/// pointer loads, so any number of threads can call them concurrently.
/// Topology and configuration changes are serialised among themselves and
/// republish the snapshot immediately.
///
/// Every selection counts as an in-flight request on the chosen host until
/// the matching `report_outcome`; a selection that is never reported keeps
/// that host's connection count one too high.
#[derive(Debug)]
pub struct LoadBalancer {
    registry: HostRegistry,
    publisher: SnapshotPublisher,
    strategy: AtomicU8,
    selector_state: SelectorState,
    clock: Arc<dyn Clock>,
}

impl LoadBalancer {
    /// Create an engine on the monotonic wall clock.
    pub fn new(config: BalancerConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create an engine reading time from `clock`.
    pub fn with_clock(config: BalancerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let strategy = AtomicU8::new(config.strategy.to_u8());
        let engine = Self {
            registry: HostRegistry::new(config),
            publisher: SnapshotPublisher::new(),
            strategy,
            selector_state: SelectorState::default(),
            clock,
        };
        engine.rebuild();
        Ok(engine)
    }

    /// Add a host to the pool. Registering a known host changes nothing.
    pub fn register_host(&self, id: &str) -> Result<()> {
        if self.registry.register(id)? {
            tracing::info!(host = id, "host registered");
            self.rebuild();
        }
        Ok(())
    }

    /// Remove a host. Returns whether it was registered.
    pub fn unregister_host(&self, id: &str) -> bool {
        let removed = self.registry.unregister(id);
        if removed {
            tracing::info!(host = id, "host unregistered");
            self.rebuild();
        }
        removed
    }

    /// Switch the selection strategy for subsequent calls.
    pub fn set_strategy(&self, strategy: Strategy) {
        let previous = Strategy::from_u8(self.strategy.swap(strategy.to_u8(), Ordering::AcqRel));
        if previous != strategy {
            tracing::info!(%previous, %strategy, "selection strategy changed");
        }
    }

    /// The active selection strategy.
    pub fn strategy(&self) -> Strategy {
        Strategy::from_u8(self.strategy.load(Ordering::Acquire))
    }

    /// Pick a host using the thread-local random generator.
    ///
    /// Returns `None` only when the pool is empty.
    pub fn select_host(&self, key: Option<&str>) -> Option<HostId> {
        self.select_host_with(key, &mut rand::thread_rng())
    }

    /// Pick a host, drawing randomness from `rng`.
    pub fn select_host_with<R: Rng + ?Sized>(&self, key: Option<&str>, rng: &mut R) -> Option<HostId> {
        let snapshot = self.publisher.load();
        let choices = self.registry.current_config().p2c_choices;
        let index = select(self.strategy(), &snapshot, &self.selector_state, key, choices, rng)?;

        let host = &snapshot.hosts()[index];
        host.acquire();
        Some(Arc::clone(host.id()))
    }

    /// Close the loop for a request sent to `id`. Unknown ids are ignored;
    /// the host may have been removed while the request was in flight.
    pub fn report_outcome(&self, id: &str, latency: Duration, success: bool) {
        let Some(host) = self.registry.get(id) else {
            tracing::trace!(host = id, "outcome for unknown host ignored");
            return;
        };

        host.record(self.clock.now(), latency, success);
        host.release();

        if self.publisher.note_sample(self.registry.current_config().rebuild_every_samples) {
            self.rebuild();
        }
    }

    /// Windowed statistics of one host.
    pub fn get_stats(&self, id: &str) -> Result<HostStats> {
        let host = self.registry.get(id).ok_or_else(|| BalancerError::UnknownHost(id.to_string()))?;
        let stats = host.stats(self.clock.now());
        Ok(HostStats {
            avg_latency: stats.average,
            sample_count: stats.samples,
            failures: stats.failures,
            active_connections: host.active_connections(),
            healthy: host.is_healthy(),
        })
    }

    /// Ids of all registered hosts.
    pub fn list_hosts(&self) -> BTreeSet<String> {
        self.registry.list()
    }

    /// Mark a host (un)healthy without removing it from the pool.
    pub fn set_healthy(&self, id: &str, healthy: bool) -> Result<()> {
        let host = self.registry.get(id).ok_or_else(|| BalancerError::UnknownHost(id.to_string()))?;
        if host.set_healthy(healthy) {
            if healthy {
                tracing::info!(host = id, "host marked healthy");
            } else {
                tracing::warn!(host = id, "host marked unhealthy");
            }
            self.rebuild();
        }
        Ok(())
    }

    /// Apply a new configuration.
    ///
    /// Changing the window shape resets every host's latency history;
    /// changing the virtual node count rebuilds the hash ring.
    pub fn update_config(&self, config: BalancerConfig) -> Result<()> {
        config.validate()?;
        let strategy = config.strategy;
        let previous = self.registry.reconfigure(config);
        if previous.strategy != strategy {
            self.set_strategy(strategy);
        }
        tracing::info!("configuration updated");
        self.rebuild();
        Ok(())
    }

    /// The configuration in effect.
    pub fn config(&self) -> Arc<BalancerConfig> {
        self.registry.config()
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.publisher.load_full()
    }

    /// Recompute weights and publish a new snapshot now. Returns `false` if
    /// the work was handed to a rebuild already in progress.
    pub fn rebuild(&self) -> bool {
        self.publisher.rebuild_with(self.clock.now(), |generation| {
            let config = self.registry.current_config();
            Snapshot::build(self.registry.snapshot(), &config, self.clock.now(), generation)
        })
    }

    /// Rebuild if the periodic interval has elapsed since the last rebuild.
    pub fn refresh(&self) -> bool {
        let interval = self.registry.current_config().rebuild_interval();
        self.publisher.is_due(self.clock.now(), interval) && self.rebuild()
    }

    /// Run one cleaner pass over every host.
    pub fn evict_expired(&self) -> SweepReport {
        let report = sweep(&self.registry.snapshot(), self.clock.now());
        if report.evicted > 0 {
            tracing::debug!(hosts = report.hosts, evicted = report.evicted, "expired samples evicted");
        }
        report
    }

    /// The engine's time source.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
