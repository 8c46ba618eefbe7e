//! The authoritative set of hosts.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};
use parking_lot::Mutex;

use crate::config::BalancerConfig;
use crate::domain::host::{Host, HostId, SharedHost};
use crate::error::{BalancerError, Result};
use crate::load_balancer::hash_ring::HashRing;
use crate::load_balancer::tracker::LatencyTracker;

/// An immutable view of the registered hosts.
///
/// Hosts are kept in registration order; the index and the hash ring are
/// derived from that order and rebuilt with it.
#[derive(Debug, Default)]
pub struct Topology {
    hosts: Vec<SharedHost>,
    index: HashMap<HostId, usize>,
    ring: HashRing,
    generation: u64,
}

impl Topology {
    fn new(hosts: Vec<SharedHost>, virtual_nodes: usize, generation: u64) -> Self {
        let index = hosts.iter().enumerate().map(|(position, host)| (Arc::clone(host.id()), position)).collect();
        let ring = HashRing::build(&hosts, virtual_nodes);
        Self { hosts, index, ring, generation }
    }

    /// Hosts in registration order.
    pub fn hosts(&self) -> &[SharedHost] {
        &self.hosts
    }

    /// Look a host up by id.
    pub fn get(&self, id: &str) -> Option<&SharedHost> {
        self.index.get(id).map(|position| &self.hosts[*position])
    }

    /// Consistent hash ring over these hosts.
    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    /// Bumped on every membership change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of hosts.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// True when no host is registered.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// A registry whose readers never lock.
///
/// Uses `ArcSwap` so lookups on the hot path are a pointer load, while
/// mutations copy the topology under a mutex that nothing on the request path
/// ever takes. The mutex also serialises configuration changes that reshape
/// every host, so no host is created with a stale window shape.
#[derive(Debug)]
pub struct HostRegistry {
    topology: ArcSwap<Topology>,
    config: ArcSwap<BalancerConfig>,
    write_lock: Mutex<()>,
}

impl HostRegistry {
    /// Create an empty registry building hosts according to `config`.
    pub fn new(config: BalancerConfig) -> Self {
        Self {
            topology: ArcSwap::from_pointee(Topology::new(Vec::new(), config.virtual_nodes, 0)),
            config: ArcSwap::from_pointee(config),
            write_lock: Mutex::new(()),
        }
    }

    /// Configuration hosts are currently built with.
    pub fn config(&self) -> Arc<BalancerConfig> {
        self.config.load_full()
    }

    /// Borrow the configuration for a short read on the request path.
    pub(crate) fn current_config(&self) -> Guard<Arc<BalancerConfig>> {
        self.config.load()
    }

    /// Insert a host. Returns `false` if it was already present.
    pub fn register(&self, id: &str) -> Result<bool> {
        if id.trim().is_empty() {
            return Err(BalancerError::InvalidHost);
        }

        let _guard = self.write_lock.lock();
        let current = self.topology.load();
        if current.index.contains_key(id) {
            return Ok(false);
        }

        let config = self.config.load();
        let mut hosts = current.hosts.clone();
        hosts.push(Arc::new(Host::new(id.into(), LatencyTracker::from_config(&config))));
        self.topology.store(Arc::new(Topology::new(hosts, config.virtual_nodes, current.generation + 1)));
        Ok(true)
    }

    /// Remove a host. Returns whether it existed.
    pub fn unregister(&self, id: &str) -> bool {
        let _guard = self.write_lock.lock();
        let current = self.topology.load();
        let Some(position) = current.index.get(id).copied() else {
            return false;
        };

        let mut hosts = current.hosts.clone();
        hosts.remove(position);
        let virtual_nodes = self.config.load().virtual_nodes;
        self.topology.store(Arc::new(Topology::new(hosts, virtual_nodes, current.generation + 1)));
        true
    }

    /// Swap in a new configuration, reshaping trackers and the hash ring
    /// where needed. Returns the previous configuration.
    pub fn reconfigure(&self, config: BalancerConfig) -> Arc<BalancerConfig> {
        let _guard = self.write_lock.lock();
        let previous = self.config.swap(Arc::new(config));
        let config = self.config.load();
        let current = self.topology.load();

        if previous.window_shape_differs(&config) {
            for host in current.hosts.iter() {
                host.replace_tracker(LatencyTracker::from_config(&config));
            }
            tracing::info!(hosts = current.len(), "latency windows reshaped, history reset");
        }
        if previous.virtual_nodes != config.virtual_nodes {
            let hosts = current.hosts.clone();
            self.topology.store(Arc::new(Topology::new(hosts, config.virtual_nodes, current.generation + 1)));
        }

        previous
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.topology.load().index.contains_key(id)
    }

    /// Look a host up without locking.
    pub fn get(&self, id: &str) -> Option<SharedHost> {
        self.topology.load().get(id).cloned()
    }

    /// All registered ids.
    pub fn list(&self) -> BTreeSet<String> {
        self.topology.load().hosts.iter().map(|host| host.id().to_string()).collect()
    }

    /// The current topology.
    pub fn snapshot(&self) -> Arc<Topology> {
        self.topology.load_full()
    }
}
