//! Expiry of samples that fell out of the window.
//!
//! Reads already ignore expired samples, so the cleaner is not needed for
//! correctness of busy hosts. It bounds what idle hosts keep around and lets
//! their statistics drop to "no data" even if nobody reads them.

use crate::clock::Nanos;
use crate::domain::registry::Topology;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Hosts visited.
    pub hosts: usize,
    /// Samples dropped across all hosts.
    pub evicted: u64,
}

/// Evict expired samples from every host of `topology`, using the same
/// atomic operations as the request path.
pub fn sweep(topology: &Topology, now: Nanos) -> SweepReport {
    let evicted = topology.hosts().iter().map(|host| host.evict_expired(now)).sum();
    SweepReport { hosts: topology.len(), evicted }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::BalancerConfig;
    use crate::domain::registry::HostRegistry;

    #[test]
    fn sweep_drops_only_expired_samples() {
        let registry = HostRegistry::new(BalancerConfig { window_ms: 1_000, bucket_count: 10, ..Default::default() });
        registry.register("old").unwrap();
        registry.register("fresh").unwrap();

        let second = Duration::from_secs(1).as_nanos() as Nanos;
        registry.get("old").unwrap().record(second, Duration::from_millis(10), true);
        registry.get("old").unwrap().record(second, Duration::from_millis(10), true);
        registry.get("fresh").unwrap().record(5 * second, Duration::from_millis(10), true);

        let report = sweep(&registry.snapshot(), 5 * second);
        assert_eq!(report, SweepReport { hosts: 2, evicted: 2 });
        assert_eq!(registry.get("fresh").unwrap().stats(5 * second).samples, 1);
        assert_eq!(sweep(&registry.snapshot(), 5 * second).evicted, 0);
    }
}
