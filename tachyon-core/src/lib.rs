//! Tachyon Core functionality.
//!
//! A latency-aware host selection engine. Callers register hosts, ask
//! [`LoadBalancer::select_host`] where to send each request and report the
//! observed latency back with [`LoadBalancer::report_outcome`]. Faster hosts
//! receive proportionally more traffic; slow, failing or unhealthy hosts
//! receive less without ever being starved completely.
//!
//! ```
//! use std::time::Duration;
//! use tachyon_core::{BalancerConfig, LoadBalancer};
//!
//! let engine = LoadBalancer::new(BalancerConfig::default()).unwrap();
//! engine.register_host("10.0.0.1:8080").unwrap();
//!
//! let host = engine.select_host(None).unwrap();
//! engine.report_outcome(&host, Duration::from_millis(12), true);
//! assert_eq!(engine.get_stats(&host).unwrap().sample_count, 1);
//! ```

/// Hosts and the registry that owns them.
pub mod domain {
    pub mod host;
    pub mod registry;
}

/// Latency tracking, weighting and selection.
pub mod load_balancer {
    pub mod buckets;
    pub mod cleaner;
    pub mod ewma;
    pub mod hash_ring;
    pub mod ring_buffer;
    pub mod selector;
    pub mod snapshot;
    pub mod tracker;
    pub mod weights;
}

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod tasks;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{BalancerConfig, NoDataPolicy, TrackerKind};
pub use domain::host::HostId;
pub use engine::{HostStats, LoadBalancer};
pub use error::{BalancerError, Result};
pub use load_balancer::selector::Strategy;
