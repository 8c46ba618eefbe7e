//! Tachyon Proxy
//!
//! A layer 4 TCP proxy around the Tachyon selection engine. It owns the
//! collaborators the engine leaves to its host: the transport that measures
//! real latency, the active health prober and the configuration file.

pub mod config;
pub mod error;
pub mod server;

/// Active health checking of registered hosts.
pub mod health_check {
    pub mod prober;

    pub use prober::spawn_health_checker;
}

pub use config::{HealthCheckConfig, ProxyConfig};
pub use error::{ProxyError, Result};
