//! Errors raised by the proxy process.

use std::path::PathBuf;
use std::time::Duration;

use tachyon_core::BalancerError;
use thiserror::Error;

/// Anything that can stop the proxy or a single proxied connection.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Socket or file I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The configuration file could not be read.
    #[error("failed to read config file {path:?}: {source}")]
    ConfigFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for [`crate::config::ProxyConfig`].
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// A proxy setting is out of range.
    #[error("invalid config value for {field}: {reason}")]
    InvalidConfig {
        /// Offending key, dotted for nested sections.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The selection engine rejected a host or a setting.
    #[error(transparent)]
    Balancer(#[from] BalancerError),

    /// A backend did not accept the connection in time.
    #[error("connecting to {host} timed out after {timeout:?}")]
    ConnectTimeout {
        /// The backend that was tried.
        host: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

/// Result alias for the proxy crate.
pub type Result<T> = std::result::Result<T, ProxyError>;
