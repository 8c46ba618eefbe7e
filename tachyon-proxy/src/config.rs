//! YAML configuration of the proxy process.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tachyon_core::BalancerConfig;

use crate::error::{ProxyError, Result};

/// Active TCP health probing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthCheckConfig {
    /// Probe every backend this often.
    pub interval_ms: u64,
    /// Give up on a probe after this long.
    pub timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self { interval_ms: 5_000, timeout_ms: 1_500 }
    }
}

impl HealthCheckConfig {
    /// Probe cadence.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Probe timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Top-level proxy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// Address to accept client connections on.
    pub listen: SocketAddr,
    /// Backend `host:port` addresses registered at startup.
    pub backends: Vec<String>,
    /// Default log filter, overridden by `RUST_LOG`.
    pub log_level: String,
    /// Timeout for connecting to a selected backend.
    pub connect_timeout_ms: u64,
    /// Active health probing.
    pub health_check: HealthCheckConfig,
    /// Selection engine settings.
    pub balancer: BalancerConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            backends: Vec::new(),
            log_level: "info".to_string(),
            connect_timeout_ms: 3_000,
            health_check: HealthCheckConfig::default(),
            balancer: BalancerConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Read and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ProxyError::ConfigFile { path: path.to_path_buf(), source })?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a configuration document.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value, including the balancer section.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("health_check.interval_ms", self.health_check.interval_ms),
            ("health_check.timeout_ms", self.health_check.timeout_ms),
        ];
        if let Some((field, _)) = durations.into_iter().find(|(_, millis)| *millis == 0) {
            return Err(ProxyError::InvalidConfig { field, reason: "must be at least 1 ms".to_string() });
        }
        self.balancer.validate()?;
        Ok(())
    }

    /// Backend connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use tachyon_core::{BalancerError, Strategy};

    use super::*;

    #[test]
    fn full_document() {
        let config = ProxyConfig::from_yaml(
            r#"
listen: 127.0.0.1:9000
backends: ["10.0.0.1:80", "10.0.0.2:80"]
log_level: debug
health_check:
  interval_ms: 1000
balancer:
  strategy: power_of_two_choices
  window_ms: 10000
  no_data:
    fixed_ms: 100
"#,
        )
        .unwrap();

        assert_eq!(config.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.health_check.interval(), Duration::from_secs(1));
        assert_eq!(config.health_check.timeout_ms, 1_500);
        assert_eq!(config.balancer.strategy, Strategy::PowerOfTwoChoices);
        assert_eq!(config.balancer.no_data, tachyon_core::NoDataPolicy::FixedMs(100));
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn empty_document_is_all_defaults() {
        assert_eq!(ProxyConfig::from_yaml("{}").unwrap(), ProxyConfig::default());
    }

    #[test]
    fn invalid_balancer_settings_are_rejected() {
        let error = ProxyConfig::from_yaml("balancer:\n  sensitivity: 0.2\n").unwrap_err();
        assert!(matches!(
            error,
            ProxyError::Balancer(BalancerError::InvalidConfig { field: "sensitivity", .. })
        ));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let cases = [
            ("connect_timeout_ms", "connect_timeout_ms: 0\n"),
            ("health_check.interval_ms", "health_check:\n  interval_ms: 0\n"),
            ("health_check.timeout_ms", "health_check:\n  timeout_ms: 0\n"),
        ];
        for (expected, document) in cases {
            let error = ProxyConfig::from_yaml(document).unwrap_err();
            assert!(
                matches!(error, ProxyError::InvalidConfig { field, .. } if field == expected),
                "{expected}: {error}"
            );
        }

        assert!(ProxyConfig::default().validate().is_ok());
    }

    #[test]
    fn missing_file_names_the_path() {
        let error = ProxyConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(error.to_string().contains("/definitely/not/here.yaml"), "{error}");
    }
}
