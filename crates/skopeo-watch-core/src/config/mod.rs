//! Configuration for skopeo-watch.
//!
//! Loaded from an optional YAML file (with environment variable expansion)
//! and then overridden by command-line flags in the binary.

mod vars;

pub use vars::interpolate;

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default interval between heartbeat ticks.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Default maximum length of label values derived from source/destination.
pub const DEFAULT_MAX_LABEL_LENGTH: usize = 64;

/// How to invoke the external skopeo binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SkopeoConfig {
    /// Path to the skopeo executable (default: "skopeo", resolved via PATH).
    #[serde(default = "default_skopeo_path")]
    pub path: String,
    /// Deadline applied to every operation when the caller gives none.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for SkopeoConfig {
    fn default() -> Self {
        Self {
            path: default_skopeo_path(),
            timeout_secs: None,
        }
    }
}

impl SkopeoConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn default_skopeo_path() -> String {
    "skopeo".to_string()
}

/// Operation tracker settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TrackerConfig {
    /// Seconds between heartbeat ticks (default: 10).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Maximum characters kept from source/destination label values.
    #[serde(default = "default_max_label_length")]
    pub max_label_length: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            max_label_length: default_max_label_length(),
        }
    }
}

impl TrackerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

fn default_heartbeat_interval() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

fn default_max_label_length() -> usize {
    DEFAULT_MAX_LABEL_LENGTH
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether operations are tracked at all (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Address for the metrics HTTP server (default: "127.0.0.1:8000").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

impl MetricsConfig {
    /// Parse the configured address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.address
            .parse()
            .map_err(|source| ConfigError::InvalidAddress {
                address: self.address.clone(),
                source,
            })
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "127.0.0.1:8000".to_string()
}

/// Main configuration for skopeo-watch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub skopeo: SkopeoConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let expanded = interpolate(contents)?;

        // An empty document means "all defaults".
        let config: Config = if expanded.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&expanded).map_err(|source| ConfigError::YamlParse { source })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.skopeo.path.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "skopeo.path".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.tracker.heartbeat_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tracker.heartbeat_interval_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.tracker.max_label_length == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tracker.max_label_length".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        self.metrics.socket_addr()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.skopeo.path, "skopeo");
        assert_eq!(config.skopeo.timeout(), None);
        assert_eq!(config.tracker.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(config.tracker.max_label_length, 64);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.address, "127.0.0.1:8000");
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
skopeo:
  path: /opt/skopeo/bin/skopeo
  timeout_secs: 600
tracker:
  heartbeat_interval_secs: 5
  max_label_length: 32
metrics:
  enabled: false
  address: "0.0.0.0:9100"
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.skopeo.path, "/opt/skopeo/bin/skopeo");
        assert_eq!(config.skopeo.timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.tracker.heartbeat_interval_secs, 5);
        assert_eq!(config.tracker.max_label_length, 32);
        assert!(!config.metrics.enabled);
        assert_eq!(
            config.metrics.socket_addr().unwrap(),
            "0.0.0.0:9100".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_partial_sections_use_defaults() {
        let config = Config::parse("tracker:\n  heartbeat_interval_secs: 2\n").unwrap();
        assert_eq!(config.tracker.heartbeat_interval_secs, 2);
        assert_eq!(config.tracker.max_label_length, DEFAULT_MAX_LABEL_LENGTH);
        assert_eq!(config.skopeo, SkopeoConfig::default());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = Config::parse("skopeo:\n  binary: skopeo\n").unwrap_err();
        assert!(matches!(err, ConfigError::YamlParse { .. }));
    }

    #[test]
    fn test_zero_heartbeat_rejected() {
        let err = Config::parse("tracker:\n  heartbeat_interval_secs: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_bad_address_rejected() {
        let err = Config::parse("metrics:\n  address: not-an-address\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress { .. }));
    }

    #[test]
    fn test_env_expansion() {
        // SAFETY: variable name is unique to this test
        unsafe { std::env::set_var("SKOPEO_WATCH_CONFIG_TEST_PATH", "/custom/skopeo") };
        let config = Config::parse("skopeo:\n  path: ${SKOPEO_WATCH_CONFIG_TEST_PATH}\n").unwrap();
        assert_eq!(config.skopeo.path, "/custom/skopeo");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skopeo-watch.yaml");
        std::fs::write(&path, "skopeo:\n  timeout_secs: 30\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.skopeo.timeout_secs, Some(30));

        let missing = Config::from_file(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(missing, ConfigError::ReadFile { .. }));
    }
}
