//! Error types for skopeo-watch.
//!
//! Process failures (spawn, timeout, exit status) are not surfaced as `Err`
//! from the coordinator: they become a failed `TransferOutput`. The enums here
//! cover configuration, metrics infrastructure, and the internal process steps
//! the coordinator folds into that output.

use std::path::PathBuf;
use std::time::Duration;

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Metrics address is not a valid socket address.
    #[snafu(display("Invalid metrics address '{address}': {source}"))]
    InvalidAddress {
        address: String,
        source: std::net::AddrParseError,
    },

    /// A configuration value is out of range.
    #[snafu(display("Invalid value for {field}: {message}"))]
    InvalidValue { field: String, message: String },
}

// ============ Metrics Errors ============

/// Errors that can occur while building, rendering or serving metrics.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to create or register a metric family.
    #[snafu(display("Failed to register metric {name}: {source}"))]
    Register {
        name: String,
        source: prometheus::Error,
    },

    /// Failed to encode the registry in text exposition format.
    #[snafu(display("Failed to encode metrics: {source}"))]
    Encode { source: prometheus::Error },

    /// Encoded metrics were not valid UTF-8.
    #[snafu(display("Encoded metrics are not valid UTF-8: {source}"))]
    Utf8 { source: std::string::FromUtf8Error },

    /// Failed to bind the metrics HTTP listener.
    #[snafu(display("Failed to bind metrics server to {address}: {source}"))]
    Bind {
        address: std::net::SocketAddr,
        source: std::io::Error,
    },

    /// The metrics HTTP server stopped with an error.
    #[snafu(display("Metrics server error: {source}"))]
    Serve { source: std::io::Error },
}

// ============ Process Errors ============

/// Failures of a single external process invocation.
///
/// The coordinator converts these into a failed `TransferOutput`; the display
/// text of each variant is what callers see in the captured error output.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProcessError {
    /// The binary could not be started at all.
    #[snafu(display("{source}"))]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// Waiting on the child or draining its output failed.
    #[snafu(display("{source}"))]
    Wait { source: std::io::Error },

    /// The deadline elapsed before the process exited.
    #[snafu(display("Operation timed out"))]
    Timeout { timeout: Duration },

    /// A piped stream was not available on the spawned child.
    #[snafu(display("Child process {stream} was not piped"))]
    MissingPipe { stream: &'static str },
}

// ============ Top-level Errors ============

/// Top-level errors for hosting processes (the CLI).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClientError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },
}

impl From<ConfigError> for ClientError {
    fn from(source: ConfigError) -> Self {
        ClientError::Config { source }
    }
}

impl From<MetricsError> for ClientError {
    fn from(source: MetricsError) -> Self {
        ClientError::Metrics { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_is_fixed() {
        let err = ProcessError::Timeout {
            timeout: Duration::from_secs(3),
        };
        assert_eq!(err.to_string(), "Operation timed out");
    }

    #[test]
    fn test_spawn_message_is_system_text() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory");
        let err = ProcessError::Spawn {
            program: "skopeo".to_string(),
            source: io,
        };
        assert_eq!(err.to_string(), "No such file or directory");
    }
}
