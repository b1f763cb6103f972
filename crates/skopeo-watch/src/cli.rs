//! Command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use skopeo_watch_core::{Config, ConfigError};

#[derive(Parser, Debug)]
#[command(version, about = "Run skopeo with live progress and Prometheus metrics")]
pub struct CliArgs {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the skopeo executable
    #[arg(long, global = true, env = "SKOPEO_PATH")]
    pub skopeo_path: Option<String>,

    /// Disable metrics collection
    #[arg(long, global = true)]
    pub no_metrics: bool,

    /// Address for the metrics endpoint
    #[arg(long, global = true)]
    pub metrics_addr: Option<String>,

    /// Serve metrics while the operation runs
    #[arg(long, global = true)]
    pub serve_metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Copy an image between locations
    Copy {
        source: String,
        destination: String,
        #[command(flatten)]
        options: OperationArgs,
    },
    /// Show image metadata
    Inspect {
        image: String,
        /// Pretty-print the output as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        options: OperationArgs,
    },
    /// Delete an image
    Delete {
        image: String,
        #[command(flatten)]
        options: OperationArgs,
    },
    /// Compute the digest of a manifest
    ManifestDigest {
        image: String,
        #[command(flatten)]
        options: OperationArgs,
    },
    /// Check whether an image exists
    ImageExists {
        image: String,
        #[command(flatten)]
        options: OperationArgs,
    },
    /// Serve metrics until interrupted
    Serve,
}

/// Flags shared by every skopeo operation.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct OperationArgs {
    /// Print progress updates
    #[arg(long)]
    pub progress: bool,

    /// Timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl OperationArgs {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

impl CliArgs {
    /// Load the configuration file (if any) and apply flag overrides.
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(path) = &self.skopeo_path {
            config.skopeo.path = path.clone();
        }
        if self.no_metrics {
            config.metrics.enabled = false;
        }
        if let Some(address) = &self.metrics_addr {
            config.metrics.address = address.clone();
        }

        config.validate()?;
        Ok(config)
    }
}
