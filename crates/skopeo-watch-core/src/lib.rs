//! skopeo-watch-core: supervision of skopeo with live progress and metrics.
//!
//! - `progress/` - stderr line parser, blob registry and percentage estimate
//! - `process` - child process coordinator with deadline enforcement
//! - `tracker/` - scoped per-operation metrics with heartbeat
//! - `metrics/` - explicit Prometheus registry, internal events and exporter
//! - `client` - skopeo operations (copy, inspect, delete, ...) on top of the above
//! - `config/` - YAML configuration with environment variable interpolation
//! - `signal` - Signal handling for graceful shutdown
//! - `error` - Error types

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod process;
pub mod progress;
pub mod signal;
pub mod tracing;
pub mod tracker;
pub mod types;

pub use client::{ClientConfig, ImageExists, LookupFailure, OperationOptions, SkopeoClient};
pub use config::{Config, MetricsConfig, SkopeoConfig, TrackerConfig};
pub use error::{ClientError, ConfigError, MetricsError, ProcessError};
pub use metrics::{MetricSample, MetricsServer, TransferMetrics};
pub use process::{FailureKind, ProcessCoordinator, TransferCommand, TransferOutput};
pub use progress::{
    BlobDescriptor, BlobKind, BlobRegistry, BlobStatus, ProgressParser, ProgressSnapshot,
    ProgressStep, ProgressUpdate,
};
pub use signal::shutdown_signal;
pub use self::tracing::init_tracing;
pub use tracker::{OperationOutcome, OperationTracker, TrackerHandle};
pub use types::OperationKind;
