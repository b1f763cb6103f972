//! Metrics and observability infrastructure.
//!
//! - `registry`: the explicit [`TransferMetrics`] registry
//! - `events`: Internal event types and the `InternalEvent` trait
//! - `labels`: label sanitizing and transport classification
//! - `server`: Prometheus HTTP exporter

pub mod events;
pub mod labels;
pub mod registry;
pub mod server;

pub use events::{InternalEvent, OperationStatus};
pub use labels::{UNKNOWN_LABEL, sanitize_label, transport_type};
pub use registry::{MetricSample, TransferMetrics};
pub use server::MetricsServer;

/// Macro for emitting metric events against a registry.
///
/// ```ignore
/// use skopeo_watch_core::metrics::events::OperationStarted;
///
/// emit!(&metrics, OperationStarted { operation: OperationKind::Copy });
/// ```
#[macro_export]
macro_rules! emit {
    ($metrics:expr, $event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event, $metrics)
    };
}

pub use emit;
