//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in an operation's
//! lifecycle. Events implement [`InternalEvent`], which records the
//! corresponding series on the registry passed in and leaves a `trace!` line.

use std::time::Duration;

use tracing::trace;

use super::registry::TransferMetrics;
use crate::types::OperationKind;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Record this event on `metrics`.
    fn emit(self, metrics: &TransferMetrics);
}

/// Final status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Success,
    Error,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Success => "success",
            OperationStatus::Error => "error",
        }
    }
}

/// Event emitted when a tracker opens.
pub struct OperationStarted {
    pub operation: OperationKind,
}

impl InternalEvent for OperationStarted {
    fn emit(self, metrics: &TransferMetrics) {
        trace!(operation = %self.operation, "Operation started");
        metrics
            .active_operations
            .with_label_values(&[self.operation.as_str()])
            .inc();
    }
}

/// Event emitted when a tracker closes, whatever the outcome.
pub struct OperationFinished {
    pub operation: OperationKind,
    pub status: OperationStatus,
    pub duration: Duration,
}

impl InternalEvent for OperationFinished {
    fn emit(self, metrics: &TransferMetrics) {
        trace!(
            operation = %self.operation,
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Operation finished"
        );
        let operation = self.operation.as_str();
        metrics.active_operations.with_label_values(&[operation]).dec();
        metrics
            .operations_total
            .with_label_values(&[operation, self.status.as_str()])
            .inc();
        metrics
            .operation_duration_seconds
            .with_label_values(&[operation])
            .observe(self.duration.as_secs_f64());
    }
}

/// Event emitted when an operation ends in failure.
pub struct OperationFailed<'a> {
    pub operation: OperationKind,
    pub error_type: &'a str,
}

impl InternalEvent for OperationFailed<'_> {
    fn emit(self, metrics: &TransferMetrics) {
        trace!(operation = %self.operation, error_type = self.error_type, "Operation failed");
        metrics
            .operation_errors_total
            .with_label_values(&[self.operation.as_str(), self.error_type])
            .inc();
    }
}

/// Event emitted once per operation with its accumulated blob statistics.
///
/// Sizes are folded in as one observation per blob using the average size,
/// since only the running total is kept while the operation is live.
pub struct BlobsProcessed {
    pub operation: OperationKind,
    pub status: OperationStatus,
    pub count: u64,
    pub total_bytes: u64,
}

impl InternalEvent for BlobsProcessed {
    fn emit(self, metrics: &TransferMetrics) {
        if self.count == 0 {
            return;
        }
        trace!(
            operation = %self.operation,
            count = self.count,
            total_bytes = self.total_bytes,
            "Blobs processed"
        );
        let operation = self.operation.as_str();
        metrics
            .blobs_processed_total
            .with_label_values(&[operation, self.status.as_str()])
            .inc_by(self.count);
        metrics
            .blob_count
            .with_label_values(&[operation])
            .observe(self.count as f64);

        if self.total_bytes > 0 {
            let average = self.total_bytes as f64 / self.count as f64;
            let sizes = metrics.blob_size_bytes.with_label_values(&[operation]);
            for _ in 0..self.count {
                sizes.observe(average);
            }
        }
    }
}

/// Event emitted when an operation starts, with the transport of each endpoint.
pub struct EndpointsUsed<'a> {
    pub operation: OperationKind,
    pub source_type: Option<&'a str>,
    pub destination_type: Option<&'a str>,
}

impl InternalEvent for EndpointsUsed<'_> {
    fn emit(self, metrics: &TransferMetrics) {
        trace!(
            operation = %self.operation,
            source_type = self.source_type,
            destination_type = self.destination_type,
            "Endpoints used"
        );
        let operation = self.operation.as_str();
        if let Some(source_type) = self.source_type {
            metrics
                .source_operations_total
                .with_label_values(&[source_type, operation])
                .inc();
        }
        if let Some(destination_type) = self.destination_type {
            metrics
                .destination_operations_total
                .with_label_values(&[destination_type, operation])
                .inc();
        }
    }
}

/// Event emitted on every heartbeat tick of a running operation.
pub struct HeartbeatPublished<'a> {
    /// `operation`, `source`, `destination`, `step` label values.
    pub labels: [&'a str; 4],
    pub elapsed: Duration,
    pub blobs_per_second: Option<f64>,
    pub progress_percent: f64,
    pub stale: Duration,
}

impl InternalEvent for HeartbeatPublished<'_> {
    fn emit(self, metrics: &TransferMetrics) {
        trace!(
            operation = self.labels[0],
            step = self.labels[3],
            elapsed_secs = self.elapsed.as_secs_f64(),
            stale_secs = self.stale.as_secs_f64(),
            progress = self.progress_percent,
            "Heartbeat"
        );
        metrics
            .active_operation_duration_seconds
            .with_label_values(&self.labels)
            .set(self.elapsed.as_secs_f64());
        if let Some(speed) = self.blobs_per_second {
            metrics
                .operation_speed_blobs_per_second
                .with_label_values(&self.labels)
                .set(speed);
        }
        metrics
            .operation_progress_percent
            .with_label_values(&self.labels)
            .set(self.progress_percent);
        metrics
            .operation_stale_seconds
            .with_label_values(&self.labels)
            .set(self.stale.as_secs_f64());
    }
}

/// Event emitted to drop the heartbeat series of one label tuple.
pub struct HeartbeatCleared<'a> {
    pub labels: [&'a str; 4],
}

impl InternalEvent for HeartbeatCleared<'_> {
    fn emit(self, metrics: &TransferMetrics) {
        trace!(operation = self.labels[0], step = self.labels[3], "Heartbeat series cleared");
        // Series that were never set (e.g. speed before the first blob) are
        // simply absent; removal errors are expected then.
        let _ = metrics
            .active_operation_duration_seconds
            .remove_label_values(&self.labels);
        let _ = metrics
            .operation_speed_blobs_per_second
            .remove_label_values(&self.labels);
        let _ = metrics
            .operation_progress_percent
            .remove_label_values(&self.labels);
        let _ = metrics
            .operation_stale_seconds
            .remove_label_values(&self.labels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit;

    #[test]
    fn test_start_and_finish_balance_active_gauge() {
        let metrics = TransferMetrics::new().unwrap();
        emit!(&metrics, OperationStarted { operation: OperationKind::Copy });
        assert_eq!(metrics.active_operations("copy"), 1);

        emit!(
            &metrics,
            OperationFinished {
                operation: OperationKind::Copy,
                status: OperationStatus::Success,
                duration: Duration::from_millis(1500),
            }
        );
        assert_eq!(metrics.active_operations("copy"), 0);
        assert_eq!(metrics.operations_total("copy", "success"), 1);
    }

    #[test]
    fn test_blobs_processed_uses_average_size() {
        let metrics = TransferMetrics::new().unwrap();
        emit!(
            &metrics,
            BlobsProcessed {
                operation: OperationKind::Copy,
                status: OperationStatus::Success,
                count: 4,
                total_bytes: 4096,
            }
        );

        let count = metrics.find("skopeo_blob_size_bytes_count", &[("operation", "copy")]);
        assert_eq!(count[0].value, 4.0);
        let sum = metrics.find("skopeo_blob_size_bytes_sum", &[("operation", "copy")]);
        assert_eq!(sum[0].value, 4096.0);
        let per_op = metrics.find("skopeo_blob_count_count", &[("operation", "copy")]);
        assert_eq!(per_op[0].value, 1.0);
        let total = metrics.find(
            "skopeo_blobs_processed_total",
            &[("operation", "copy"), ("status", "success")],
        );
        assert_eq!(total[0].value, 4.0);
    }

    #[test]
    fn test_blobs_without_sizes_skip_size_histogram() {
        let metrics = TransferMetrics::new().unwrap();
        emit!(
            &metrics,
            BlobsProcessed {
                operation: OperationKind::Copy,
                status: OperationStatus::Error,
                count: 2,
                total_bytes: 0,
            }
        );
        assert!(metrics.find("skopeo_blob_size_bytes_count", &[]).is_empty());
    }

    #[test]
    fn test_heartbeat_cleared_removes_series() {
        let metrics = TransferMetrics::new().unwrap();
        let labels = ["copy", "docker://a", "dir:/b", "copying_blob"];
        emit!(
            &metrics,
            HeartbeatPublished {
                labels,
                elapsed: Duration::from_secs(20),
                blobs_per_second: None,
                progress_percent: 45.0,
                stale: Duration::from_secs(5),
            }
        );
        assert_eq!(metrics.find("skopeo_operation_stale_seconds", &[]).len(), 1);
        assert!(metrics.find("skopeo_operation_speed_blobs_per_second", &[]).is_empty());

        emit!(&metrics, HeartbeatCleared { labels });
        assert!(metrics.find("skopeo_operation_stale_seconds", &[]).is_empty());
        assert!(metrics.find("skopeo_operation_progress_percent", &[]).is_empty());
        assert!(metrics.find("skopeo_active_operation_duration_seconds", &[]).is_empty());
    }

    #[test]
    fn test_endpoints_used() {
        let metrics = TransferMetrics::new().unwrap();
        emit!(
            &metrics,
            EndpointsUsed {
                operation: OperationKind::Copy,
                source_type: Some("docker"),
                destination_type: Some("dir"),
            }
        );
        let source = metrics.find(
            "skopeo_source_operations_total",
            &[("source_type", "docker"), ("operation", "copy")],
        );
        assert_eq!(source[0].value, 1.0);
        let destination = metrics.find(
            "skopeo_destination_operations_total",
            &[("destination_type", "dir")],
        );
        assert_eq!(destination[0].value, 1.0);
    }
}
