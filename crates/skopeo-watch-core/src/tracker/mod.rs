//! Scoped per-operation metrics tracking.
//!
//! An [`OperationTracker`] covers exactly one operation. It is opened with
//! [`OperationTracker::start`] and closed by [`OperationTracker::run`], which
//! awaits the operation and then records its outcome. If the tracker is
//! dropped before that (the caller's future was cancelled, or a panic
//! unwound through it), `Drop` closes it with the `cancelled` error type, so
//! the active gauge always returns to where it was.

pub mod heartbeat;

pub use heartbeat::{HeartbeatSample, OperationRecord};

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::emit;
use crate::metrics::events::{
    BlobsProcessed, EndpointsUsed, OperationFailed, OperationFinished, OperationStarted,
};
use crate::metrics::{OperationStatus, TransferMetrics, UNKNOWN_LABEL, sanitize_label, transport_type};
use crate::progress::ProgressUpdate;
use crate::types::OperationKind;

/// Bounded wait for the heartbeat task to stop after cancellation.
const HEARTBEAT_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Error type recorded when an `Err` carries no classification of its own.
pub const GENERIC_ERROR_TYPE: &str = "error";

/// Error type recorded when a tracker is dropped before finishing.
pub const CANCELLED_ERROR_TYPE: &str = "cancelled";

/// How a tracked value reports failure.
///
/// Implemented by both the `Ok` and `Err` side of a tracked result: an `Ok`
/// value may still describe a failed operation (a non-zero exit, for
/// example).
pub trait OperationOutcome {
    /// `Some(kind)` when this value represents a failure.
    fn error_type(&self) -> Option<&'static str>;
}

impl OperationOutcome for Infallible {
    fn error_type(&self) -> Option<&'static str> {
        match *self {}
    }
}

impl OperationOutcome for () {
    fn error_type(&self) -> Option<&'static str> {
        None
    }
}

/// Cloneable handle for feeding progress into a running tracker.
#[derive(Clone)]
pub struct TrackerHandle {
    metrics: Arc<TransferMetrics>,
    record: Arc<Mutex<OperationRecord>>,
}

impl TrackerHandle {
    /// Fold a progress update into the operation record and republish the
    /// heartbeat gauges, so staleness drops back to zero right away.
    pub async fn record_progress(&self, update: &ProgressUpdate) {
        let now = Instant::now();
        let mut record = self.record.lock().await;
        record.apply(update, now);
        record.publish(&self.metrics, now);
    }

    /// Account for one processed blob.
    pub async fn add_blob(&self, size: Option<u64>) {
        self.record.lock().await.add_blob(size);
    }
}

struct TrackerInner {
    metrics: Arc<TransferMetrics>,
    operation: OperationKind,
    record: Arc<Mutex<OperationRecord>>,
    started_at: Instant,
    shutdown: CancellationToken,
    heartbeat: JoinHandle<()>,
}

/// Tracks one operation from start to outcome.
pub struct OperationTracker {
    handle: TrackerHandle,
    started_wall: DateTime<Utc>,
    inner: Option<TrackerInner>,
}

impl OperationTracker {
    /// Open a tracker and start its heartbeat.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        metrics: Arc<TransferMetrics>,
        operation: OperationKind,
        source: Option<&str>,
        destination: Option<&str>,
        config: &TrackerConfig,
    ) -> Self {
        let max_len = config.max_label_length;
        let source_label = source.map_or_else(
            || UNKNOWN_LABEL.to_string(),
            |s| sanitize_label(s, max_len),
        );
        let destination_label = destination.map_or_else(
            || UNKNOWN_LABEL.to_string(),
            |d| sanitize_label(d, max_len),
        );

        let started_at = Instant::now();
        let started_wall = Utc::now();

        emit!(&metrics, OperationStarted { operation });
        emit!(
            &metrics,
            EndpointsUsed {
                operation,
                source_type: source.map(transport_type),
                destination_type: destination.map(transport_type),
            }
        );

        info!(
            operation = %operation,
            source = %source_label,
            destination = %destination_label,
            started_at = %started_wall.to_rfc3339(),
            "Operation started"
        );

        let record = Arc::new(Mutex::new(OperationRecord::new(
            operation,
            source_label,
            destination_label,
            started_at,
        )));
        let shutdown = CancellationToken::new();
        let heartbeat = heartbeat::spawn(
            metrics.clone(),
            record.clone(),
            config.heartbeat_interval(),
            shutdown.clone(),
        );

        Self {
            handle: TrackerHandle {
                metrics: metrics.clone(),
                record: record.clone(),
            },
            started_wall,
            inner: Some(TrackerInner {
                metrics,
                operation,
                record,
                started_at,
                shutdown,
                heartbeat,
            }),
        }
    }

    /// A handle usable while [`run`](Self::run) owns the tracker.
    pub fn handle(&self) -> TrackerHandle {
        self.handle.clone()
    }

    /// Wall-clock start time.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_wall
    }

    pub async fn record_progress(&self, update: &ProgressUpdate) {
        self.handle.record_progress(update).await;
    }

    pub async fn add_blob(&self, size: Option<u64>) {
        self.handle.add_blob(size).await;
    }

    /// Await `operation`, record its outcome and return its result unchanged.
    pub async fn run<F, T, E>(mut self, operation: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        T: OperationOutcome,
        E: OperationOutcome,
    {
        let result = operation.await;
        let error_type = match &result {
            Ok(value) => value.error_type(),
            Err(err) => Some(err.error_type().unwrap_or(GENERIC_ERROR_TYPE)),
        };

        if let Some(inner) = self.inner.take() {
            inner.finish(error_type).await;
        }
        result
    }
}

impl Drop for OperationTracker {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.finish_on_drop();
        }
    }
}

impl TrackerInner {
    async fn finish(mut self, error_type: Option<&str>) {
        self.shutdown.cancel();
        if tokio::time::timeout(HEARTBEAT_JOIN_TIMEOUT, &mut self.heartbeat)
            .await
            .is_err()
        {
            warn!(operation = %self.operation, "Heartbeat did not stop in time, aborting");
            self.heartbeat.abort();
        }

        let record = self.record.clone();
        let mut guard = record.lock().await;
        self.record_end(Some(&mut *guard), error_type);
    }

    fn finish_on_drop(self) {
        self.shutdown.cancel();
        self.heartbeat.abort();

        let record = self.record.clone();
        let mut guard = lock_without_runtime(&record);
        if guard.is_none() {
            warn!(operation = %self.operation, "Operation record busy at drop, skipping blob statistics");
        }
        self.record_end(guard.as_deref_mut(), Some(CANCELLED_ERROR_TYPE));
    }

    fn record_end(&self, record: Option<&mut OperationRecord>, error_type: Option<&str>) {
        let metrics = self.metrics.as_ref();
        let operation = self.operation;
        let duration = self.started_at.elapsed();
        let status = if error_type.is_some() {
            OperationStatus::Error
        } else {
            OperationStatus::Success
        };

        emit!(metrics, OperationFinished { operation, status, duration });

        if let Some(record) = record {
            emit!(
                metrics,
                BlobsProcessed {
                    operation,
                    status,
                    count: record.blob_count,
                    total_bytes: record.total_bytes,
                }
            );
            record.clear(metrics);
        }

        match error_type {
            Some(error_type) => {
                emit!(metrics, OperationFailed { operation, error_type });
                warn!(
                    operation = %operation,
                    error_type,
                    duration_ms = duration.as_millis(),
                    "Operation failed"
                );
            }
            None => info!(
                operation = %operation,
                duration_ms = duration.as_millis(),
                "Operation completed"
            ),
        }
    }
}

/// Take the record lock from a synchronous context.
///
/// The heartbeat holds the lock only for a single publish, without awaiting,
/// so a short spin is enough once its task has been aborted.
fn lock_without_runtime(record: &Mutex<OperationRecord>) -> Option<MutexGuard<'_, OperationRecord>> {
    for _ in 0..1000 {
        if let Ok(guard) = record.try_lock() {
            return Some(guard);
        }
        std::thread::yield_now();
    }
    debug!("Gave up waiting for operation record lock");
    None
}
