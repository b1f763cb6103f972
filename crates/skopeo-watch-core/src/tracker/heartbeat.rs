//! Periodic liveness gauges for a running operation.
//!
//! The heartbeat task republishes elapsed time, speed, progress and staleness
//! on every tick, so a stalled skopeo is visible even when it prints nothing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::emit;
use crate::metrics::TransferMetrics;
use crate::metrics::events::{HeartbeatCleared, HeartbeatPublished};
use crate::progress::{ProgressStep, ProgressUpdate};
use crate::types::OperationKind;

/// Mutable state of one tracked operation.
///
/// Shared between the progress path and the heartbeat task behind a single
/// lock, so a tick never sees a half-applied update.
#[derive(Debug)]
pub struct OperationRecord {
    pub(crate) operation: OperationKind,
    pub(crate) source: String,
    pub(crate) destination: String,
    pub(crate) started_at: Instant,
    pub(crate) step: ProgressStep,
    pub(crate) percentage: f64,
    pub(crate) blobs_seen: usize,
    pub(crate) last_update: Instant,
    pub(crate) blob_count: u64,
    pub(crate) total_bytes: u64,
    /// Step label of the heartbeat series currently exported, if any.
    published_step: Option<ProgressStep>,
    /// Set once the operation has ended; nothing is published after that.
    closed: bool,
}

/// Values published on one heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatSample {
    pub elapsed: Duration,
    pub blobs_per_second: Option<f64>,
    pub progress_percent: f64,
    pub stale: Duration,
}

impl OperationRecord {
    pub(crate) fn new(
        operation: OperationKind,
        source: String,
        destination: String,
        started_at: Instant,
    ) -> Self {
        Self {
            operation,
            source,
            destination,
            started_at,
            step: ProgressStep::Starting,
            percentage: 0.0,
            blobs_seen: 0,
            last_update: started_at,
            blob_count: 0,
            total_bytes: 0,
            published_step: None,
            closed: false,
        }
    }

    /// Fold a progress update in, observed at `now`.
    pub(crate) fn apply(&mut self, update: &ProgressUpdate, now: Instant) {
        self.step = update.step();
        self.percentage = update.percentage;
        self.blobs_seen = self.blobs_seen.max(update.blobs_seen);
        self.last_update = self.last_update.max(now);
    }

    pub(crate) fn add_blob(&mut self, size: Option<u64>) {
        self.blob_count += 1;
        self.total_bytes += size.unwrap_or(0);
    }

    /// Compute the gauges for a tick at `now`.
    pub fn sample(&self, now: Instant) -> HeartbeatSample {
        let elapsed = now.saturating_duration_since(self.started_at);
        let elapsed_secs = elapsed.as_secs_f64();
        let blobs_per_second = (self.blobs_seen > 0 && elapsed_secs > 0.0)
            .then(|| self.blobs_seen as f64 / elapsed_secs);

        HeartbeatSample {
            elapsed,
            blobs_per_second,
            progress_percent: self.percentage,
            stale: now.saturating_duration_since(self.last_update),
        }
    }

    pub fn step(&self) -> ProgressStep {
        self.step
    }

    pub fn percentage(&self) -> f64 {
        self.percentage
    }

    pub fn blobs_seen(&self) -> usize {
        self.blobs_seen
    }

    pub fn blob_count(&self) -> u64 {
        self.blob_count
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn labels(&self, step: ProgressStep) -> [&str; 4] {
        [
            self.operation.as_str(),
            &self.source,
            &self.destination,
            step.as_str(),
        ]
    }

    /// Publish the heartbeat gauges, dropping the series of a previous step.
    pub(crate) fn publish(&mut self, metrics: &TransferMetrics, now: Instant) {
        if self.closed {
            return;
        }
        if let Some(previous) = self.published_step {
            if previous != self.step {
                emit!(metrics, HeartbeatCleared { labels: self.labels(previous) });
            }
        }

        let sample = self.sample(now);
        emit!(
            metrics,
            HeartbeatPublished {
                labels: self.labels(self.step),
                elapsed: sample.elapsed,
                blobs_per_second: sample.blobs_per_second,
                progress_percent: sample.progress_percent,
                stale: sample.stale,
            }
        );
        self.published_step = Some(self.step);
    }

    /// Remove whatever heartbeat series this record exported and stop
    /// publishing.
    pub(crate) fn clear(&mut self, metrics: &TransferMetrics) {
        self.closed = true;
        if let Some(previous) = self.published_step.take() {
            emit!(metrics, HeartbeatCleared { labels: self.labels(previous) });
        }
    }
}

/// Spawn the heartbeat loop. The first tick fires immediately.
pub(crate) fn spawn(
    metrics: Arc<TransferMetrics>,
    record: Arc<Mutex<OperationRecord>>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("Heartbeat stopped");
                    break;
                }

                _ = ticker.tick() => {
                    record.lock().await.publish(&metrics, Instant::now());
                }
            }
        }
    })
}
