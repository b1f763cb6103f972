//! The metrics registry shared by all operations in a process.
//!
//! [`TransferMetrics`] is constructed explicitly by the host and handed to
//! trackers and the exporter as an `Arc`. There is no global instance.

use std::collections::BTreeMap;

use prometheus::core::Collector;
use prometheus::proto::MetricType;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use snafu::ResultExt;

use crate::error::{EncodeSnafu, MetricsError, RegisterSnafu, Utf8Snafu};

/// Operation duration buckets in seconds, sub-second to five minutes.
pub const DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Blob size buckets in bytes, 1 KiB to 1 GiB.
pub const BLOB_SIZE_BUCKETS: &[f64] = &[
    1024.0,
    10240.0,
    102400.0,
    1048576.0,
    10485760.0,
    104857600.0,
    1073741824.0,
];

/// Blobs-per-operation buckets.
pub const BLOB_COUNT_BUCKETS: &[f64] = &[1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0];

/// Label names for the per-operation heartbeat gauges.
pub const HEARTBEAT_LABELS: &[&str] = &["operation", "source", "destination", "step"];

/// One series value in a registry snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl MetricSample {
    /// Check whether every `(name, value)` pair is present on this sample.
    pub fn has_labels(&self, expected: &[(&str, &str)]) -> bool {
        expected
            .iter()
            .all(|(k, v)| self.labels.get(*k).is_some_and(|actual| actual == v))
    }
}

/// Counters, histograms and gauges describing skopeo operations.
pub struct TransferMetrics {
    registry: Registry,
    pub(crate) operations_total: IntCounterVec,
    pub(crate) operation_errors_total: IntCounterVec,
    pub(crate) operation_duration_seconds: HistogramVec,
    pub(crate) blobs_processed_total: IntCounterVec,
    pub(crate) blob_count: HistogramVec,
    pub(crate) blob_size_bytes: HistogramVec,
    pub(crate) active_operations: IntGaugeVec,
    pub(crate) source_operations_total: IntCounterVec,
    pub(crate) destination_operations_total: IntCounterVec,
    pub(crate) active_operation_duration_seconds: GaugeVec,
    pub(crate) operation_speed_blobs_per_second: GaugeVec,
    pub(crate) operation_progress_percent: GaugeVec,
    pub(crate) operation_stale_seconds: GaugeVec,
}

fn register<M>(
    registry: &Registry,
    name: &str,
    metric: Result<M, prometheus::Error>,
) -> Result<M, MetricsError>
where
    M: Collector + Clone + 'static,
{
    let metric = metric.context(RegisterSnafu { name })?;
    registry
        .register(Box::new(metric.clone()))
        .context(RegisterSnafu { name })?;
    Ok(metric)
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec, MetricsError> {
    register(registry, name, IntCounterVec::new(Opts::new(name, help), labels))
}

fn histogram_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    buckets: &[f64],
) -> Result<HistogramVec, MetricsError> {
    let opts = HistogramOpts::new(name, help).buckets(buckets.to_vec());
    register(registry, name, HistogramVec::new(opts, &["operation"]))
}

fn heartbeat_gauge(registry: &Registry, name: &str, help: &str) -> Result<GaugeVec, MetricsError> {
    register(registry, name, GaugeVec::new(Opts::new(name, help), HEARTBEAT_LABELS))
}

impl TransferMetrics {
    /// Build a registry with every skopeo-watch metric family registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let build_info = register(
            &registry,
            "skopeo_watch_build_info",
            IntGaugeVec::new(
                Opts::new("skopeo_watch_build_info", "Build information for skopeo-watch"),
                &["version"],
            ),
        )?;
        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .set(1);

        Ok(Self {
            operations_total: counter_vec(
                &registry,
                "skopeo_operations_total",
                "Total skopeo operations by outcome",
                &["operation", "status"],
            )?,
            operation_errors_total: counter_vec(
                &registry,
                "skopeo_operation_errors_total",
                "Total failed skopeo operations by error type",
                &["operation", "error_type"],
            )?,
            operation_duration_seconds: histogram_vec(
                &registry,
                "skopeo_operation_duration_seconds",
                "Duration of skopeo operations in seconds",
                DURATION_BUCKETS,
            )?,
            blobs_processed_total: counter_vec(
                &registry,
                "skopeo_blobs_processed_total",
                "Total blobs processed by skopeo operations",
                &["operation", "status"],
            )?,
            blob_count: histogram_vec(
                &registry,
                "skopeo_blob_count",
                "Number of blobs per skopeo operation",
                BLOB_COUNT_BUCKETS,
            )?,
            blob_size_bytes: histogram_vec(
                &registry,
                "skopeo_blob_size_bytes",
                "Size of transferred blobs in bytes",
                BLOB_SIZE_BUCKETS,
            )?,
            active_operations: register(
                &registry,
                "skopeo_active_operations",
                IntGaugeVec::new(
                    Opts::new("skopeo_active_operations", "Number of running skopeo operations"),
                    &["operation"],
                ),
            )?,
            source_operations_total: counter_vec(
                &registry,
                "skopeo_source_operations_total",
                "Operations by source transport",
                &["source_type", "operation"],
            )?,
            destination_operations_total: counter_vec(
                &registry,
                "skopeo_destination_operations_total",
                "Operations by destination transport",
                &["destination_type", "operation"],
            )?,
            active_operation_duration_seconds: heartbeat_gauge(
                &registry,
                "skopeo_active_operation_duration_seconds",
                "Elapsed time of a running operation, refreshed by heartbeat",
            )?,
            operation_speed_blobs_per_second: heartbeat_gauge(
                &registry,
                "skopeo_operation_speed_blobs_per_second",
                "Blobs processed per second for a running operation",
            )?,
            operation_progress_percent: heartbeat_gauge(
                &registry,
                "skopeo_operation_progress_percent",
                "Last estimated completion percentage of a running operation",
            )?,
            operation_stale_seconds: heartbeat_gauge(
                &registry,
                "skopeo_operation_stale_seconds",
                "Seconds since a running operation last reported progress",
            )?,
            registry,
        })
    }

    /// The underlying prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every series in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context(EncodeSnafu)?;
        String::from_utf8(buffer).context(Utf8Snafu)
    }

    /// Flatten the registry into `(name, labels, value)` samples.
    ///
    /// Histograms contribute `<name>_count` and `<name>_sum`.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let mut samples = Vec::new();

        for family in self.registry.gather() {
            let name = family.get_name();
            for metric in family.get_metric() {
                let labels: BTreeMap<String, String> = metric
                    .get_label()
                    .iter()
                    .map(|pair| (pair.get_name().to_string(), pair.get_value().to_string()))
                    .collect();

                match family.get_field_type() {
                    MetricType::COUNTER => samples.push(MetricSample {
                        name: name.to_string(),
                        labels,
                        value: metric.get_counter().get_value(),
                    }),
                    MetricType::GAUGE => samples.push(MetricSample {
                        name: name.to_string(),
                        labels,
                        value: metric.get_gauge().get_value(),
                    }),
                    MetricType::HISTOGRAM => {
                        let histogram = metric.get_histogram();
                        samples.push(MetricSample {
                            name: format!("{name}_count"),
                            labels: labels.clone(),
                            value: histogram.get_sample_count() as f64,
                        });
                        samples.push(MetricSample {
                            name: format!("{name}_sum"),
                            labels,
                            value: histogram.get_sample_sum(),
                        });
                    }
                    MetricType::SUMMARY | MetricType::UNTYPED => {}
                }
            }
        }

        samples
    }

    /// Find samples by name whose labels include `labels`.
    pub fn find(&self, name: &str, labels: &[(&str, &str)]) -> Vec<MetricSample> {
        self.snapshot()
            .into_iter()
            .filter(|s| s.name == name && s.has_labels(labels))
            .collect()
    }

    /// Current value of the active-operations gauge for `operation`.
    pub fn active_operations(&self, operation: &str) -> i64 {
        self.active_operations.with_label_values(&[operation]).get()
    }

    /// Completed operations for `operation` with the given status.
    pub fn operations_total(&self, operation: &str, status: &str) -> u64 {
        self.operations_total
            .with_label_values(&[operation, status])
            .get()
    }

    /// Recorded errors for `operation` with the given error type.
    pub fn operation_errors(&self, operation: &str, error_type: &str) -> u64 {
        self.operation_errors_total
            .with_label_values(&[operation, error_type])
            .get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_are_independent() {
        let a = TransferMetrics::new().unwrap();
        let b = TransferMetrics::new().unwrap();

        a.active_operations.with_label_values(&["copy"]).inc();
        assert_eq!(a.active_operations("copy"), 1);
        assert_eq!(b.active_operations("copy"), 0);
    }

    #[test]
    fn test_render_contains_build_info() {
        let metrics = TransferMetrics::new().unwrap();
        metrics
            .operations_total
            .with_label_values(&["inspect", "success"])
            .inc();

        let text = metrics.render().unwrap();
        assert!(text.contains("skopeo_watch_build_info"));
        assert!(text.contains(r#"skopeo_operations_total{operation="inspect",status="success"} 1"#));
    }

    #[test]
    fn test_snapshot_flattens_histograms() {
        let metrics = TransferMetrics::new().unwrap();
        let histogram = metrics.operation_duration_seconds.with_label_values(&["copy"]);
        histogram.observe(1.5);
        histogram.observe(2.5);

        let count = metrics.find("skopeo_operation_duration_seconds_count", &[("operation", "copy")]);
        assert_eq!(count.len(), 1);
        assert_eq!(count[0].value, 2.0);

        let sum = metrics.find("skopeo_operation_duration_seconds_sum", &[("operation", "copy")]);
        assert_eq!(sum[0].value, 4.0);
    }

    #[test]
    fn test_snapshot_includes_gauges_with_labels() {
        let metrics = TransferMetrics::new().unwrap();
        metrics
            .operation_stale_seconds
            .with_label_values(&["copy", "docker://a", "dir:/b", "copying_blob"])
            .set(3.0);

        let samples = metrics.find(
            "skopeo_operation_stale_seconds",
            &[("source", "docker://a"), ("step", "copying_blob")],
        );
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 3.0);
        assert_eq!(samples[0].labels.get("destination").unwrap(), "dir:/b");
    }
}
