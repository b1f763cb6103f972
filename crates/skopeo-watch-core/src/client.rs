//! High-level skopeo operations.
//!
//! [`SkopeoClient`] builds the command for each operation, runs it through
//! the [`ProcessCoordinator`] and, when a registry is configured, wraps the
//! run in an [`OperationTracker`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};

use crate::config::{Config, SkopeoConfig, TrackerConfig};
use crate::metrics::TransferMetrics;
use crate::process::{FailureKind, ProcessCoordinator, TransferCommand, TransferOutput};
use crate::progress::ProgressUpdate;
use crate::tracker::{OperationOutcome, OperationTracker, TrackerHandle};
use crate::types::OperationKind;

/// Settings a [`SkopeoClient`] needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientConfig {
    pub skopeo: SkopeoConfig,
    pub tracker: TrackerConfig,
}

impl From<&Config> for ClientConfig {
    fn from(config: &Config) -> Self {
        Self {
            skopeo: config.skopeo.clone(),
            tracker: config.tracker.clone(),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct OperationOptions {
    /// Receives every progress update in order, ending with a terminal one.
    pub progress: Option<UnboundedSender<ProgressUpdate>>,
    /// Overrides the configured default deadline.
    pub timeout: Option<Duration>,
}

impl OperationOptions {
    pub fn with_progress(mut self, progress: UnboundedSender<ProgressUpdate>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Why an existence check could not give an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupFailure {
    Unauthorized,
    Forbidden,
    Unexpected,
}

impl LookupFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupFailure::Unauthorized => "unauthorized",
            LookupFailure::Forbidden => "forbidden",
            LookupFailure::Unexpected => "unexpected",
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            LookupFailure::Unauthorized => "Unauthorized access",
            LookupFailure::Forbidden => "Access forbidden",
            LookupFailure::Unexpected => "Unexpected error",
        }
    }
}

/// Answer of [`SkopeoClient::image_exists`].
///
/// `success` says whether the question was answered; `exists` is only
/// meaningful when it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageExists {
    pub success: bool,
    pub exists: bool,
    pub error: Option<String>,
    pub failure: Option<LookupFailure>,
}

/// Stderr fragments that mean "the image is not there".
const NOT_FOUND_MARKERS: &[&str] = &[
    "manifest unknown",
    "error reading manifest",
    "repository not found",
];

impl ImageExists {
    fn found() -> Self {
        Self {
            success: true,
            exists: true,
            error: None,
            failure: None,
        }
    }

    fn missing() -> Self {
        Self {
            success: true,
            exists: false,
            error: None,
            failure: None,
        }
    }

    fn failed(failure: LookupFailure, detail: &str) -> Self {
        Self {
            success: false,
            exists: false,
            error: Some(format!("{}: {}", failure.prefix(), detail.trim())),
            failure: Some(failure),
        }
    }

    /// Interpret the output of `skopeo inspect`.
    pub fn classify(output: &TransferOutput) -> Self {
        if output.success {
            return Self::found();
        }

        // Spawn failures and timeouts never reached the registry.
        let text = match output.failure {
            Some(FailureKind::Spawn | FailureKind::Timeout) => output.error_output(),
            _ => output.stderr.as_str(),
        };
        let lower = text.to_lowercase();

        if NOT_FOUND_MARKERS.iter().any(|marker| lower.contains(marker)) {
            Self::missing()
        } else if lower.contains("unauthorized") {
            Self::failed(LookupFailure::Unauthorized, text)
        } else if lower.contains("forbidden") {
            Self::failed(LookupFailure::Forbidden, text)
        } else if text.trim().is_empty() {
            Self::missing()
        } else {
            Self::failed(LookupFailure::Unexpected, text)
        }
    }
}

impl OperationOutcome for ImageExists {
    fn error_type(&self) -> Option<&'static str> {
        self.failure.map(|failure| failure.as_str())
    }
}

/// Runs skopeo operations with optional metrics tracking.
#[derive(Clone)]
pub struct SkopeoClient {
    config: ClientConfig,
    metrics: Option<Arc<TransferMetrics>>,
    coordinator: ProcessCoordinator,
}

impl SkopeoClient {
    /// Create a client. With `metrics` set to `None`, nothing is tracked.
    pub fn new(config: ClientConfig, metrics: Option<Arc<TransferMetrics>>) -> Self {
        Self {
            config,
            metrics,
            coordinator: ProcessCoordinator::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn metrics(&self) -> Option<&Arc<TransferMetrics>> {
        self.metrics.as_ref()
    }

    /// `skopeo copy SOURCE DESTINATION`.
    pub async fn copy(
        &self,
        source: &str,
        destination: &str,
        options: OperationOptions,
    ) -> TransferOutput {
        let command = self.command(OperationKind::Copy, [source, destination]);
        self.tracked(
            OperationKind::Copy,
            Some(source),
            Some(destination),
            |tracker| self.transfer(command, tracker, options),
        )
        .await
    }

    /// `skopeo inspect IMAGE`.
    pub async fn inspect(&self, image: &str, options: OperationOptions) -> TransferOutput {
        self.single(OperationKind::Inspect, image, options).await
    }

    /// `skopeo delete IMAGE`.
    pub async fn delete(&self, image: &str, options: OperationOptions) -> TransferOutput {
        self.single(OperationKind::Delete, image, options).await
    }

    /// `skopeo manifest-digest IMAGE`.
    pub async fn manifest_digest(&self, image: &str, options: OperationOptions) -> TransferOutput {
        self.single(OperationKind::ManifestDigest, image, options).await
    }

    /// Check whether `image` exists, via `skopeo inspect`.
    pub async fn image_exists(&self, image: &str, options: OperationOptions) -> ImageExists {
        let command = self.command(OperationKind::ImageExists, [image]);
        self.tracked(OperationKind::ImageExists, Some(image), None, |tracker| async move {
            let output = self.transfer(command, tracker, options).await;
            ImageExists::classify(&output)
        })
        .await
    }

    async fn single(
        &self,
        operation: OperationKind,
        image: &str,
        options: OperationOptions,
    ) -> TransferOutput {
        let command = self.command(operation, [image]);
        self.tracked(operation, Some(image), None, |tracker| {
            self.transfer(command, tracker, options)
        })
        .await
    }

    fn command<'a>(
        &self,
        operation: OperationKind,
        operands: impl IntoIterator<Item = &'a str>,
    ) -> TransferCommand {
        TransferCommand::skopeo(operation, self.config.skopeo.path.as_str(), operands)
    }

    /// Run `body` inside a tracker scope when metrics are enabled.
    async fn tracked<T, F, Fut>(
        &self,
        operation: OperationKind,
        source: Option<&str>,
        destination: Option<&str>,
        body: F,
    ) -> T
    where
        F: FnOnce(Option<TrackerHandle>) -> Fut,
        Fut: Future<Output = T>,
        T: OperationOutcome,
    {
        let Some(metrics) = &self.metrics else {
            return body(None).await;
        };

        let tracker = OperationTracker::start(
            metrics.clone(),
            operation,
            source,
            destination,
            &self.config.tracker,
        );
        let handle = tracker.handle();
        let Ok(value) = tracker
            .run(async move { Ok::<T, std::convert::Infallible>(body(Some(handle)).await) })
            .await;
        value
    }

    /// Run one command, forwarding progress to the tracker and the caller.
    async fn transfer(
        &self,
        command: TransferCommand,
        tracker: Option<TrackerHandle>,
        options: OperationOptions,
    ) -> TransferOutput {
        let timeout = options.timeout.or_else(|| self.config.skopeo.timeout());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let run = self.coordinator.run(command, Some(tx), timeout);
        let forward = async {
            while let Some(update) = rx.recv().await {
                if let Some(tracker) = &tracker {
                    tracker.record_progress(&update).await;
                }
                if let Some(progress) = &options.progress {
                    let _ = progress.send(update);
                }
            }
        };
        let (output, ()) = tokio::join!(run, forward);

        if let Some(tracker) = &tracker {
            for blob in output.blobs.iter() {
                tracker.add_blob(blob.size()).await;
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::BlobRegistry;

    fn exited(stderr: &str) -> TransferOutput {
        TransferOutput {
            success: false,
            stdout: String::new(),
            stderr: stderr.to_string(),
            error: Some("Process exited with code 1".to_string()),
            failure: Some(FailureKind::ExitStatus),
            blobs: BlobRegistry::new(),
        }
    }

    #[test]
    fn test_classify_success() {
        let output = TransferOutput {
            success: true,
            error: None,
            failure: None,
            ..exited("")
        };
        assert_eq!(ImageExists::classify(&output), ImageExists::found());
    }

    #[test]
    fn test_classify_not_found() {
        for stderr in [
            "Error: manifest unknown: manifest unknown",
            "time=\"...\" level=fatal msg=\"Error reading manifest latest in docker.io/x: ...\"",
            "Error: Repository Not Found",
            "",
            "   \n",
        ] {
            let result = ImageExists::classify(&exited(stderr));
            assert!(result.success, "{stderr}");
            assert!(!result.exists, "{stderr}");
            assert_eq!(result.error, None);
            assert_eq!(result.error_type(), None);
        }
    }

    #[test]
    fn test_classify_access_errors() {
        let result = ImageExists::classify(&exited("Error: unauthorized: authentication required\n"));
        assert!(!result.success);
        assert_eq!(result.failure, Some(LookupFailure::Unauthorized));
        assert_eq!(
            result.error.as_deref(),
            Some("Unauthorized access: Error: unauthorized: authentication required")
        );

        let result = ImageExists::classify(&exited("Error: 403 Forbidden"));
        assert_eq!(result.failure, Some(LookupFailure::Forbidden));
        assert!(result.error.unwrap().starts_with("Access forbidden: "));
    }

    #[test]
    fn test_classify_unexpected() {
        let result = ImageExists::classify(&exited("Error: connection refused"));
        assert!(!result.success);
        assert_eq!(result.error_type(), Some("unexpected"));
        assert_eq!(
            result.error.as_deref(),
            Some("Unexpected error: Error: connection refused")
        );
    }

    #[test]
    fn test_classify_timeout_is_not_missing() {
        let output = TransferOutput {
            error: Some("Operation timed out".to_string()),
            failure: Some(FailureKind::Timeout),
            ..exited("")
        };
        let result = ImageExists::classify(&output);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unexpected error: Operation timed out"));
    }

    #[test]
    fn test_client_config_from_config() {
        let config = Config::parse("skopeo:\n  path: /usr/local/bin/skopeo\n").unwrap();
        let client = SkopeoClient::new(ClientConfig::from(&config), None);
        assert_eq!(client.config().skopeo.path, "/usr/local/bin/skopeo");
        assert!(client.metrics().is_none());

        let command = client.command(OperationKind::Copy, ["docker://a", "dir:/b"]);
        assert_eq!(command.program, "/usr/local/bin/skopeo");
        assert_eq!(command.args, vec!["copy", "docker://a", "dir:/b"]);
    }
}
