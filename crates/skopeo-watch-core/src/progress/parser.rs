//! Line parser for skopeo's diagnostic output.
//!
//! Each line is classified independently into a [`LineEvent`] by trying a
//! fixed list of patterns in priority order; the first match wins. The event is
//! then applied to the running snapshot and blob registry. Lines that match
//! nothing are ignored: skopeo prints plenty of chatter we do not model.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, trace};

use super::blob::{BlobKind, BlobRegistry, BlobStatus, is_valid_digest};
use super::estimate::estimate_percentage;
use super::{ProgressSnapshot, ProgressStep, ProgressUpdate};
use crate::types::OperationKind;

static GETTING_SIGNATURES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Getting image source signatures").expect("valid regex"));

// The digest token is captured loosely and validated separately so that a
// malformed token never partially matches.
static COPYING_BLOB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Copying blob sha256:([0-9a-f]+)(?:\s+\((\d+) bytes\))?(?:\s|$)")
        .expect("valid regex")
});

static COPYING_CONFIG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Copying config sha256:([0-9a-f]+)(?:\s+\((\d+) bytes\))?(?:\s|$)")
        .expect("valid regex")
});

static WRITING_MANIFEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Writing manifest to image destination").expect("valid regex"));

static STORING_SIGNATURES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Storing signatures").expect("valid regex"));

/// Error forms: plain `Error: ...`, and logrus fatal lines in TTY and
/// key=value layouts.
static ERROR_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"^Error: (.+)$").expect("valid regex"),
        Regex::new(r"^FATA\[\d+\]\s+(.+)$").expect("valid regex"),
        Regex::new(r#"level=fatal msg="((?:[^"\\]|\\.)*)""#).expect("valid regex"),
    ]
});

/// What a single line of output announces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    GettingSignatures,
    Blob {
        digest: String,
        kind: BlobKind,
        size: Option<u64>,
    },
    WritingManifest,
    StoringSignatures,
    Error(String),
}

impl LineEvent {
    /// Classify one line. Returns `None` for blank or unrecognized lines.
    pub fn classify(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if GETTING_SIGNATURES.is_match(line) {
            return Some(LineEvent::GettingSignatures);
        }
        if let Some(event) = blob_event(&COPYING_BLOB, line, BlobKind::Layer) {
            return Some(event);
        }
        if let Some(event) = blob_event(&COPYING_CONFIG, line, BlobKind::Config) {
            return Some(event);
        }
        if WRITING_MANIFEST.is_match(line) {
            return Some(LineEvent::WritingManifest);
        }
        if STORING_SIGNATURES.is_match(line) {
            return Some(LineEvent::StoringSignatures);
        }
        ERROR_PATTERNS
            .iter()
            .find_map(|pattern| pattern.captures(line))
            .map(|caps| LineEvent::Error(caps[1].trim().to_string()))
    }
}

fn blob_event(pattern: &Regex, line: &str, kind: BlobKind) -> Option<LineEvent> {
    let caps = pattern.captures(line)?;
    let digest = caps.get(1)?.as_str();
    if !is_valid_digest(digest) {
        return None;
    }
    // A size too large for u64 is treated as unknown rather than rejected.
    let size = caps.get(2).and_then(|m| m.as_str().parse().ok());
    Some(LineEvent::Blob {
        digest: digest.to_string(),
        kind,
        size,
    })
}

/// Incremental parser owning one operation's snapshot and blob registry.
///
/// Create a fresh parser per operation; state is never carried over.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    snapshot: ProgressSnapshot,
    blobs: BlobRegistry,
}

impl ProgressParser {
    pub fn new(operation: OperationKind) -> Self {
        Self {
            snapshot: ProgressSnapshot::new(operation),
            blobs: BlobRegistry::new(),
        }
    }

    /// Parse one line, updating state. Returns an update only when the line
    /// was recognized.
    pub fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate> {
        let Some(event) = LineEvent::classify(line) else {
            trace!(line = line.trim(), "Unrecognized skopeo output");
            return None;
        };
        self.apply(event);
        Some(self.update())
    }

    fn apply(&mut self, event: LineEvent) {
        match event {
            LineEvent::GettingSignatures => {
                self.snapshot.step = ProgressStep::GettingSignatures;
            }
            LineEvent::Blob { digest, kind, size } => {
                self.blobs.observe(&digest, kind, size);
                self.snapshot.step = match kind {
                    BlobKind::Layer => ProgressStep::CopyingBlob,
                    BlobKind::Config => ProgressStep::CopyingConfig,
                };
                self.snapshot.current_blob = Some(digest);
            }
            LineEvent::WritingManifest => {
                self.snapshot.manifest_written = true;
                self.snapshot.step = ProgressStep::WritingManifest;
            }
            LineEvent::StoringSignatures => {
                self.snapshot.signatures_stored = true;
                self.snapshot.step = ProgressStep::StoringSignatures;
            }
            LineEvent::Error(message) => {
                debug!(operation = %self.snapshot.operation, error = %message, "skopeo reported an error");
                self.fail_current_blob();
                self.snapshot.error = Some(message);
                self.snapshot.step = ProgressStep::Error;
            }
        }
    }

    fn fail_current_blob(&mut self) {
        if let Some(digest) = &self.snapshot.current_blob {
            if self.blobs.get(digest).map(|b| b.status()) == Some(BlobStatus::InTransit) {
                self.blobs.set_status(digest, BlobStatus::Error);
            }
        }
    }

    /// Record a successful exit.
    pub fn mark_completed(&mut self) {
        self.snapshot.completed = true;
        self.snapshot.step = ProgressStep::Completed;
        self.blobs.complete_in_transit();
    }

    /// Record a failed exit.
    ///
    /// An error already parsed from the output takes precedence over
    /// `message`. Returns the error that ends up on the snapshot.
    pub fn mark_failed(&mut self, message: impl Into<String>) -> &str {
        if self.snapshot.error.is_none() {
            self.fail_current_blob();
            self.snapshot.error = Some(message.into());
        }
        self.snapshot.step = ProgressStep::Error;
        self.snapshot.error.as_deref().unwrap_or_default()
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    pub fn blobs(&self) -> &BlobRegistry {
        &self.blobs
    }

    pub fn percentage(&self) -> f64 {
        estimate_percentage(
            self.snapshot.step,
            self.blobs.len(),
            self.snapshot.error.is_some(),
            self.snapshot.completed,
        )
    }

    /// Owned view of the current state.
    pub fn update(&self) -> ProgressUpdate {
        let current_blob = self
            .snapshot
            .current_blob
            .as_deref()
            .and_then(|digest| self.blobs.get(digest))
            .cloned();
        ProgressUpdate {
            snapshot: self.snapshot.clone(),
            current_blob,
            blobs_seen: self.blobs.len(),
            percentage: self.percentage(),
        }
    }
}
