//! Progress tracking for skopeo's diagnostic output.
//!
//! - `parser`: line-by-line pattern matching into a [`ProgressSnapshot`]
//! - `blob`: the per-operation [`BlobRegistry`]
//! - `estimate`: the step-based percentage heuristic

pub mod blob;
pub mod estimate;
pub mod parser;

pub use blob::{BlobDescriptor, BlobKind, BlobRegistry, BlobStatus};
pub use estimate::estimate_percentage;
pub use parser::ProgressParser;

use std::fmt;

use crate::types::OperationKind;

/// Phase of a skopeo operation as inferred from its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProgressStep {
    #[default]
    Starting,
    GettingSignatures,
    CopyingBlob,
    CopyingConfig,
    WritingManifest,
    StoringSignatures,
    Completed,
    Error,
}

impl ProgressStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStep::Starting => "starting",
            ProgressStep::GettingSignatures => "getting_signatures",
            ProgressStep::CopyingBlob => "copying_blob",
            ProgressStep::CopyingConfig => "copying_config",
            ProgressStep::WritingManifest => "writing_manifest",
            ProgressStep::StoringSignatures => "storing_signatures",
            ProgressStep::Completed => "completed",
            ProgressStep::Error => "error",
        }
    }
}

impl fmt::Display for ProgressStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parser's current understanding of one operation.
///
/// `current_blob` is a digest key into the operation's [`BlobRegistry`], never
/// a detached copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub operation: OperationKind,
    pub step: ProgressStep,
    pub current_blob: Option<String>,
    pub manifest_written: bool,
    pub signatures_stored: bool,
    pub error: Option<String>,
    pub completed: bool,
}

impl ProgressSnapshot {
    pub fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            step: ProgressStep::Starting,
            current_blob: None,
            manifest_written: false,
            signatures_stored: false,
            error: None,
            completed: false,
        }
    }
}

/// An owned view of the progress state, delivered to consumers over a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub snapshot: ProgressSnapshot,
    /// Descriptor of the blob named by `snapshot.current_blob`.
    pub current_blob: Option<BlobDescriptor>,
    /// Number of distinct blobs (config included) seen so far.
    pub blobs_seen: usize,
    /// Approximate completion in `[0, 100]`.
    pub percentage: f64,
}

impl ProgressUpdate {
    pub fn step(&self) -> ProgressStep {
        self.snapshot.step
    }

    /// True for the update sent after the process exited.
    pub fn is_terminal(&self) -> bool {
        self.snapshot.completed || self.snapshot.error.is_some()
    }
}
