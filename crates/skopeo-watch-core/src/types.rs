//! Shared types.

use std::fmt;

/// The skopeo sub-operation being supervised.
///
/// The string form is used as the `operation` label on every metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Copy,
    Inspect,
    Delete,
    ManifestDigest,
    ImageExists,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Copy => "copy",
            OperationKind::Inspect => "inspect",
            OperationKind::Delete => "delete",
            OperationKind::ManifestDigest => "manifest_digest",
            OperationKind::ImageExists => "image_exists",
        }
    }

    /// The skopeo sub-command that implements this operation.
    pub fn subcommand(&self) -> &'static str {
        match self {
            OperationKind::Copy => "copy",
            OperationKind::Inspect | OperationKind::ImageExists => "inspect",
            OperationKind::Delete => "delete",
            OperationKind::ManifestDigest => "manifest-digest",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
