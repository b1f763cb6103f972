//! Per-operation registry of content-addressed blobs.

use indexmap::IndexMap;

/// Length of a sha256 digest in hex characters.
pub const DIGEST_LEN: usize = 64;

/// Transfer status of a single blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobStatus {
    Pending,
    InTransit,
    Completed,
    Error,
}

impl BlobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobStatus::Pending => "pending",
            BlobStatus::InTransit => "in_transit",
            BlobStatus::Completed => "completed",
            BlobStatus::Error => "error",
        }
    }
}

/// Whether a digest names an image layer or the image configuration object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Layer,
    Config,
}

/// One blob observed in skopeo's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDescriptor {
    digest: String,
    kind: BlobKind,
    size: Option<u64>,
    status: BlobStatus,
}

impl BlobDescriptor {
    fn new(digest: String, kind: BlobKind) -> Self {
        Self {
            digest,
            kind,
            size: None,
            status: BlobStatus::Pending,
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// First 12 hex characters, as container tooling usually abbreviates.
    pub fn short_digest(&self) -> &str {
        &self.digest[..self.digest.len().min(12)]
    }

    pub fn kind(&self) -> BlobKind {
        self.kind
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn status(&self) -> BlobStatus {
        self.status
    }

    /// Record a size observation. Sizes only grow once known.
    fn observe_size(&mut self, size: u64) {
        if self.size.is_none_or(|known| size > known) {
            self.size = Some(size);
        }
    }
}

/// Check that `token` is a well-formed lowercase sha256 hex digest.
pub fn is_valid_digest(token: &str) -> bool {
    token.len() == DIGEST_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Insertion-ordered mapping from digest to descriptor.
///
/// Descriptors are created on first sighting and never removed for the
/// lifetime of the operation.
#[derive(Debug, Clone, Default)]
pub struct BlobRegistry {
    blobs: IndexMap<String, BlobDescriptor>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting of `digest`, creating its descriptor if needed.
    ///
    /// The blob is marked in transit and the size, when present, is folded in.
    /// Returns the updated descriptor.
    pub fn observe(
        &mut self,
        digest: &str,
        kind: BlobKind,
        size: Option<u64>,
    ) -> &BlobDescriptor {
        let blob = self
            .blobs
            .entry(digest.to_string())
            .or_insert_with(|| BlobDescriptor::new(digest.to_string(), kind));
        if let Some(size) = size {
            blob.observe_size(size);
        }
        blob.status = BlobStatus::InTransit;
        blob
    }

    pub fn get(&self, digest: &str) -> Option<&BlobDescriptor> {
        self.blobs.get(digest)
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.blobs.contains_key(digest)
    }

    /// Set the status of one blob; unknown digests are ignored.
    pub fn set_status(&mut self, digest: &str, status: BlobStatus) {
        if let Some(blob) = self.blobs.get_mut(digest) {
            blob.status = status;
        }
    }

    /// Mark every in-transit blob as completed.
    pub fn complete_in_transit(&mut self) {
        for blob in self.blobs.values_mut() {
            if blob.status == BlobStatus::InTransit {
                blob.status = BlobStatus::Completed;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Descriptors in order of first sighting.
    pub fn iter(&self) -> impl Iterator<Item = &BlobDescriptor> {
        self.blobs.values()
    }

    /// Sum of all known sizes.
    pub fn total_known_bytes(&self) -> u64 {
        self.blobs.values().filter_map(|b| b.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const DIGEST_B: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_digest_validation() {
        assert!(is_valid_digest(DIGEST_A));
        assert!(is_valid_digest(DIGEST_B));
        assert!(!is_valid_digest(&DIGEST_A[..63]));
        assert!(!is_valid_digest(&DIGEST_B.to_uppercase()));
        assert!(!is_valid_digest(&format!("{}g", &DIGEST_A[..63])));
    }

    #[test]
    fn test_first_sighting_creates_in_transit() {
        let mut registry = BlobRegistry::new();
        let blob = registry.observe(DIGEST_A, BlobKind::Layer, None);
        assert_eq!(blob.status(), BlobStatus::InTransit);
        assert_eq!(blob.size(), None);
        assert_eq!(blob.short_digest(), "aaaaaaaaaaaa");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_repeat_sighting_updates_in_place() {
        let mut registry = BlobRegistry::new();
        registry.observe(DIGEST_A, BlobKind::Layer, None);
        registry.observe(DIGEST_A, BlobKind::Layer, Some(2048));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(DIGEST_A).unwrap().size(), Some(2048));
    }

    #[test]
    fn test_size_never_decreases() {
        let mut registry = BlobRegistry::new();
        registry.observe(DIGEST_A, BlobKind::Layer, Some(4096));
        registry.observe(DIGEST_A, BlobKind::Layer, Some(100));
        assert_eq!(registry.get(DIGEST_A).unwrap().size(), Some(4096));
    }

    #[test]
    fn test_insertion_order_and_totals() {
        let mut registry = BlobRegistry::new();
        registry.observe(DIGEST_B, BlobKind::Layer, Some(10));
        registry.observe(DIGEST_A, BlobKind::Config, None);
        registry.observe(DIGEST_B, BlobKind::Layer, None);

        let digests: Vec<_> = registry.iter().map(|b| b.digest()).collect();
        assert_eq!(digests, vec![DIGEST_B, DIGEST_A]);
        assert_eq!(registry.total_known_bytes(), 10);
        assert_eq!(registry.get(DIGEST_A).unwrap().kind(), BlobKind::Config);
    }

    #[test]
    fn test_complete_in_transit_skips_errors() {
        let mut registry = BlobRegistry::new();
        registry.observe(DIGEST_A, BlobKind::Layer, None);
        registry.observe(DIGEST_B, BlobKind::Layer, None);
        registry.set_status(DIGEST_B, BlobStatus::Error);
        registry.complete_in_transit();

        assert_eq!(registry.get(DIGEST_A).unwrap().status(), BlobStatus::Completed);
        assert_eq!(registry.get(DIGEST_B).unwrap().status(), BlobStatus::Error);
    }
}
