//! Step-based completion estimate.
//!
//! skopeo never announces how many blobs an image has, so the percentage is a
//! heuristic: fixed milestones per step, and an asymptotic curve while blobs
//! are copying. The constants are kept as-is for compatibility with existing
//! dashboards; treat the value as approximate.

use super::ProgressStep;

const SIGNATURES_PERCENT: f64 = 10.0;
const BLOB_BASE_PERCENT: f64 = 20.0;
const BLOB_SPAN_PERCENT: f64 = 50.0;
const BLOB_CAP_PERCENT: f64 = 70.0;
const CONFIG_PERCENT: f64 = 75.0;
const MANIFEST_PERCENT: f64 = 90.0;
const STORING_SIGNATURES_PERCENT: f64 = 95.0;
const COMPLETED_PERCENT: f64 = 100.0;

/// Estimate completion in `[0, 100]`.
///
/// An error always yields 0, regardless of step; completion yields 100.
pub fn estimate_percentage(
    step: ProgressStep,
    blobs_seen: usize,
    has_error: bool,
    completed: bool,
) -> f64 {
    if has_error {
        return 0.0;
    }
    if completed {
        return COMPLETED_PERCENT;
    }

    match step {
        ProgressStep::GettingSignatures => SIGNATURES_PERCENT,
        ProgressStep::CopyingBlob => {
            let n = blobs_seen as f64;
            (BLOB_BASE_PERCENT + n / (n + 1.0) * BLOB_SPAN_PERCENT).min(BLOB_CAP_PERCENT)
        }
        ProgressStep::CopyingConfig => CONFIG_PERCENT,
        ProgressStep::WritingManifest => MANIFEST_PERCENT,
        ProgressStep::StoringSignatures => STORING_SIGNATURES_PERCENT,
        ProgressStep::Completed => COMPLETED_PERCENT,
        ProgressStep::Starting | ProgressStep::Error => 0.0,
    }
}
