//! Report assembly.

use crate::classify::image_label;
use crate::register::RegisteredPair;
use crate::threshold::ThresholdSet;
use crate::types::{AlignmentMetadata, BlobReport, DetectionReport};

/// Alignment metadata for a registered pair and the SSIM measured on it.
#[must_use]
pub fn alignment_metadata(pair: &RegisteredPair, ssim: f64) -> AlignmentMetadata {
    AlignmentMetadata {
        transform: pair.transform(),
        success: pair.success(),
        strategy: pair.strategy(),
        score: pair.score(),
        ssim,
        resized: pair.resized(),
        degradation: pair.degradation().cloned(),
    }
}

/// Build the report, deriving the image-level label from the blobs.
#[must_use]
pub fn assemble(
    asset_id: &str,
    blobs: Vec<BlobReport>,
    alignment: AlignmentMetadata,
    thresholds: ThresholdSet,
    dimensions: crate::types::Dimensions,
) -> DetectionReport {
    DetectionReport {
        asset_id: asset_id.to_string(),
        image_label: image_label(blobs.iter().map(|b| &b.classification)),
        blobs,
        alignment,
        thresholds,
        dimensions,
    }
}

/// One-line human summary:
/// `Result: LABEL | blobs=N | SSIM=x.xxx | warp=affine`.
#[must_use]
pub fn summary_line(report: &DetectionReport) -> String {
    format!(
        "Result: {} | blobs={} | SSIM={:.3} | warp={}",
        report.image_label,
        report.blobs.len(),
        report.alignment.ssim,
        report.alignment.kind(),
    )
}
