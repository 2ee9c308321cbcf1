//! thermofault-export: Pure report serializers (sans-IO).
//!
//! Converts a [`DetectionReport`](thermofault_pipeline::DetectionReport)
//! into JSON and renders the annotated overlay raster. Nothing here
//! touches the filesystem.

pub mod font;
pub mod json;
pub mod overlay;

pub use json::{ReportMetadata, to_json, to_json_with_metadata};
pub use overlay::{caption, label_color, render_overlay};

use thermofault_pipeline::Dimensions;

/// Errors produced while exporting a report.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// JSON serialization failed.
    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),

    /// The raster does not match the report's geometry.
    #[error("overlay raster is {found}, report expects {expected}")]
    ShapeMismatch {
        /// Report dimensions.
        expected: Dimensions,
        /// Raster dimensions.
        found: Dimensions,
    },
}
