//! JSON report serializer.
//!
//! The report serializes with labels as `"Normal"`, `"Potentially
//! Faulty"` and `"Faulty"`. Optional [`ReportMetadata`] adds the source
//! image paths at the top level, next to the report fields.

use serde::Serialize;
use thermofault_pipeline::DetectionReport;

use crate::ExportError;

/// Source information to embed alongside the report.
///
/// Fields left as `None` are omitted from the output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportMetadata<'a> {
    /// Path of the baseline image.
    pub baseline_path: Option<&'a str>,
    /// Path of the maintenance image.
    pub maintenance_path: Option<&'a str>,
}

#[derive(Serialize)]
struct Document<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    baseline_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    maintenance_path: Option<&'a str>,
    #[serde(flatten)]
    report: &'a DetectionReport,
}

/// Serialize a report as pretty-printed JSON.
///
/// # Errors
///
/// Returns [`ExportError::Json`] if serialization fails.
pub fn to_json(report: &DetectionReport) -> Result<String, ExportError> {
    to_json_with_metadata(report, &ReportMetadata::default())
}

/// Serialize a report with source metadata as pretty-printed JSON.
///
/// # Errors
///
/// See [`to_json`].
pub fn to_json_with_metadata(
    report: &DetectionReport,
    metadata: &ReportMetadata<'_>,
) -> Result<String, ExportError> {
    let doc = Document {
        baseline_path: metadata.baseline_path,
        maintenance_path: metadata.maintenance_path,
        report,
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}
