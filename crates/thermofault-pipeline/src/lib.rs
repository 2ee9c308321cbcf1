//! thermofault-pipeline: thermal fault detection (sans-IO).
//!
//! Compares a baseline and a maintenance thermal image of the same asset
//! through:
//! registration -> ΔE2000 difference -> adaptive thresholds ->
//! hot-region segmentation -> blob description -> wire topology ->
//! rule-based classification -> report.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory
//! rasters or encoded bytes and returns structured data. File handling,
//! logging setup and rendering live in `thermofault-cli` and
//! `thermofault-export`.

pub mod blob;
pub mod blur;
pub mod classify;
pub mod color;
pub mod config;
pub mod diagnostics;
pub mod difference;
pub mod downsample;
pub mod edge;
pub mod grayscale;
pub mod mask;
pub mod pipeline;
pub mod register;
pub mod report;
pub mod segment;
pub mod similarity;
pub mod threshold;
pub mod topology;
pub mod types;

pub use config::{
    BlobConfig, ClassifierConfig, DetectionConfig, HotBands, HsvBand, RegistrationConfig,
    SegmentationConfig, ThresholdConfig, ThresholdPair, TopologyConfig,
};
pub use pipeline::{Pipeline, StagedDetection};
pub use register::{RegisteredPair, Registrar};
pub use threshold::ThresholdSet;
pub use topology::WireGraph;
pub use types::{
    AlignmentMetadata, BlobDescriptor, BlobReport, BoundingBox, Classification, DetectError,
    DetectionReport, DifferenceField, Dimensions, FaultLabel, FaultSubtype, ImageRole, Point,
    RegistrationDegraded, RegistrationStrategy, RgbImage, ScalarField, StrategyFailure,
    TopologyFeatures, Transform, TransformKind,
};

/// Run detection on two decoded rasters.
///
/// `sensitivity`, when given, must lie in `[0, 100]`; higher values
/// lower the ΔE thresholds. `asset_id` only labels the report.
///
/// # Errors
///
/// Returns [`DetectError::ZeroSizedImage`] for an empty raster and
/// [`DetectError::InvalidConfig`] for a bad configuration or
/// sensitivity. Registration failure is not an error: the report
/// records it in [`AlignmentMetadata`].
pub fn detect(
    base: &RgbImage,
    maintenance: &RgbImage,
    asset_id: &str,
    sensitivity: Option<f64>,
    config: &DetectionConfig,
) -> Result<DetectionReport, DetectError> {
    Ok(Pipeline::from_images(
        base.clone(),
        maintenance.clone(),
        asset_id,
        sensitivity,
        config.clone(),
    )?
    .register()
    .difference()?
    .derive_thresholds()?
    .segment()?
    .extract_blobs()?
    .build_topology()?
    .classify()
    .into_report())
}

/// Decode two encoded images (PNG, JPEG, BMP, WebP) and run detection.
///
/// # Errors
///
/// Returns [`DetectError::EmptyInput`], [`DetectError::ImageDecode`] or
/// [`DetectError::ZeroSizedImage`] for unusable input, plus everything
/// [`detect`] can return.
pub fn detect_from_bytes(
    baseline: &[u8],
    maintenance: &[u8],
    asset_id: &str,
    sensitivity: Option<f64>,
    config: &DetectionConfig,
) -> Result<DetectionReport, DetectError> {
    process_staged(baseline, maintenance, asset_id, sensitivity, config).map(|s| s.report)
}

/// Decode and run detection, keeping every intermediate raster.
///
/// # Errors
///
/// See [`detect_from_bytes`].
pub fn process_staged(
    baseline: &[u8],
    maintenance: &[u8],
    asset_id: &str,
    sensitivity: Option<f64>,
    config: &DetectionConfig,
) -> Result<StagedDetection, DetectError> {
    Ok(Pipeline::new(
        baseline.to_vec(),
        maintenance.to_vec(),
        asset_id,
        sensitivity,
        config.clone(),
    )
    .decode()?
    .register()
    .difference()?
    .derive_thresholds()?
    .segment()?
    .extract_blobs()?
    .build_topology()?
    .classify()
    .into_result())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encode_png(img: &RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(
            encoder,
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgb8,
        )
        .unwrap();
        buf
    }

    #[test]
    fn detect_from_bytes_empty_input() {
        let result = detect_from_bytes(&[], &[1], "TX", None, &DetectionConfig::default());
        assert!(matches!(
            result,
            Err(DetectError::EmptyInput(ImageRole::Baseline))
        ));
    }

    #[test]
    fn detect_from_bytes_corrupt_input() {
        let config = DetectionConfig::default();
        let result = detect_from_bytes(&[0xFF, 0x00], &[0xFF], "TX", None, &config);
        assert!(matches!(result, Err(DetectError::ImageDecode { .. })));
        assert!(result.unwrap_err().is_input_error());
    }

    #[test]
    fn detect_matches_detect_from_bytes() {
        let base = RgbImage::from_pixel(40, 32, image::Rgb([30, 40, 150]));
        let mut maintenance = base.clone();
        for y in 8..24 {
            for x in 10..26 {
                maintenance.put_pixel(x, y, image::Rgb([240, 50, 30]));
            }
        }
        let config = DetectionConfig::default();
        let direct = detect(&base, &maintenance, "TX", None, &config).unwrap();
        let decoded = detect_from_bytes(
            &encode_png(&base),
            &encode_png(&maintenance),
            "TX",
            None,
            &config,
        )
        .unwrap();
        assert_eq!(direct, decoded);
        assert_eq!(direct.blobs.len(), 1);
    }
}
