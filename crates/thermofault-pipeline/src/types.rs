//! Shared types for the thermofault detection pipeline.

use std::fmt;

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::threshold::ThresholdSet;

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate masks without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can reference the
/// registered color rasters without depending on `image` directly.
pub use image::RgbImage;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Pixel dimensions of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of any `image` buffer.
    #[must_use]
    pub fn of<I: image::GenericImageView>(image: &I) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    /// Whether either axis is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned pixel rectangle (inclusive origin, exclusive extent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left column.
    pub x: u32,
    /// Top row.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl BoundingBox {
    /// Grow the box by `margin` on every side, clipped to `bounds`.
    ///
    /// Returns the half-open ranges `(x0..x1, y0..y1)`.
    #[must_use]
    pub fn expanded(
        self,
        margin: u32,
        bounds: Dimensions,
    ) -> (std::ops::Range<u32>, std::ops::Range<u32>) {
        let x0 = self.x.saturating_sub(margin);
        let y0 = self.y.saturating_sub(margin);
        let x1 = self
            .x
            .saturating_add(self.width)
            .saturating_add(margin)
            .min(bounds.width);
        let y1 = self
            .y
            .saturating_add(self.height)
            .saturating_add(margin)
            .min(bounds.height);
        (x0..x1, y0..y1)
    }
}

/// Dense single-channel `f32` raster stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl ScalarField {
    /// A field of zeros.
    #[must_use]
    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width as usize * height as usize],
        }
    }

    /// Build a field by evaluating `f` at every pixel.
    #[must_use]
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> f32) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Field dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }

    /// Raw row-major values.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Value at integer pixel `(x, y)`. Out-of-range reads return 0.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        if x >= self.width || y >= self.height {
            return 0.0;
        }
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Bilinear sample at sub-pixel `(x, y)`.
    ///
    /// Returns `None` outside `[0, width-1] x [0, height-1]`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn sample(&self, x: f64, y: f64) -> Option<f32> {
        if !(x.is_finite() && y.is_finite()) || self.width == 0 || self.height == 0 {
            return None;
        }
        let max_x = f64::from(self.width - 1);
        let max_y = f64::from(self.height - 1);
        if x < 0.0 || y < 0.0 || x > max_x || y > max_y {
            return None;
        }
        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = (x - f64::from(x0)) as f32;
        let fy = (y - f64::from(y0)) as f32;
        let top = self.get(x0, y0).mul_add(1.0 - fx, self.get(x1, y0) * fx);
        let bottom = self.get(x0, y1).mul_add(1.0 - fx, self.get(x1, y1) * fx);
        Some(top.mul_add(1.0 - fy, bottom * fy))
    }

    /// Largest value, or 0 for an empty field.
    #[must_use]
    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(0.0, f32::max)
    }
}

/// Per-pixel ΔE2000 between the baseline and the registered maintenance
/// image. Every value is finite and non-negative.
#[derive(Debug, Clone, PartialEq)]
pub struct DifferenceField(ScalarField);

impl DifferenceField {
    /// Wrap a field, clamping negatives and non-finite values to zero.
    #[must_use]
    pub fn new(mut field: ScalarField) -> Self {
        for v in &mut field.data {
            if !v.is_finite() || *v < 0.0 {
                *v = 0.0;
            }
        }
        Self(field)
    }

    /// ΔE at `(x, y)`.
    #[must_use]
    pub fn value(&self, x: u32, y: u32) -> f32 {
        self.0.get(x, y)
    }

    /// Underlying scalar field.
    #[must_use]
    pub const fn field(&self) -> &ScalarField {
        &self.0
    }

    /// Field dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.0.dimensions()
    }

    /// Render as an 8-bit image, mapping `[0, clamp]` onto `[0, 255]`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_gray_image(&self, clamp: f32) -> GrayImage {
        let scale = if clamp > 0.0 { 255.0 / clamp } else { 0.0 };
        GrayImage::from_fn(self.0.width, self.0.height, |x, y| {
            image::Luma([(self.value(x, y).min(clamp) * scale).round() as u8])
        })
    }
}

/// Geometric model family of a registration transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    /// 2x3 affine (rotation, scale, shear, translation).
    Affine,
    /// 3x3 projective homography.
    Homography,
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Affine => f.write_str("affine"),
            Self::Homography => f.write_str("homography"),
        }
    }
}

/// A planar transform mapping **baseline** pixel coordinates onto
/// **maintenance** pixel coordinates.
///
/// Warping samples the maintenance image at `T(x, y)` for every
/// baseline pixel `(x, y)` (inverse mapping).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "matrix", rename_all = "lowercase")]
pub enum Transform {
    /// Rows `[a00 a01 a02; a10 a11 a12]`.
    Affine([[f64; 3]; 2]),
    /// Row-major 3x3 matrix.
    Homography([[f64; 3]; 3]),
}

impl Transform {
    /// The identity affine transform.
    #[must_use]
    pub const fn identity() -> Self {
        Self::Affine([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
    }

    /// Model family tag.
    #[must_use]
    pub const fn kind(&self) -> TransformKind {
        match self {
            Self::Affine(_) => TransformKind::Affine,
            Self::Homography(_) => TransformKind::Homography,
        }
    }

    /// Map a baseline point into maintenance coordinates.
    ///
    /// Returns `None` when a homography sends the point to infinity.
    #[must_use]
    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        match self {
            Self::Affine(m) => Some((
                m[0][0].mul_add(x, m[0][1].mul_add(y, m[0][2])),
                m[1][0].mul_add(x, m[1][1].mul_add(y, m[1][2])),
            )),
            Self::Homography(m) => {
                let w = m[2][0].mul_add(x, m[2][1].mul_add(y, m[2][2]));
                if w.abs() < 1e-12 {
                    return None;
                }
                let u = m[0][0].mul_add(x, m[0][1].mul_add(y, m[0][2]));
                let v = m[1][0].mul_add(x, m[1][1].mul_add(y, m[1][2]));
                Some((u / w, v / w))
            }
        }
    }

    /// Homogeneous 3x3 form.
    #[must_use]
    pub fn to_matrix3(&self) -> Matrix3<f64> {
        match self {
            Self::Affine(m) => Matrix3::new(
                m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], 0.0, 0.0, 1.0,
            ),
            Self::Homography(m) => Matrix3::new(
                m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
            ),
        }
    }

    /// Build a transform of the given `kind` from a homogeneous matrix.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::TransformShape`] when `kind` is affine but
    /// the bottom row is not `[0 0 1]`.
    pub fn from_matrix3(kind: TransformKind, m: &Matrix3<f64>) -> Result<Self, DetectError> {
        match kind {
            TransformKind::Affine => {
                let bottom_ok = m[(2, 0)].abs() < 1e-9
                    && m[(2, 1)].abs() < 1e-9
                    && (m[(2, 2)] - 1.0).abs() < 1e-9;
                if !bottom_ok {
                    return Err(DetectError::TransformShape {
                        expected: TransformKind::Affine,
                    });
                }
                Ok(Self::Affine([
                    [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
                    [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
                ]))
            }
            TransformKind::Homography => Ok(Self::Homography([
                [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
                [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
                [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
            ])),
        }
    }

    /// Whether every coefficient is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Affine(m) => m.iter().flatten().all(|v| v.is_finite()),
            Self::Homography(m) => m.iter().flatten().all(|v| v.is_finite()),
        }
    }
}

/// Geometric and colorimetric descriptor of one candidate region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    /// 1-based id in raster scan order of first pixel.
    pub id: u32,
    /// Tight bounding box.
    pub bbox: BoundingBox,
    /// Pixel count.
    pub area: u32,
    /// Mean pixel position.
    pub centroid: Point,
    /// Mean ΔE2000 over the region.
    pub mean_delta_e: f64,
    /// Maximum ΔE2000 over the region.
    pub peak_delta_e: f64,
    /// Mean hue in OpenCV units (0..179).
    pub mean_hue: f64,
    /// Mean saturation (0..255).
    pub mean_saturation: f64,
    /// Mean value / brightness (0..255).
    pub mean_value: f64,
    /// Ratio of the larger to the smaller coordinate-covariance
    /// eigenvalue. 1.0 when the region is too small to tell.
    pub elongation: f64,
}

impl BlobDescriptor {
    /// Whether the region is stretched enough to be read as a conductor
    /// segment rather than a joint.
    #[must_use]
    pub fn is_wire_like(&self, min_elongation: f64) -> bool {
        self.elongation >= min_elongation
    }
}

/// Topology cues measured around one blob.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TopologyFeatures {
    /// Centroid lies within the joint radius of an endpoint or junction.
    pub near_joint: bool,
    /// Fraction of local skeleton pixels that are hot.
    pub coverage: f64,
    /// Fraction of the skeleton-adjacent band that is not hot.
    pub cool_fraction: f64,
    /// Hot skeleton pixels in the window.
    pub hot_skeleton_px: u32,
    /// All skeleton pixels in the window.
    pub skeleton_px: u32,
}

/// Fault severity class, ordered from benign to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FaultLabel {
    /// No actionable anomaly.
    #[serde(rename = "Normal")]
    Normal,
    /// Anomaly that warrants monitoring.
    #[serde(rename = "Potentially Faulty")]
    PotentiallyFaulty,
    /// Anomaly that warrants intervention.
    #[serde(rename = "Faulty")]
    Faulty,
}

impl fmt::Display for FaultLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("Normal"),
            Self::PotentiallyFaulty => f.write_str("Potentially Faulty"),
            Self::Faulty => f.write_str("Faulty"),
        }
    }
}

/// Physical interpretation of a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultSubtype {
    /// No subtype (always the case for `Normal`).
    None,
    /// Heating concentrated at a connector or wire termination.
    LooseJoint,
    /// Localized heating on an otherwise cool conductor.
    PointOverload,
    /// Heating spread along the conductor.
    FullWireOverload,
}

impl fmt::Display for FaultSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::LooseJoint => f.write_str("LooseJoint"),
            Self::PointOverload => f.write_str("PointOverload"),
            Self::FullWireOverload => f.write_str("FullWireOverload"),
        }
    }
}

/// Final verdict for one blob.
///
/// Construct through [`Classification::new`], which keeps
/// `label == Normal => subtype == None` and clamps the scores.
/// Deserialization enforces the same invariants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ClassificationRecord")]
pub struct Classification {
    label: FaultLabel,
    subtype: FaultSubtype,
    confidence: f64,
    severity: f64,
}

impl Classification {
    /// Build a classification, normalizing the subtype of `Normal`
    /// labels and clamping confidence to `[0, 1]` and severity to
    /// `[0, 100]`. Non-finite scores become 0.
    #[must_use]
    pub fn new(label: FaultLabel, subtype: FaultSubtype, confidence: f64, severity: f64) -> Self {
        let subtype = if label == FaultLabel::Normal {
            FaultSubtype::None
        } else {
            subtype
        };
        Self {
            label,
            subtype,
            confidence: clamp_finite(confidence, 0.0, 1.0),
            severity: clamp_finite(severity, 0.0, 100.0),
        }
    }

    /// Severity class.
    #[must_use]
    pub const fn label(&self) -> FaultLabel {
        self.label
    }

    /// Physical interpretation.
    #[must_use]
    pub const fn subtype(&self) -> FaultSubtype {
        self.subtype
    }

    /// Confidence in `[0, 1]`.
    #[must_use]
    pub const fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Severity in `[0, 100]`.
    #[must_use]
    pub const fn severity(&self) -> f64 {
        self.severity
    }
}

/// Unchecked wire form of [`Classification`].
#[derive(Deserialize)]
struct ClassificationRecord {
    label: FaultLabel,
    subtype: FaultSubtype,
    confidence: f64,
    severity: f64,
}

impl TryFrom<ClassificationRecord> for Classification {
    type Error = &'static str;

    fn try_from(r: ClassificationRecord) -> Result<Self, Self::Error> {
        if r.label == FaultLabel::Normal && r.subtype != FaultSubtype::None {
            return Err("a Normal classification cannot carry a fault subtype");
        }
        if !(0.0..=1.0).contains(&r.confidence) {
            return Err("confidence must be in [0, 1]");
        }
        if !(0.0..=100.0).contains(&r.severity) {
            return Err("severity must be in [0, 100]");
        }
        Ok(Self::new(r.label, r.subtype, r.confidence, r.severity))
    }
}

fn clamp_finite(v: f64, lo: f64, hi: f64) -> f64 {
    if v.is_nan() { lo } else { v.clamp(lo, hi) }
}

/// One blob with its topology cues and verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobReport {
    /// Geometric / colorimetric descriptor.
    pub descriptor: BlobDescriptor,
    /// Topology cues used by the classifier.
    pub topology: TopologyFeatures,
    /// Share of the bounding box passing the absolute-heat gate.
    pub absolute_heat_fraction: f64,
    /// Verdict.
    pub classification: Classification,
}

/// Identifies which registration strategy produced or failed an alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStrategy {
    /// Iterative enhanced-correlation area registration (affine).
    AreaCorrelation,
    /// Keypoint matching with a RANSAC homography (projective).
    FeatureHomography,
}

impl fmt::Display for RegistrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AreaCorrelation => f.write_str("AreaCorrelation"),
            Self::FeatureHomography => f.write_str("FeatureHomography"),
        }
    }
}

/// A strategy that did not produce an alignment, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyFailure {
    /// Which strategy failed.
    pub strategy: RegistrationStrategy,
    /// Human-readable reason.
    pub reason: String,
}

/// Non-fatal registration degradation, recorded as report metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationDegraded {
    /// An earlier strategy failed but a later one succeeded.
    FallbackEngaged {
        /// Failures preceding the successful strategy.
        failures: Vec<StrategyFailure>,
    },
    /// Every strategy failed; the identity transform was used.
    AllStrategiesFailed {
        /// One entry per attempted strategy.
        failures: Vec<StrategyFailure>,
    },
}

/// Alignment metadata carried in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentMetadata {
    /// The transform applied to the maintenance image.
    pub transform: Transform,
    /// Whether a strategy succeeded.
    pub success: bool,
    /// Strategy that produced `transform`, if any.
    pub strategy: Option<RegistrationStrategy>,
    /// Correlation (area) or inlier ratio (feature) score.
    pub score: f64,
    /// Structural similarity of the registered grayscale pair.
    pub ssim: f64,
    /// Whether the maintenance image was resized to baseline geometry.
    pub resized: bool,
    /// Degradation, when the primary strategy did not succeed.
    pub degradation: Option<RegistrationDegraded>,
}

impl AlignmentMetadata {
    /// Model family of the applied transform.
    #[must_use]
    pub const fn kind(&self) -> TransformKind {
        self.transform.kind()
    }
}

/// The durable output of one detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    /// Asset identifier, used only for labeling.
    pub asset_id: String,
    /// Worst label over all blobs (`Normal` when there are none).
    pub image_label: FaultLabel,
    /// Per-blob descriptors and verdicts.
    pub blobs: Vec<BlobReport>,
    /// Registration metadata.
    pub alignment: AlignmentMetadata,
    /// Threshold values and provenance.
    pub thresholds: ThresholdSet,
    /// Baseline (and output) geometry.
    pub dimensions: Dimensions,
}

impl DetectionReport {
    /// Count blobs with the given label.
    #[must_use]
    pub fn count(&self, label: FaultLabel) -> usize {
        self.blobs
            .iter()
            .filter(|b| b.classification.label() == label)
            .count()
    }
}

/// Which of the two input images an error concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageRole {
    /// The reference photograph.
    Baseline,
    /// The later inspection photograph.
    Maintenance,
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Baseline => f.write_str("baseline"),
            Self::Maintenance => f.write_str("maintenance"),
        }
    }
}

/// Fatal errors that abort a detection run.
///
/// Registration degradation is deliberately absent: it is recorded in
/// [`AlignmentMetadata::degradation`] and the run continues.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// The input image bytes were empty.
    #[error("{0} image data is empty")]
    EmptyInput(ImageRole),

    /// Failed to decode an input image.
    #[error("failed to decode {role} image: {source}")]
    ImageDecode {
        /// Which image.
        role: ImageRole,
        /// Decoder error.
        #[source]
        source: image::ImageError,
    },

    /// An input image has no pixels.
    #[error("{0} image has zero width or height")]
    ZeroSizedImage(ImageRole),

    /// Two rasters that must share geometry do not.
    #[error("shape mismatch in {stage}: expected {expected}, found {found}")]
    ShapeMismatch {
        /// Stage that detected the mismatch.
        stage: &'static str,
        /// Expected dimensions.
        expected: Dimensions,
        /// Actual dimensions.
        found: Dimensions,
    },

    /// A transform matrix does not fit its declared model.
    #[error("transform matrix is not a valid {expected} model")]
    TransformShape {
        /// Declared model family.
        expected: TransformKind,
    },

    /// Detection configuration is invalid.
    #[error("invalid detection configuration: {0}")]
    InvalidConfig(String),
}

impl DetectError {
    /// Whether the error is about unreadable input rather than an
    /// internal defect.
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput(_) | Self::ImageDecode { .. } | Self::ZeroSizedImage(_)
        )
    }
}

/// Fail with [`DetectError::ShapeMismatch`] unless `found == expected`.
pub(crate) fn ensure_dimensions(
    stage: &'static str,
    expected: Dimensions,
    found: Dimensions,
) -> Result<(), DetectError> {
    if expected == found {
        Ok(())
    } else {
        Err(DetectError::ShapeMismatch {
            stage,
            expected,
            found,
        })
    }
}
