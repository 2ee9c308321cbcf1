//! Immutable rule configuration passed into every stage.
//!
//! Every numeric constant the detector depends on lives here rather than
//! in the stage modules, so a run is fully described by its inputs plus
//! one [`DetectionConfig`] value. The defaults are calibrated for an
//! iron/rainbow false-color palette; the color bands and coverage splits
//! are camera-specific and may need recalibration for other cameras.
//!
//! All structs use `#[serde(default)]`, so a partial JSON document
//! overrides only the fields it names.

use serde::{Deserialize, Serialize};

use crate::types::{DetectError, RegistrationStrategy};

/// Top-level detection configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Image registration.
    pub registration: RegistrationConfig,
    /// False-color bands that count as "hot".
    pub hot_bands: HotBands,
    /// Candidate mask cleanup.
    pub segmentation: SegmentationConfig,
    /// ΔE threshold derivation.
    pub thresholds: ThresholdConfig,
    /// Connected-component analysis.
    pub blobs: BlobConfig,
    /// Wire skeleton and joint detection.
    pub topology: TopologyConfig,
    /// Decision rules.
    pub classifier: ClassifierConfig,
}

impl DetectionConfig {
    /// Check cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::InvalidConfig`] describing the first
    /// violated invariant.
    pub fn validate(&self) -> Result<(), DetectError> {
        let r = &self.registration;
        if r.strategies.is_empty() {
            return invalid("registration.strategies must not be empty");
        }
        if !(0.0..0.5).contains(&r.legend_fraction) || !(0.0..0.5).contains(&r.sky_fraction) {
            return invalid("registration exclusion fractions must be in [0, 0.5)");
        }
        if r.max_iterations == 0 {
            return invalid("registration.max_iterations must be positive");
        }
        if !(r.ratio_test > 0.0 && r.ratio_test <= 1.0) {
            return invalid("registration.ratio_test must be in (0, 1]");
        }
        if r.min_matches < 4 {
            return invalid("registration.min_matches must be at least 4");
        }
        let t = &self.thresholds;
        if t.high_similarity.fault < t.high_similarity.pot
            || t.low_similarity.fault < t.low_similarity.pot
        {
            return invalid("thresholds: fault base must not be below pot base");
        }
        if t.high_similarity.pot <= 0.0 || t.low_similarity.pot <= 0.0 {
            return invalid("thresholds: pot base must be positive");
        }
        if t.high_clamp.0 > t.high_clamp.1 || t.low_clamp.0 > t.low_clamp.1 {
            return invalid("thresholds: clamp ranges must be ordered (min, max)");
        }
        if t.histogram_bins == 0 || t.histogram_bins > 256 {
            return invalid("thresholds.histogram_bins must be in 1..=256");
        }
        if t.ssim_window < 3 || t.ssim_window % 2 == 0 {
            return invalid("thresholds.ssim_window must be odd and at least 3");
        }
        if self.topology.canny_low > self.topology.canny_high {
            return invalid("topology.canny_low must not exceed topology.canny_high");
        }
        let scale = self.classifier.confidence_scale;
        if scale.is_nan() || scale <= 0.0 {
            return invalid("classifier.confidence_scale must be positive");
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> Result<(), DetectError> {
    Err(DetectError::InvalidConfig(msg.to_string()))
}

/// Registration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Strategies tried in order until one succeeds.
    pub strategies: Vec<RegistrationStrategy>,
    /// Images whose longest side exceeds this are downsampled for the
    /// area-based stage.
    pub max_dimension: u32,
    /// Right-hand fraction of columns excluded (on-image legend).
    pub legend_fraction: f64,
    /// Top fraction of rows excluded (sky / roof).
    pub sky_fraction: f64,
    /// Gaussian sigma applied before gradient filtering.
    pub edge_blur_sigma: f32,
    /// Iteration cap of the area-based optimizer.
    pub max_iterations: u32,
    /// Stop once the correlation improves by less than this.
    pub epsilon: f64,
    /// Minimum fraction of template pixels that must stay inside the
    /// warped image.
    pub min_overlap: f64,
    /// FAST-9 intensity threshold for keypoint detection.
    pub fast_threshold: u8,
    /// Keep at most this many strongest keypoints per image.
    pub max_keypoints: usize,
    /// Reject matches whose best/second-best distance ratio exceeds this.
    pub ratio_test: f64,
    /// Minimum surviving matches before fitting a homography.
    pub min_matches: usize,
    /// RANSAC inlier reprojection threshold in pixels.
    pub ransac_threshold: f64,
    /// RANSAC iteration cap.
    pub ransac_iterations: usize,
    /// Seed for RANSAC sampling and descriptor test pairs.
    pub seed: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            strategies: vec![
                RegistrationStrategy::AreaCorrelation,
                RegistrationStrategy::FeatureHomography,
            ],
            max_dimension: 480,
            legend_fraction: 0.12,
            sky_fraction: 0.15,
            edge_blur_sigma: 1.0,
            max_iterations: 200,
            epsilon: 1e-6,
            min_overlap: 0.25,
            fast_threshold: 20,
            max_keypoints: 1500,
            ratio_test: 0.75,
            min_matches: 8,
            ransac_threshold: 3.0,
            ransac_iterations: 2000,
            seed: 0x7e57_f00d,
        }
    }
}

/// One HSV band in OpenCV units (H 0..179, S and V 0..255).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvBand {
    /// Inclusive lower hue.
    pub hue_min: u8,
    /// Inclusive upper hue.
    pub hue_max: u8,
    /// Minimum saturation.
    pub sat_min: u8,
    /// Minimum value.
    pub val_min: u8,
}

impl HsvBand {
    /// Whether an HSV triple lies inside the band.
    #[must_use]
    pub const fn contains(&self, h: u8, s: u8, v: u8) -> bool {
        h >= self.hue_min && h <= self.hue_max && s >= self.sat_min && v >= self.val_min
    }

    /// Whether a hue (ignoring S and V) lies inside the band.
    #[must_use]
    pub fn contains_hue(&self, h: f64) -> bool {
        h >= f64::from(self.hue_min) && h <= f64::from(self.hue_max)
    }
}

/// Red / orange / yellow bands of the thermal false-color palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotBands {
    /// Red below the hue wrap.
    pub red_low: HsvBand,
    /// Red above the hue wrap.
    pub red_high: HsvBand,
    /// Orange.
    pub orange: HsvBand,
    /// Yellow.
    pub yellow: HsvBand,
}

impl Default for HotBands {
    fn default() -> Self {
        Self {
            red_low: HsvBand {
                hue_min: 0,
                hue_max: 10,
                sat_min: 90,
                val_min: 120,
            },
            red_high: HsvBand {
                hue_min: 170,
                hue_max: 179,
                sat_min: 90,
                val_min: 120,
            },
            orange: HsvBand {
                hue_min: 11,
                hue_max: 25,
                sat_min: 80,
                val_min: 120,
            },
            yellow: HsvBand {
                hue_min: 26,
                hue_max: 35,
                sat_min: 60,
                val_min: 120,
            },
        }
    }
}

/// Morphological cleanup of the candidate mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Opening iterations (speckle removal).
    pub open_iterations: u8,
    /// Closing iterations (gap bridging).
    pub close_iterations: u8,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            open_iterations: 1,
            close_iterations: 2,
        }
    }
}

/// A pot/fault ΔE pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPair {
    /// "Potentially faulty" threshold.
    pub pot: f64,
    /// "Faulty" threshold.
    pub fault: f64,
}

/// Adaptive threshold parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// SSIM at or above which the tight thresholds apply.
    pub ssim_split: f64,
    /// Base thresholds when the registration looks clean.
    pub high_similarity: ThresholdPair,
    /// Base thresholds when the registration looks noisy.
    pub low_similarity: ThresholdPair,
    /// Pot clamp range after sensitivity scaling, clean regime.
    pub high_clamp: (f64, f64),
    /// Pot clamp range after sensitivity scaling, noisy regime.
    pub low_clamp: (f64, f64),
    /// Sensitivity scale at 0 %.
    pub sensitivity_scale_max: f64,
    /// Scale reduction between 0 % and 100 %.
    pub sensitivity_scale_span: f64,
    /// Coarse histogram bin count for the palette check.
    pub histogram_bins: usize,
    /// Histogram correlation below which thresholds are softened.
    pub palette_min_correlation: f64,
    /// ΔE subtracted from both thresholds on palette mismatch.
    pub palette_softening: f64,
    /// Pot floor after softening.
    pub softened_pot_floor: f64,
    /// Fault floor after softening.
    pub softened_fault_floor: f64,
    /// Side of the square SSIM window.
    pub ssim_window: u32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            ssim_split: 0.70,
            high_similarity: ThresholdPair {
                pot: 8.0,
                fault: 12.0,
            },
            low_similarity: ThresholdPair {
                pot: 10.0,
                fault: 14.0,
            },
            high_clamp: (6.0, 11.0),
            low_clamp: (8.0, 13.0),
            sensitivity_scale_max: 1.2,
            sensitivity_scale_span: 0.4,
            histogram_bins: 64,
            palette_min_correlation: 0.60,
            palette_softening: 2.0,
            softened_pot_floor: 6.0,
            softened_fault_floor: 10.0,
            ssim_window: 7,
        }
    }
}

/// Connected-component analysis parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Components smaller than this are speckle.
    pub min_area: u32,
    /// Components smaller than this get the default elongation.
    pub min_shape_pixels: u32,
    /// Elongation at or above which a blob is wire-like.
    pub wire_elongation: f64,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            min_area: 25,
            min_shape_pixels: 10,
            wire_elongation: 3.0,
        }
    }
}

/// Wire skeleton parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Canny low threshold for wire edges.
    pub canny_low: f32,
    /// Canny high threshold for wire edges.
    pub canny_high: f32,
    /// Chebyshev radius of the edge dilation (1 = 3x3).
    pub edge_dilation: u8,
    /// Chebyshev radius of the hot-mask dilation (2 = 5x5).
    pub hot_dilation: u8,
    /// Joint proximity radius in pixels.
    pub joint_radius: f64,
    /// Margin added around a blob's bounding box for coverage sampling.
    pub window_margin: u32,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            canny_low: 50.0,
            canny_high: 150.0,
            edge_dilation: 1,
            hot_dilation: 2,
            joint_radius: 8.0,
            window_margin: 10,
        }
    }
}

/// Decision-rule constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Coverage at or above which heating is read as full-wire.
    pub full_coverage: f64,
    /// Coverage below which heating may be read as a point.
    pub point_coverage: f64,
    /// Cool fraction at or above which the rest of the wire is cool.
    pub rest_cool: f64,
    /// Mean V at or above which a near-joint blob is promoted.
    pub promote_value: f64,
    /// Absolute-heat fraction that promotes joint and point blobs.
    pub promote_heat_fraction: f64,
    /// Absolute-heat fraction that promotes full-wire blobs.
    pub promote_full_heat_fraction: f64,
    /// Minimum V for a hot-band pixel to pass the absolute-heat gate.
    pub heat_gate_value: u8,
    /// V at which any pixel passes the absolute-heat gate (white-hot).
    pub heat_gate_white_value: u8,
    /// Divisor inside the confidence `tanh`.
    pub confidence_scale: f64,
    /// Confidence bonus for red/orange blobs.
    pub red_bonus: f64,
    /// Confidence bonus for yellow blobs.
    pub yellow_bonus: f64,
    /// Confidence bonus when coverage decisively indicates the subtype.
    pub coverage_bonus: f64,
    /// Confidence bonus for loose joints near a joint candidate.
    pub joint_bonus: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            full_coverage: 0.60,
            point_coverage: 0.25,
            rest_cool: 0.60,
            promote_value: 200.0,
            promote_heat_fraction: 0.20,
            promote_full_heat_fraction: 0.40,
            heat_gate_value: 200,
            heat_gate_white_value: 240,
            confidence_scale: 8.0,
            red_bonus: 0.15,
            yellow_bonus: 0.05,
            coverage_bonus: 0.07,
            joint_bonus: 0.05,
        }
    }
}
