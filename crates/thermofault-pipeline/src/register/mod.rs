//! Registration: align the maintenance image onto baseline geometry.
//!
//! This module defines the [`Registrar`] trait for pluggable alignment
//! strategies, implemented for [`RegistrationStrategy`] so a
//! configuration can name an ordered strategy chain. Strategies are
//! tried in order until one succeeds; if none does, the identity
//! transform is used and the failure is recorded as a
//! [`RegistrationDegraded`] value rather than returned as an error.

pub mod ecc;
pub mod features;
pub mod homography;
pub mod warp;

use image::GrayImage;
use tracing::{debug, warn};

use crate::config::RegistrationConfig;
use crate::downsample::resize_to;
use crate::grayscale::to_gray;
use crate::types::{
    Dimensions, ImageRole, RegistrationDegraded, RegistrationStrategy, RgbImage,
    StrategyFailure, Transform, TransformKind,
};

pub use homography::HomographyError;

/// A transform proposed by one strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    /// Baseline → maintenance transform.
    pub transform: Transform,
    /// Correlation (area) or inlier ratio (feature).
    pub score: f64,
}

/// Why a single strategy produced no alignment.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistrationFailure {
    /// The exclusion mask left nothing to correlate.
    #[error("no usable pixels after masking")]
    NoValidPixels,

    /// The warp pushed too much of the template outside the input.
    #[error("warped overlap {overlap:.2} below minimum {minimum:.2}")]
    InsufficientOverlap {
        /// Fraction of template pixels still inside the input.
        overlap: f64,
        /// Configured floor.
        minimum: f64,
    },

    /// Template or warped input is constant.
    #[error("template or warped image has zero variance")]
    ZeroVariance,

    /// The Gauss-Newton Hessian could not be inverted.
    #[error("ill-conditioned update: singular Hessian")]
    SingularHessian,

    /// The update would minimize the correlation.
    #[error("correlation is decreasing; images may be uncorrelated or non-overlapping")]
    CorrelationDecreasing,

    /// The estimate left the finite domain.
    #[error("estimate diverged")]
    Diverged,

    /// No usable keypoints in one image.
    #[error("no keypoints found in {0} image")]
    NoKeypoints(ImageRole),

    /// Too few matches survived the ratio test.
    #[error("{found} matches survived the ratio test, need {required}")]
    InsufficientMatches {
        /// Surviving matches.
        found: usize,
        /// Configured minimum.
        required: usize,
    },

    /// Robust homography fit failed.
    #[error("homography fit failed: {0}")]
    Homography(#[from] HomographyError),
}

/// Trait for registration strategies.
///
/// Input: baseline and maintenance grayscale rasters of equal size.
/// Output: a baseline → maintenance transform with its score.
pub trait Registrar {
    /// Model family this strategy produces.
    fn kind(&self) -> TransformKind;

    /// Estimate the alignment.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistrationFailure`] describing why no alignment was
    /// found.
    fn estimate(
        &self,
        base: &GrayImage,
        moving: &GrayImage,
        config: &RegistrationConfig,
    ) -> Result<Estimate, RegistrationFailure>;
}

impl Registrar for RegistrationStrategy {
    fn kind(&self) -> TransformKind {
        match self {
            Self::AreaCorrelation => TransformKind::Affine,
            Self::FeatureHomography => TransformKind::Homography,
        }
    }

    fn estimate(
        &self,
        base: &GrayImage,
        moving: &GrayImage,
        config: &RegistrationConfig,
    ) -> Result<Estimate, RegistrationFailure> {
        match self {
            Self::AreaCorrelation => ecc::estimate(base, moving, config),
            Self::FeatureHomography => features::estimate(base, moving, config),
        }
    }
}

/// Baseline raster plus the maintenance raster warped onto it.
#[derive(Debug, Clone)]
pub struct RegisteredPair {
    base: RgbImage,
    warped: RgbImage,
    transform: Transform,
    success: bool,
    strategy: Option<RegistrationStrategy>,
    score: f64,
    resized: bool,
    degradation: Option<RegistrationDegraded>,
}

impl RegisteredPair {
    /// Baseline color raster.
    #[must_use]
    pub const fn base(&self) -> &RgbImage {
        &self.base
    }

    /// Maintenance color raster in baseline geometry.
    #[must_use]
    pub const fn warped(&self) -> &RgbImage {
        &self.warped
    }

    /// Applied transform.
    #[must_use]
    pub const fn transform(&self) -> Transform {
        self.transform
    }

    /// Model family of the applied transform.
    #[must_use]
    pub const fn kind(&self) -> TransformKind {
        self.transform.kind()
    }

    /// Whether any strategy succeeded.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.success
    }

    /// Strategy that produced the transform.
    #[must_use]
    pub const fn strategy(&self) -> Option<RegistrationStrategy> {
        self.strategy
    }

    /// Alignment score of the successful strategy, 0 on failure.
    #[must_use]
    pub const fn score(&self) -> f64 {
        self.score
    }

    /// Whether the maintenance image was resized first.
    #[must_use]
    pub const fn resized(&self) -> bool {
        self.resized
    }

    /// Degradation record, if the primary strategy did not succeed.
    #[must_use]
    pub const fn degradation(&self) -> Option<&RegistrationDegraded> {
        self.degradation.as_ref()
    }

    /// Shared geometry of both rasters.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::of(&self.base)
    }
}

/// Align `maintenance` onto `base`.
///
/// The maintenance image is first resized to the baseline's dimensions,
/// then each strategy in `config.strategies` is tried in order. The
/// first success is applied to the color raster with inverse mapping.
/// Never fails: when every strategy fails, the identity transform is
/// applied and `success` is false.
#[must_use]
pub fn register(
    base: &RgbImage,
    maintenance: &RgbImage,
    config: &RegistrationConfig,
) -> RegisteredPair {
    let target = Dimensions::of(base);
    let (resized_maintenance, resized) = resize_to(maintenance, target);
    if resized {
        debug!(
            from = %Dimensions::of(maintenance),
            to = %target,
            "resized maintenance image to baseline geometry"
        );
    }

    let base_gray = to_gray(base);
    let moving_gray = to_gray(&resized_maintenance);

    let mut failures = Vec::new();
    for strategy in &config.strategies {
        match strategy.estimate(&base_gray, &moving_gray, config) {
            Ok(estimate) => {
                debug!(%strategy, score = estimate.score, "registration succeeded");
                let degradation = if failures.is_empty() {
                    None
                } else {
                    warn!(
                        %strategy,
                        failed = failures.len(),
                        "registration fell back to a later strategy"
                    );
                    Some(RegistrationDegraded::FallbackEngaged { failures })
                };
                return RegisteredPair {
                    warped: warp::warp_rgb(&resized_maintenance, estimate.transform),
                    base: base.clone(),
                    transform: estimate.transform,
                    success: true,
                    strategy: Some(*strategy),
                    score: estimate.score,
                    resized,
                    degradation,
                };
            }
            Err(failure) => {
                debug!(%strategy, %failure, "registration strategy failed");
                failures.push(StrategyFailure {
                    strategy: *strategy,
                    reason: failure.to_string(),
                });
            }
        }
    }

    warn!(
        attempted = failures.len(),
        "all registration strategies failed; using identity transform"
    );
    RegisteredPair {
        base: base.clone(),
        warped: resized_maintenance,
        transform: Transform::identity(),
        success: false,
        strategy: None,
        score: 0.0,
        resized,
        degradation: Some(RegistrationDegraded::AllStrategiesFailed { failures }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    /// Piecewise-constant colour scene of random rectangles, shifted by
    /// `(dx, dy)`.
    fn rectangles(width: u32, height: u32, dx: i64, dy: i64) -> RgbImage {
        let mut rng = StdRng::seed_from_u64(42);
        let rects: Vec<(i64, i64, i64, i64, u8)> = (0..70)
            .map(|_| {
                (
                    rng.gen_range(0..i64::from(width)),
                    rng.gen_range(0..i64::from(height)),
                    rng.gen_range(6..24),
                    rng.gen_range(6..24),
                    rng.gen_range(0..=255),
                )
            })
            .collect();
        RgbImage::from_fn(width, height, |x, y| {
            let (sx, sy) = (i64::from(x) - dx, i64::from(y) - dy);
            let v = rects
                .iter()
                .rev()
                .find(|(rx, ry, rw, rh, _)| sx >= *rx && sx < rx + rw && sy >= *ry && sy < ry + rh)
                .map_or(90, |r| r.4);
            image::Rgb([v, v, v.saturating_add(20)])
        })
    }

    fn all_failures(pair: &RegisteredPair) -> Vec<StrategyFailure> {
        match pair.degradation() {
            Some(RegistrationDegraded::AllStrategiesFailed { failures }) => failures.clone(),
            _ => Vec::new(),
        }
    }

    fn fallback_failures(pair: &RegisteredPair) -> Vec<StrategyFailure> {
        match pair.degradation() {
            Some(RegistrationDegraded::FallbackEngaged { failures }) => failures.clone(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn strategy_kinds_are_explicit() {
        assert_eq!(RegistrationStrategy::AreaCorrelation.kind(), TransformKind::Affine);
        assert_eq!(
            RegistrationStrategy::FeatureHomography.kind(),
            TransformKind::Homography
        );
    }

    #[test]
    fn textureless_pair_degrades_to_identity() {
        let flat = RgbImage::from_pixel(80, 60, image::Rgb([40, 40, 160]));
        let pair = register(&flat, &flat, &RegistrationConfig::default());
        assert!(!pair.success());
        assert_eq!(pair.transform(), Transform::identity());
        assert_eq!(pair.strategy(), None);
        let failures = all_failures(&pair);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].strategy, RegistrationStrategy::AreaCorrelation);
    }

    #[test]
    fn large_shift_falls_back_to_feature_homography() {
        let base = rectangles(220, 180, 0, 0);
        let maintenance = rectangles(220, 180, 25, 15);
        let pair = register(&base, &maintenance, &RegistrationConfig::default());

        assert!(pair.success());
        assert_eq!(pair.strategy(), Some(RegistrationStrategy::FeatureHomography));
        assert_eq!(pair.kind(), TransformKind::Homography);
        assert!(matches!(
            pair.degradation(),
            Some(RegistrationDegraded::FallbackEngaged { .. })
        ));
        let failures = fallback_failures(&pair);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].strategy, RegistrationStrategy::AreaCorrelation);

        let (u, v) = pair.transform().apply(100.0, 100.0).unwrap();
        assert!((u - 125.0).abs() < 1.0, "u = {u}");
        assert!((v - 115.0).abs() < 1.0, "v = {v}");

        // Inside the overlap the warped raster reproduces the baseline,
        // apart from resampling along rectangle edges.
        let (mut total, mut close) = (0u32, 0u32);
        for y in 5..160 {
            for x in 5..190 {
                total += 1;
                let a = base.get_pixel(x, y).0;
                let b = pair.warped().get_pixel(x, y).0;
                if a.iter().zip(b).all(|(&p, q)| p.abs_diff(q) <= 24) {
                    close += 1;
                }
            }
        }
        let agreement = f64::from(close) / f64::from(total);
        assert!(agreement > 0.7, "agreement {agreement:.3}");
    }

    #[test]
    fn maintenance_is_resized_to_baseline_geometry() {
        let base = RgbImage::from_pixel(64, 48, image::Rgb([10, 10, 10]));
        let maintenance = RgbImage::from_pixel(128, 96, image::Rgb([10, 10, 10]));
        let pair = register(&base, &maintenance, &RegistrationConfig::default());
        assert!(pair.resized());
        assert_eq!(Dimensions::of(pair.warped()), Dimensions::of(&base));
    }

    #[test]
    fn fallback_only_chain_is_honoured() {
        let flat = RgbImage::from_pixel(80, 60, image::Rgb([0, 0, 0]));
        let cfg = RegistrationConfig {
            strategies: vec![RegistrationStrategy::FeatureHomography],
            ..RegistrationConfig::default()
        };
        let pair = register(&flat, &flat, &cfg);
        let failures = all_failures(&pair);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].strategy, RegistrationStrategy::FeatureHomography);
    }
}
