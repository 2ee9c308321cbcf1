//! Keypoint registration: FAST-9 corners, BRIEF binary descriptors,
//! ratio-tested Hamming matching and a RANSAC homography.
//!
//! The BRIEF test pattern is drawn from a seeded RNG so that a run is
//! reproducible bit for bit.

use image::GrayImage;
use imageproc::corners::{Corner, corners_fast9};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::homography::{RansacParams, fit_ransac};
use super::{Estimate, RegistrationFailure};
use crate::blur::gaussian_blur;
use crate::config::RegistrationConfig;
use crate::mask::{exclusion_mask, is_on};
use crate::types::{Dimensions, ImageRole, Transform, TransformKind};

/// Half side of the square patch the intensity tests sample from.
const PATCH_RADIUS: i32 = 15;

/// Smoothing applied before intensity tests; BRIEF is noise-sensitive.
const DESCRIPTOR_SIGMA: f32 = 2.0;

const DESCRIPTOR_BITS: usize = 256;

/// 256-bit binary descriptor.
type Descriptor = [u64; 4];

#[derive(Debug, Clone, Copy)]
struct Keypoint {
    x: u32,
    y: u32,
    descriptor: Descriptor,
}

/// Pixel-pair intensity tests, shared by both images.
struct TestPattern(Vec<[i32; 4]>);

impl TestPattern {
    fn seeded(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let pairs = (0..DESCRIPTOR_BITS)
            .map(|_| {
                [
                    rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                    rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                    rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                    rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                ]
            })
            .collect();
        Self(pairs)
    }

    /// Describe the patch centred on `(x, y)`. The caller keeps the
    /// patch inside the image.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    fn describe(&self, smoothed: &GrayImage, x: u32, y: u32) -> Descriptor {
        let at = |dx: i32, dy: i32| {
            let px = (x as i32 + dx) as u32;
            let py = (y as i32 + dy) as u32;
            smoothed.get_pixel(px, py).0[0]
        };
        let mut d = [0u64; 4];
        for (bit, t) in self.0.iter().enumerate() {
            if at(t[0], t[1]) < at(t[2], t[3]) {
                d[bit / 64] |= 1 << (bit % 64);
            }
        }
        d
    }
}

fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Detect and describe up to `max_keypoints` corners inside the
/// exclusion mask, strongest first.
#[allow(clippy::cast_sign_loss)]
fn keypoints(
    image: &GrayImage,
    pattern: &TestPattern,
    config: &RegistrationConfig,
) -> Vec<Keypoint> {
    let dims = Dimensions::of(image);
    let margin = PATCH_RADIUS as u32 + 1;
    if dims.width <= 2 * margin || dims.height <= 2 * margin {
        return Vec::new();
    }
    let mask = exclusion_mask(dims, config.legend_fraction, config.sky_fraction);

    let mut corners: Vec<Corner> = corners_fast9(image, config.fast_threshold)
        .into_iter()
        .filter(|c| {
            c.x >= margin
                && c.y >= margin
                && c.x < dims.width - margin
                && c.y < dims.height - margin
                && is_on(&mask, c.x, c.y)
        })
        .collect();
    corners.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.y.cmp(&b.y))
            .then(a.x.cmp(&b.x))
    });
    corners.truncate(config.max_keypoints);

    let smoothed = gaussian_blur(image, DESCRIPTOR_SIGMA);
    corners
        .into_iter()
        .map(|c| Keypoint {
            x: c.x,
            y: c.y,
            descriptor: pattern.describe(&smoothed, c.x, c.y),
        })
        .collect()
}

/// Brute-force nearest neighbour with the second-nearest ratio test.
/// Returns `(base index, moving index)` pairs.
fn match_descriptors(base: &[Keypoint], moving: &[Keypoint], ratio: f64) -> Vec<(usize, usize)> {
    let mut matches = Vec::new();
    for (bi, b) in base.iter().enumerate() {
        let mut best = (u32::MAX, usize::MAX);
        let mut second = u32::MAX;
        for (mi, m) in moving.iter().enumerate() {
            let d = hamming(&b.descriptor, &m.descriptor);
            if d < best.0 {
                second = best.0;
                best = (d, mi);
            } else if d < second {
                second = d;
            }
        }
        if best.1 == usize::MAX || second == 0 {
            continue;
        }
        let unique = second == u32::MAX || f64::from(best.0) <= ratio * f64::from(second);
        if unique {
            matches.push((bi, best.1));
        }
    }
    matches
}

/// Estimate the baseline → maintenance homography from keypoints.
///
/// # Errors
///
/// [`RegistrationFailure::NoKeypoints`] when either image yields no
/// usable corners, [`RegistrationFailure::InsufficientMatches`] when
/// fewer than `min_matches` survive the ratio test, and
/// [`RegistrationFailure::Homography`] when RANSAC finds no consensus.
pub fn estimate(
    base: &GrayImage,
    moving: &GrayImage,
    config: &RegistrationConfig,
) -> Result<Estimate, RegistrationFailure> {
    let pattern = TestPattern::seeded(config.seed);
    let base_kp = keypoints(base, &pattern, config);
    if base_kp.is_empty() {
        return Err(RegistrationFailure::NoKeypoints(ImageRole::Baseline));
    }
    let moving_kp = keypoints(moving, &pattern, config);
    if moving_kp.is_empty() {
        return Err(RegistrationFailure::NoKeypoints(ImageRole::Maintenance));
    }

    let matches = match_descriptors(&base_kp, &moving_kp, config.ratio_test);
    debug!(
        base_keypoints = base_kp.len(),
        maintenance_keypoints = moving_kp.len(),
        matches = matches.len(),
        "keypoint matching finished"
    );
    if matches.len() < config.min_matches {
        return Err(RegistrationFailure::InsufficientMatches {
            found: matches.len(),
            required: config.min_matches,
        });
    }

    let src: Vec<[f64; 2]> = matches
        .iter()
        .map(|&(b, _)| [f64::from(base_kp[b].x), f64::from(base_kp[b].y)])
        .collect();
    let dst: Vec<[f64; 2]> = matches
        .iter()
        .map(|&(_, m)| [f64::from(moving_kp[m].x), f64::from(moving_kp[m].y)])
        .collect();
    let fit = fit_ransac(
        &src,
        &dst,
        &RansacParams {
            max_iterations: config.ransac_iterations,
            inlier_threshold: config.ransac_threshold,
            min_inliers: config.min_matches,
            seed: config.seed,
        },
    )?;

    let transform = Transform::from_matrix3(TransformKind::Homography, &fit.h)
        .map_err(|_| RegistrationFailure::Diverged)?;
    Ok(Estimate {
        transform,
        score: fit.inlier_ratio(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Piecewise-constant scene of random rectangles, shifted by
    /// `(dx, dy)`.
    fn rectangles(width: u32, height: u32, dx: i64, dy: i64) -> GrayImage {
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
        GrayImage::from_fn(width, height, |x, y| {
            let (sx, sy) = (i64::from(x) - dx, i64::from(y) - dy);
            let v = rects
                .iter()
                .rev()
                .find(|(rx, ry, rw, rh, _)| sx >= *rx && sx < rx + rw && sy >= *ry && sy < ry + rh)
                .map_or(90, |r| r.4);
            image::Luma([v])
        })
    }

    #[test]
    fn hamming_counts_differing_bits() {
        assert_eq!(hamming(&[0, 0, 0, 0], &[0b1011, 0, 1, u64::MAX]), 3 + 1 + 64);
    }

    #[test]
    fn ratio_test_drops_ambiguous_matches() {
        let kp = |d: Descriptor| Keypoint {
            x: 0,
            y: 0,
            descriptor: d,
        };
        let base = [kp([0b1111, 0, 0, 0])];
        let distinct = [kp([0b1111, 0, 0, 0]), kp([u64::MAX, 0, 0, 0])];
        assert_eq!(match_descriptors(&base, &distinct, 0.75), vec![(0, 0)]);
        let ambiguous = [kp([0b0111, 0, 0, 0]), kp([0b1110, 0, 0, 0])];
        assert!(match_descriptors(&base, &ambiguous, 0.75).is_empty());
    }

    #[test]
    fn recovers_a_translation() {
        let base = rectangles(220, 180, 0, 0);
        let moving = rectangles(220, 180, 5, 3);
        let est = estimate(&base, &moving, &RegistrationConfig::default()).unwrap();
        let (u, v) = est.transform.apply(100.0, 100.0).unwrap();
        assert!((u - 105.0).abs() < 1.0, "u = {u}");
        assert!((v - 103.0).abs() < 1.0, "v = {v}");
        assert!(est.score > 0.5);
    }

    #[test]
    fn estimate_is_deterministic() {
        let base = rectangles(220, 180, 0, 0);
        let moving = rectangles(220, 180, 4, -2);
        let cfg = RegistrationConfig::default();
        let a = estimate(&base, &moving, &cfg).unwrap();
        let b = estimate(&base, &moving, &cfg).unwrap();
        assert_eq!(a.transform, b.transform);
    }

    #[test]
    fn textureless_images_have_no_keypoints() {
        let flat = GrayImage::from_pixel(100, 100, image::Luma([128]));
        assert_eq!(
            estimate(&flat, &flat, &RegistrationConfig::default()).unwrap_err(),
            RegistrationFailure::NoKeypoints(ImageRole::Baseline)
        );
    }
}
