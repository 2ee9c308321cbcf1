//! Planar homography estimation via DLT with Hartley normalization,
//! wrapped in a seeded RANSAC loop.

use nalgebra::{DMatrix, Matrix3, SymmetricEigen, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Homography fitting failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HomographyError {
    /// Fewer correspondences than the four a homography needs.
    #[error("too few correspondences: need {needed}, got {got}")]
    TooFewPoints {
        /// Required count.
        needed: usize,
        /// Supplied count.
        got: usize,
    },

    /// The linear system was degenerate (collinear or coincident points).
    #[error("degenerate correspondence set")]
    Degenerate,

    /// RANSAC never found a model with enough support.
    #[error("insufficient inliers: need {needed}, found {found}")]
    InsufficientInliers {
        /// Required inliers.
        needed: usize,
        /// Best inlier count found.
        found: usize,
    },
}

/// Project a point through a homography. `None` at infinity.
#[must_use]
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> Option<[f64; 2]> {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-12 {
        return None;
    }
    Some([p[0] / p[2], p[1] / p[2]])
}

/// Distance between `project(h, src)` and `dst`; infinite when the
/// projection is undefined.
#[must_use]
pub fn reprojection_error(h: &Matrix3<f64>, src: [f64; 2], dst: [f64; 2]) -> f64 {
    project(h, src[0], src[1]).map_or(f64::INFINITY, |p| (p[0] - dst[0]).hypot(p[1] - dst[1]))
}

/// Translate the centroid to the origin and scale the mean distance
/// from it to sqrt(2).
#[allow(clippy::cast_precision_loss)]
fn normalize_points(pts: &[[f64; 2]]) -> (Matrix3<f64>, Vec<[f64; 2]>) {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist = pts.iter().map(|p| (p[0] - cx).hypot(p[1] - cy)).sum::<f64>() / n;
    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts
        .iter()
        .map(|p| [s * (p[0] - cx), s * (p[1] - cy)])
        .collect();
    (t, normalized)
}

/// Estimate `H` with `dst ≈ project(H, src)` from at least four
/// correspondences.
///
/// # Errors
///
/// [`HomographyError::TooFewPoints`] for fewer than four pairs or
/// mismatched slices, [`HomographyError::Degenerate`] when the solution
/// is not a usable projective map.
pub fn estimate_dlt(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Result<Matrix3<f64>, HomographyError> {
    let n = src.len().min(dst.len());
    if n < 4 || src.len() != dst.len() {
        return Err(HomographyError::TooFewPoints { needed: 4, got: n });
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = DMatrix::zeros(2 * n, 9);
    for (i, (s, d)) in src_n.iter().zip(&dst_n).enumerate() {
        let (sx, sy) = (s[0], s[1]);
        let (dx, dy) = (d[0], d[1]);

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // Null vector of A = eigenvector of AᵀA with the smallest eigenvalue.
    let eig = SymmetricEigen::new(a.transpose() * &a);
    let min_idx = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.abs().total_cmp(&y.1.abs()))
        .map_or(0, |(i, _)| i);
    let h_vec = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(
        h_vec[0], h_vec[1], h_vec[2], h_vec[3], h_vec[4], h_vec[5], h_vec[6], h_vec[7], h_vec[8],
    );

    let t_dst_inv = t_dst.try_inverse().ok_or(HomographyError::Degenerate)?;
    let h = t_dst_inv * h_norm * t_src;
    let scale = h[(2, 2)];
    if scale.abs() < 1e-12 || !h.iter().all(|v| v.is_finite()) {
        return Err(HomographyError::Degenerate);
    }
    let h = h / scale;
    if h.determinant().abs() < 1e-12 {
        return Err(HomographyError::Degenerate);
    }
    Ok(h)
}

/// RANSAC parameters.
#[derive(Debug, Clone, Copy)]
pub struct RansacParams {
    /// Iteration cap.
    pub max_iterations: usize,
    /// Inlier reprojection threshold in pixels.
    pub inlier_threshold: f64,
    /// Minimum support for an accepted model.
    pub min_inliers: usize,
    /// RNG seed.
    pub seed: u64,
}

/// A RANSAC-fitted homography.
#[derive(Debug, Clone)]
pub struct RansacFit {
    /// Model refit on all inliers.
    pub h: Matrix3<f64>,
    /// Per-correspondence inlier flags.
    pub inliers: Vec<bool>,
    /// Number of inliers.
    pub inlier_count: usize,
}

impl RansacFit {
    /// Inlier share of all correspondences.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn inlier_ratio(&self) -> f64 {
        if self.inliers.is_empty() {
            0.0
        } else {
            self.inlier_count as f64 / self.inliers.len() as f64
        }
    }
}

fn inlier_mask(h: &Matrix3<f64>, src: &[[f64; 2]], dst: &[[f64; 2]], threshold: f64) -> Vec<bool> {
    src.iter()
        .zip(dst)
        .map(|(s, d)| reprojection_error(h, *s, *d) < threshold)
        .collect()
}

/// Fit a homography robustly. Deterministic for a given seed.
///
/// # Errors
///
/// [`HomographyError::TooFewPoints`] for fewer than four pairs and
/// [`HomographyError::InsufficientInliers`] when no sampled model
/// reaches `min_inliers`.
pub fn fit_ransac(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    params: &RansacParams,
) -> Result<RansacFit, HomographyError> {
    let n = src.len().min(dst.len());
    if n < 4 {
        return Err(HomographyError::TooFewPoints { needed: 4, got: n });
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(Matrix3<f64>, Vec<bool>, usize)> = None;

    for _ in 0..params.max_iterations {
        let sample = rand::seq::index::sample(&mut rng, n, 4);
        let s4: Vec<[f64; 2]> = sample.iter().map(|i| src[i]).collect();
        let d4: Vec<[f64; 2]> = sample.iter().map(|i| dst[i]).collect();
        let Ok(h) = estimate_dlt(&s4, &d4) else {
            continue;
        };

        let mask = inlier_mask(&h, &src[..n], &dst[..n], params.inlier_threshold);
        let count = mask.iter().filter(|&&m| m).count();
        if best.as_ref().is_none_or(|b| count > b.2) {
            let done = count * 10 > n * 9;
            best = Some((h, mask, count));
            if done {
                break;
            }
        }
    }

    let found = best.as_ref().map_or(0, |b| b.2);
    let needed = params.min_inliers.max(4);
    let Some((best_h, best_mask, _)) = best.filter(|b| b.2 >= needed) else {
        return Err(HomographyError::InsufficientInliers { needed, found });
    };

    let inlier_src: Vec<[f64; 2]> = (0..n).filter(|&i| best_mask[i]).map(|i| src[i]).collect();
    let inlier_dst: Vec<[f64; 2]> = (0..n).filter(|&i| best_mask[i]).map(|i| dst[i]).collect();
    let h = estimate_dlt(&inlier_src, &inlier_dst).unwrap_or(best_h);
    let inliers = inlier_mask(&h, &src[..n], &dst[..n], params.inlier_threshold);
    let inlier_count = inliers.iter().filter(|&&m| m).count();
    Ok(RansacFit {
        h,
        inliers,
        inlier_count,
    })
}
