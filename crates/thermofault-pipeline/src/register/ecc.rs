//! Enhanced-correlation-coefficient (ECC) area registration.
//!
//! Maximizes the zero-mean normalized correlation between the template
//! (baseline) and the warped input (maintenance) over a 6-DOF affine
//! warp, using the Gauss-Newton style update of Evangelidis and Psarakis.
//! Both images are reduced to Sobel gradient magnitude first, and only
//! pixels inside the exclusion mask take part.

use image::GrayImage;
use nalgebra::{Matrix3, Matrix6, Vector6};
use tracing::debug;

use super::{Estimate, RegistrationFailure};
use crate::config::RegistrationConfig;
use crate::downsample::{Scale, downsample_gray};
use crate::edge::gradient_magnitude;
use crate::mask::{exclusion_mask, is_on};
use crate::types::{ScalarField, Transform, TransformKind};

/// Central-difference derivatives with replicated borders.
#[allow(clippy::cast_precision_loss)]
fn central_differences(field: &ScalarField) -> (ScalarField, ScalarField) {
    let (w, h) = (field.width(), field.height());
    let gx = ScalarField::from_fn(w, h, |x, y| {
        let l = x.saturating_sub(1);
        let r = (x + 1).min(w.saturating_sub(1));
        let span = (r - l).max(1) as f32;
        (field.get(r, y) - field.get(l, y)) / span
    });
    let gy = ScalarField::from_fn(w, h, |x, y| {
        let t = y.saturating_sub(1);
        let b = (y + 1).min(h.saturating_sub(1));
        let span = (b - t).max(1) as f32;
        (field.get(x, b) - field.get(x, t)) / span
    });
    (gx, gy)
}

fn affine(p: &Vector6<f64>) -> Transform {
    Transform::Affine([[p[0], p[1], p[2]], [p[3], p[4], p[5]]])
}

/// Lift an affine estimated on a downsampled grid to full resolution:
/// `M_full = S⁻¹ · M · S`.
fn rescale(transform: Transform, scale: Scale) -> Result<Transform, RegistrationFailure> {
    if scale.is_identity() {
        return Ok(transform);
    }
    let s = Matrix3::new(scale.x, 0.0, 0.0, 0.0, scale.y, 0.0, 0.0, 0.0, 1.0);
    let s_inv = Matrix3::new(1.0 / scale.x, 0.0, 0.0, 0.0, 1.0 / scale.y, 0.0, 0.0, 0.0, 1.0);
    Transform::from_matrix3(TransformKind::Affine, &(s_inv * transform.to_matrix3() * s))
        .map_err(|_| RegistrationFailure::Diverged)
}

struct Sample {
    x: f64,
    y: f64,
    template: f64,
    image: f64,
    gx: f64,
    gy: f64,
}

impl Sample {
    /// Derivative of the warped intensity with respect to the six
    /// affine parameters `[a00 a01 a02 a10 a11 a12]`.
    fn jacobian(&self) -> Vector6<f64> {
        Vector6::new(
            self.gx * self.x,
            self.gx * self.y,
            self.gx,
            self.gy * self.x,
            self.gy * self.y,
            self.gy,
        )
    }
}

/// Estimate the baseline → maintenance affine.
///
/// # Errors
///
/// Returns a [`RegistrationFailure`] when the correlation cannot be
/// optimized: no usable pixels, too little overlap, zero variance, an
/// ill-conditioned Hessian, a non-positive correlation denominator, or a
/// non-finite estimate. Hitting the iteration cap is not a failure.
#[allow(clippy::cast_precision_loss, clippy::many_single_char_names)]
pub fn estimate(
    base: &GrayImage,
    moving: &GrayImage,
    config: &RegistrationConfig,
) -> Result<Estimate, RegistrationFailure> {
    let (base_small, scale) = downsample_gray(base, config.max_dimension);
    let (moving_small, _) = downsample_gray(moving, config.max_dimension);

    let template = gradient_magnitude(&base_small, config.edge_blur_sigma);
    let input = gradient_magnitude(&moving_small, config.edge_blur_sigma);
    let (grad_x, grad_y) = central_differences(&input);
    let mask = exclusion_mask(
        template.dimensions(),
        config.legend_fraction,
        config.sky_fraction,
    );

    let coords: Vec<(u32, u32)> = (0..template.height())
        .flat_map(|y| (0..template.width()).map(move |x| (x, y)))
        .filter(|&(x, y)| is_on(&mask, x, y))
        .collect();
    if coords.is_empty() {
        return Err(RegistrationFailure::NoValidPixels);
    }

    let mut p = Vector6::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0);
    let mut rho = -1.0_f64;
    let mut last_rho = -config.epsilon;
    let mut iterations = 0u32;
    let mut samples: Vec<Sample> = Vec::with_capacity(coords.len());

    while iterations < config.max_iterations && (rho - last_rho).abs() >= config.epsilon {
        iterations += 1;
        let warp = affine(&p);

        samples.clear();
        for &(x, y) in &coords {
            let (fx, fy) = (f64::from(x), f64::from(y));
            let Some((u, v)) = warp.apply(fx, fy) else {
                continue;
            };
            if let (Some(i), Some(gx), Some(gy)) =
                (input.sample(u, v), grad_x.sample(u, v), grad_y.sample(u, v))
            {
                samples.push(Sample {
                    x: fx,
                    y: fy,
                    template: f64::from(template.get(x, y)),
                    image: f64::from(i),
                    gx: f64::from(gx),
                    gy: f64::from(gy),
                });
            }
        }

        let overlap = samples.len() as f64 / coords.len() as f64;
        if samples.is_empty() || overlap < config.min_overlap {
            return Err(RegistrationFailure::InsufficientOverlap {
                overlap,
                minimum: config.min_overlap,
            });
        }

        let n = samples.len() as f64;
        let t_mean = samples.iter().map(|s| s.template).sum::<f64>() / n;
        let i_mean = samples.iter().map(|s| s.image).sum::<f64>() / n;

        let mut hessian = Matrix6::<f64>::zeros();
        let mut image_proj = Vector6::<f64>::zeros();
        let mut template_proj = Vector6::<f64>::zeros();
        let (mut t_norm_sq, mut i_norm_sq, mut correlation) = (0.0, 0.0, 0.0);
        for s in &samples {
            let t = s.template - t_mean;
            let i = s.image - i_mean;
            let j = s.jacobian();
            hessian += j * j.transpose();
            image_proj += j * i;
            template_proj += j * t;
            t_norm_sq += t * t;
            i_norm_sq += i * i;
            correlation += t * i;
        }

        let t_norm = t_norm_sq.sqrt();
        let i_norm = i_norm_sq.sqrt();
        if t_norm < 1e-9 || i_norm < 1e-9 {
            return Err(RegistrationFailure::ZeroVariance);
        }

        last_rho = rho;
        rho = correlation / (i_norm * t_norm);
        if !rho.is_finite() {
            return Err(RegistrationFailure::Diverged);
        }

        let hessian_inv = hessian
            .try_inverse()
            .filter(|m| m.iter().all(|v| v.is_finite()))
            .ok_or(RegistrationFailure::SingularHessian)?;
        let image_proj_h = hessian_inv * image_proj;

        let lambda_n = i_norm_sq - image_proj.dot(&image_proj_h);
        let lambda_d = correlation - template_proj.dot(&image_proj_h);
        if lambda_d <= 0.0 {
            return Err(RegistrationFailure::CorrelationDecreasing);
        }
        let lambda = lambda_n / lambda_d;

        let mut error_proj = Vector6::<f64>::zeros();
        for s in &samples {
            let e = lambda * (s.template - t_mean) - (s.image - i_mean);
            let j = s.jacobian();
            error_proj += j * e;
        }
        p += hessian_inv * error_proj;
        if !p.iter().all(|v| v.is_finite()) {
            return Err(RegistrationFailure::Diverged);
        }
    }

    debug!(iterations, rho, "area registration finished");

    let transform = rescale(affine(&p), scale)?;
    if !transform.is_finite() {
        return Err(RegistrationFailure::Diverged);
    }
    Ok(Estimate {
        transform,
        score: rho,
    })
}
