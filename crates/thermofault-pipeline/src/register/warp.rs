//! Inverse-mapping warps of maintenance rasters onto baseline geometry.

use image::Rgb;
use imageproc::geometric_transformations::{Interpolation, warp_with};

use crate::types::{RgbImage, Transform};

/// Where a baseline pixel samples the maintenance image. Points sent to
/// infinity sample outside the raster and take the fill value.
#[allow(clippy::cast_possible_truncation)]
fn source_of(transform: Transform) -> impl Fn(f32, f32) -> (f32, f32) + Send + Sync {
    move |x, y| {
        transform
            .apply(f64::from(x), f64::from(y))
            .map_or((-1.0, -1.0), |(u, v)| (u as f32, v as f32))
    }
}

/// Warp a color raster: `out(x, y) = image(T(x, y))`, bilinear, black
/// outside the source.
#[must_use = "returns the warped image"]
pub fn warp_rgb(image: &RgbImage, transform: Transform) -> RgbImage {
    if transform == Transform::identity() {
        return image.clone();
    }
    warp_with(
        image,
        source_of(transform),
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
    )
}
