//! Resizing between image geometries.
//!
//! Two distinct jobs live here: bringing the maintenance image onto the
//! baseline's pixel grid before anything else runs, and shrinking large
//! grayscale rasters so the iterative area registration stays cheap.

use image::GrayImage;
use image::imageops::FilterType;

use crate::types::{Dimensions, RgbImage};

/// Resize `image` to exactly `target` with bilinear filtering.
///
/// Returns the (possibly unchanged) image and whether a resize was
/// actually applied.
#[must_use]
pub fn resize_to(image: &RgbImage, target: Dimensions) -> (RgbImage, bool) {
    if Dimensions::of(image) == target {
        return (image.clone(), false);
    }
    let resized = image::imageops::resize(image, target.width, target.height, FilterType::Triangle);
    (resized, true)
}

/// Per-axis factor mapping full-resolution coordinates onto a
/// downsampled raster (`small = full * scale`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    /// Horizontal factor.
    pub x: f64,
    /// Vertical factor.
    pub y: f64,
}

impl Scale {
    /// No scaling.
    pub const IDENTITY: Self = Self { x: 1.0, y: 1.0 };

    /// Whether both factors are exactly one.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn is_identity(self) -> bool {
        self.x == 1.0 && self.y == 1.0
    }
}

/// Downsample a grayscale raster so its longest axis is at most
/// `max_dimension`, preserving aspect ratio.
///
/// Returns the (possibly unchanged) raster and the scale that maps
/// full-resolution coordinates onto it.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn downsample_gray(image: &GrayImage, max_dimension: u32) -> (GrayImage, Scale) {
    let (w, h) = image.dimensions();
    let long_axis = w.max(h);
    if max_dimension == 0 || long_axis <= max_dimension {
        return (image.clone(), Scale::IDENTITY);
    }

    let factor = f64::from(max_dimension) / f64::from(long_axis);
    let new_w = ((f64::from(w) * factor).round() as u32).max(1);
    let new_h = ((f64::from(h) * factor).round() as u32).max(1);
    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let scale = Scale {
        x: f64::from(new_w) / f64::from(w),
        y: f64::from(new_h) / f64::from(h),
    };
    (resized, scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_geometry_is_untouched() {
        let img = RgbImage::from_pixel(40, 30, image::Rgb([10, 20, 30]));
        let (out, resized) = resize_to(
            &img,
            Dimensions {
                width: 40,
                height: 30,
            },
        );
        assert!(!resized);
        assert_eq!(out, img);
    }

    #[test]
    fn resize_hits_exact_target_even_with_aspect_change() {
        let img = RgbImage::from_pixel(64, 48, image::Rgb([200, 100, 0]));
        let target = Dimensions {
            width: 50,
            height: 50,
        };
        let (out, resized) = resize_to(&img, target);
        assert!(resized);
        assert_eq!(Dimensions::of(&out), target);
        // Uniform color survives bilinear resampling.
        assert_eq!(out.get_pixel(25, 25).0, [200, 100, 0]);
    }

    #[test]
    fn small_gray_is_not_downsampled() {
        let img = GrayImage::new(100, 80);
        let (out, scale) = downsample_gray(&img, 480);
        assert!(scale.is_identity());
        assert_eq!(out.dimensions(), (100, 80));
    }

    #[test]
    fn large_gray_is_downsampled_along_long_axis() {
        let img = GrayImage::new(960, 600);
        let (out, scale) = downsample_gray(&img, 480);
        assert_eq!(out.dimensions(), (480, 300));
        assert!((scale.x - 0.5).abs() < 1e-12);
        assert!((scale.y - 0.5).abs() < 1e-12);
    }

    #[test]
    fn portrait_scales_height() {
        let img = GrayImage::new(300, 1200);
        let (out, _) = downsample_gray(&img, 480);
        assert_eq!(out.dimensions(), (120, 480));
    }
}
