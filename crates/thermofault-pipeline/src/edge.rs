//! Edge filtering: Canny edge maps for wire topology and Sobel gradient
//! magnitude fields for area registration.

use image::GrayImage;

use crate::blur::gaussian_blur;
use crate::types::ScalarField;

/// Minimum allowed Canny threshold.
///
/// A low threshold of zero turns every pixel with any gradient into a
/// potential edge, and the resulting dense edge map would flood the
/// wire skeleton.
pub const MIN_THRESHOLD: f32 = 1.0;
const _: () = assert!(MIN_THRESHOLD > 0.0);

/// Detect edges using the Canny algorithm.
///
/// Returns a binary image: 255 for edge pixels, 0 for non-edge.
///
/// Both thresholds are clamped to a minimum of [`MIN_THRESHOLD`] and
/// `low_threshold` is clamped to be at most `high_threshold`.
#[must_use = "returns the binary edge map"]
pub fn canny(image: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    let high = high_threshold.max(MIN_THRESHOLD);
    let low = low_threshold.max(MIN_THRESHOLD).min(high);
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    imageproc::edges::canny(image, low, high)
}

/// Sobel gradient magnitude of `image` after a Gaussian blur of `sigma`.
///
/// Registration runs on this field instead of raw intensities so that
/// palette shifts between visits (a warmer scene, a different color
/// scale) move the optimizer less than the structure of the asset does.
#[must_use = "returns the gradient magnitude field"]
pub fn gradient_magnitude(image: &GrayImage, sigma: f32) -> ScalarField {
    let blurred = gaussian_blur(image, sigma);
    if blurred.width() == 0 || blurred.height() == 0 {
        return ScalarField::zeros(blurred.width(), blurred.height());
    }
    let gx = imageproc::gradients::horizontal_sobel(&blurred);
    let gy = imageproc::gradients::vertical_sobel(&blurred);
    ScalarField::from_fn(blurred.width(), blurred.height(), |x, y| {
        let dx = f32::from(gx.get_pixel(x, y).0[0]);
        let dy = f32::from(gy.get_pixel(x, y).0[0]);
        dx.hypot(dy)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 20x20 image with a sharp vertical boundary at x = 10.
    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(20, 20, |x, _y| {
            if x < 10 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    #[test]
    fn blank_image_produces_no_edges() {
        let img = GrayImage::from_pixel(20, 20, image::Luma([128]));
        let edges = canny(&img, 50.0, 150.0);
        let edge_count: u32 = edges.pixels().map(|p| u32::from(p.0[0] > 0)).sum();
        assert_eq!(edge_count, 0, "expected no edges in uniform image");
    }

    #[test]
    fn sharp_edge_detected() {
        let edges = canny(&sharp_edge_image(), 50.0, 150.0);
        let edge_count: u32 = edges.pixels().map(|p| u32::from(p.0[0] > 0)).sum();
        assert!(edge_count > 0, "expected edges at sharp boundary, found none");
    }

    #[test]
    fn zero_low_threshold_is_clamped_to_min() {
        let img = sharp_edge_image();
        assert_eq!(canny(&img, 0.0, 150.0), canny(&img, MIN_THRESHOLD, 150.0));
    }

    #[test]
    fn low_above_high_is_clamped() {
        let img = sharp_edge_image();
        assert_eq!(canny(&img, 200.0, 100.0), canny(&img, 100.0, 100.0));
    }

    #[test]
    fn gradient_peaks_at_the_boundary() {
        let field = gradient_magnitude(&sharp_edge_image(), 1.0);
        assert_eq!(field.width(), 20);
        let at_edge = field.get(10, 10).max(field.get(9, 10));
        assert!(at_edge > 100.0, "edge magnitude {at_edge}");
        assert!(field.get(2, 10) < 1.0);
        assert!(field.get(17, 10) < 1.0);
    }

    #[test]
    fn flat_image_has_zero_gradient() {
        let img = GrayImage::from_pixel(12, 12, image::Luma([77]));
        let field = gradient_magnitude(&img, 1.0);
        assert!(field.max() < f32::EPSILON);
    }
}
