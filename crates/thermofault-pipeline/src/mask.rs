//! Binary masks: the registration exclusion mask, morphology, and
//! pixelwise set operations.
//!
//! Masks are `GrayImage`s holding 0 (off) or 255 (on). Any non-zero
//! value is treated as on when reading.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;

use crate::types::Dimensions;

const ON: Luma<u8> = Luma([255]);
const OFF: Luma<u8> = Luma([0]);

/// Whether a mask pixel is on.
#[must_use]
#[inline]
pub fn is_on(mask: &GrayImage, x: u32, y: u32) -> bool {
    mask.get_pixel(x, y).0[0] > 0
}

/// Build a mask by evaluating a predicate at every pixel.
#[must_use]
pub fn from_fn(dimensions: Dimensions, mut f: impl FnMut(u32, u32) -> bool) -> GrayImage {
    GrayImage::from_fn(dimensions.width, dimensions.height, |x, y| {
        if f(x, y) { ON } else { OFF }
    })
}

/// Registration mask that excludes the right-most `legend_fraction` of
/// columns (on-image temperature legend) and the top `sky_fraction` of
/// rows (sky, roof line).
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn exclusion_mask(
    dimensions: Dimensions,
    legend_fraction: f64,
    sky_fraction: f64,
) -> GrayImage {
    let legend_cols = (f64::from(dimensions.width) * legend_fraction).round() as u32;
    let sky_rows = (f64::from(dimensions.height) * sky_fraction).round() as u32;
    let x_end = dimensions.width.saturating_sub(legend_cols);
    from_fn(dimensions, |x, y| x < x_end && y >= sky_rows)
}

/// Morphological opening with a cross-shaped element applied
/// `iterations` times (erode `n` times, then dilate `n` times).
#[must_use = "returns the opened mask"]
pub fn open(mask: &GrayImage, iterations: u8) -> GrayImage {
    if iterations == 0 {
        return mask.clone();
    }
    imageproc::morphology::open(mask, Norm::L1, iterations)
}

/// Morphological closing with a cross-shaped element applied
/// `iterations` times (dilate `n` times, then erode `n` times).
#[must_use = "returns the closed mask"]
pub fn close(mask: &GrayImage, iterations: u8) -> GrayImage {
    if iterations == 0 {
        return mask.clone();
    }
    imageproc::morphology::close(mask, Norm::L1, iterations)
}

/// Dilate with a `(2r+1) x (2r+1)` square element.
#[must_use = "returns the dilated mask"]
pub fn dilate_square(mask: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    imageproc::morphology::dilate(mask, Norm::LInf, radius)
}

/// Pixelwise union.
///
/// Both masks must share dimensions; the caller checks.
#[must_use]
pub fn union(a: &GrayImage, b: &GrayImage) -> GrayImage {
    from_fn(Dimensions::of(a), |x, y| is_on(a, x, y) || is_on(b, x, y))
}

/// Pixelwise intersection.
///
/// Both masks must share dimensions; the caller checks.
#[must_use]
pub fn intersection(a: &GrayImage, b: &GrayImage) -> GrayImage {
    from_fn(Dimensions::of(a), |x, y| is_on(a, x, y) && is_on(b, x, y))
}

/// Number of on pixels.
#[must_use]
pub fn count(mask: &GrayImage) -> u64 {
    mask.pixels().filter(|p| p.0[0] > 0).count() as u64
}

/// Whether every on pixel of `inner` is also on in `outer`.
#[must_use]
pub fn is_subset(inner: &GrayImage, outer: &GrayImage) -> bool {
    inner.dimensions() == outer.dimensions()
        && inner
            .pixels()
            .zip(outer.pixels())
            .all(|(i, o)| i.0[0] == 0 || o.0[0] > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    #[test]
    fn exclusion_mask_drops_legend_and_sky() {
        let m = exclusion_mask(dims(100, 100), 0.12, 0.15);
        assert!(!is_on(&m, 50, 10), "sky row should be excluded");
        assert!(!is_on(&m, 95, 50), "legend column should be excluded");
        assert!(is_on(&m, 50, 50));
        assert!(is_on(&m, 87, 15));
        assert!(!is_on(&m, 88, 15));
        assert_eq!(count(&m), 88 * 85);
    }

    #[test]
    fn opening_removes_isolated_pixels() {
        let mut m = GrayImage::new(15, 15);
        m.put_pixel(2, 2, ON);
        for y in 6..12 {
            for x in 6..12 {
                m.put_pixel(x, y, ON);
            }
        }
        let opened = open(&m, 1);
        assert!(!is_on(&opened, 2, 2));
        assert!(is_on(&opened, 8, 8));
    }

    #[test]
    fn closing_bridges_a_one_pixel_gap() {
        let mut m = GrayImage::new(20, 9);
        for y in 2..7 {
            for x in 2..9 {
                m.put_pixel(x, y, ON);
            }
            for x in 10..17 {
                m.put_pixel(x, y, ON);
            }
        }
        let closed = close(&m, 2);
        assert!(is_on(&closed, 9, 4));
    }

    #[test]
    fn square_dilation_covers_diagonals() {
        let mut m = GrayImage::new(7, 7);
        m.put_pixel(3, 3, ON);
        let d = dilate_square(&m, 1);
        assert!(is_on(&d, 2, 2));
        assert!(is_on(&d, 4, 4));
        assert!(!is_on(&d, 5, 5));
        assert_eq!(count(&d), 9);
    }

    #[test]
    fn set_operations() {
        let a = from_fn(dims(4, 1), |x, _| x < 2);
        let b = from_fn(dims(4, 1), |x, _| x >= 1);
        assert_eq!(count(&union(&a, &b)), 4);
        assert_eq!(count(&intersection(&a, &b)), 1);
        assert!(is_subset(&intersection(&a, &b), &a));
        assert!(!is_subset(&a, &b));
    }
}
