//! Color-space conversion for the thermal palette.
//!
//! HSV values use the OpenCV 8-bit convention (H in 0..179, S and V in
//! 0..255) because the hot bands in [`HotBands`] are calibrated in those
//! units. Lab values are CIE L*a*b* under D65, via `palette`.

use palette::{FromColor, Hsv, Lab, Srgb};

use crate::config::{HotBands, HsvBand};
use crate::types::{Dimensions, RgbImage};

/// One pixel in OpenCV HSV units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hsv8 {
    /// Hue, 0..179.
    pub h: u8,
    /// Saturation, 0..255.
    pub s: u8,
    /// Value, 0..255.
    pub v: u8,
}

/// Convert an 8-bit sRGB pixel to OpenCV-style HSV.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn rgb_to_hsv8(rgb: [u8; 3]) -> Hsv8 {
    let srgb: Srgb<f32> = Srgb::new(rgb[0], rgb[1], rgb[2]).into_format();
    let hsv: Hsv = Hsv::from_color(srgb);
    let hue = (hsv.hue.into_positive_degrees() / 2.0).round();
    // 359.x degrees rounds onto 180, which wraps to red at 0.
    let h = if hue >= 180.0 { 0 } else { hue as u8 };
    Hsv8 {
        h,
        s: (hsv.saturation * 255.0).round().clamp(0.0, 255.0) as u8,
        v: (hsv.value * 255.0).round().clamp(0.0, 255.0) as u8,
    }
}

/// Convert an 8-bit sRGB pixel to CIE L*a*b*.
#[must_use]
pub fn rgb_to_lab(rgb: [u8; 3]) -> Lab {
    let srgb: Srgb<f32> = Srgb::new(rgb[0], rgb[1], rgb[2]).into_format();
    Lab::from_color(srgb)
}

/// Row-major HSV raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsvImage {
    dimensions: Dimensions,
    pixels: Vec<Hsv8>,
}

impl HsvImage {
    /// Convert a whole RGB image.
    #[must_use]
    pub fn from_rgb(image: &RgbImage) -> Self {
        Self {
            dimensions: Dimensions::of(image),
            pixels: image.pixels().map(|p| rgb_to_hsv8(p.0)).collect(),
        }
    }

    /// Raster dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Pixel at `(x, y)`.
    ///
    /// Callers stay within [`dimensions`](Self::dimensions).
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Hsv8 {
        self.pixels
            .get(y as usize * self.dimensions.width as usize + x as usize)
            .copied()
            .unwrap_or_default()
    }
}

/// Which hot band a hue falls in, used for blob-level color reasoning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HueBand {
    /// Red or orange: the hottest end of the palette.
    RedOrange,
    /// Yellow: warm.
    Yellow,
    /// Anything else.
    Other,
}

impl HueBand {
    /// Classify a (possibly fractional) mean hue against the configured
    /// band edges. Hues between two integer band edges (e.g. 10.5)
    /// belong to neither.
    #[must_use]
    pub fn of(hue: f64, bands: &HotBands) -> Self {
        let red_or_orange = hue <= f64::from(bands.red_low.hue_max)
            || hue >= f64::from(bands.red_high.hue_min)
            || bands.orange.contains_hue(hue);
        if red_or_orange {
            Self::RedOrange
        } else if bands.yellow.contains_hue(hue) {
            Self::Yellow
        } else {
            Self::Other
        }
    }
}

impl HotBands {
    fn all(&self) -> [&HsvBand; 4] {
        [&self.red_low, &self.red_high, &self.orange, &self.yellow]
    }

    /// Whether a pixel lies in any hot band.
    #[must_use]
    pub fn is_hot(&self, px: Hsv8) -> bool {
        self.all().iter().any(|b| b.contains(px.h, px.s, px.v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palette::color_difference::Ciede2000;

    #[test]
    fn pure_red_is_hue_zero() {
        let hsv = rgb_to_hsv8([255, 0, 0]);
        assert_eq!(hsv, Hsv8 { h: 0, s: 255, v: 255 });
    }

    #[test]
    fn orange_and_yellow_hues_match_opencv_units() {
        // 30 deg -> 15, 60 deg -> 30
        assert_eq!(rgb_to_hsv8([255, 128, 0]).h, 15);
        assert_eq!(rgb_to_hsv8([255, 255, 0]).h, 30);
        assert_eq!(rgb_to_hsv8([0, 0, 255]).h, 120);
    }

    #[test]
    fn gray_has_zero_saturation() {
        let hsv = rgb_to_hsv8([90, 90, 90]);
        assert_eq!(hsv.s, 0);
        assert_eq!(hsv.v, 90);
    }

    #[test]
    fn hot_bands_accept_palette_reds_and_reject_blue() {
        let bands = HotBands::default();
        assert!(bands.is_hot(rgb_to_hsv8([230, 40, 20])));
        assert!(bands.is_hot(rgb_to_hsv8([250, 160, 30])));
        assert!(bands.is_hot(rgb_to_hsv8([240, 230, 60])));
        assert!(!bands.is_hot(rgb_to_hsv8([20, 40, 200])));
        // Dark red fails the value floor.
        assert!(!bands.is_hot(rgb_to_hsv8([90, 10, 10])));
    }

    #[test]
    fn hue_band_classification() {
        let bands = HotBands::default();
        assert_eq!(HueBand::of(4.0, &bands), HueBand::RedOrange);
        assert_eq!(HueBand::of(175.0, &bands), HueBand::RedOrange);
        assert_eq!(HueBand::of(20.0, &bands), HueBand::RedOrange);
        assert_eq!(HueBand::of(30.0, &bands), HueBand::Yellow);
        assert_eq!(HueBand::of(90.0, &bands), HueBand::Other);
    }

    #[test]
    fn identical_colors_have_zero_delta_e() {
        let a = rgb_to_lab([200, 60, 30]);
        assert!(a.difference(a).abs() < 1e-4);
        let b = rgb_to_lab([30, 60, 200]);
        assert!(a.difference(b) > 30.0);
    }
}
