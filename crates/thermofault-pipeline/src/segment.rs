//! Hot-region segmentation.
//!
//! A pixel becomes a candidate only when it is both *hot* (inside a
//! red/orange/yellow band of the false-color palette in the maintenance
//! image) and *changed* (ΔE at or above the pot threshold). Pixels that
//! were already hot at baseline, or changed color without a thermal
//! signature, fall out of the gate. The gate is then cleaned by an
//! opening and a closing.

use image::GrayImage;

use crate::color::HsvImage;
use crate::config::{HotBands, SegmentationConfig};
use crate::mask;
use crate::types::{DetectError, DifferenceField, ensure_dimensions};

/// Masks produced by segmentation, all 0/255 and in baseline geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segmentation {
    /// Hot-band mask of the registered maintenance image.
    pub hot: GrayImage,
    /// `hot ∧ changed`, before morphology.
    pub gate: GrayImage,
    /// Gate after opening and closing.
    pub candidate: GrayImage,
}

/// Pixels of `hsv` inside any hot band.
#[must_use]
pub fn hot_mask(hsv: &HsvImage, bands: &HotBands) -> GrayImage {
    mask::from_fn(hsv.dimensions(), |x, y| bands.is_hot(hsv.get(x, y)))
}

/// Pixels whose ΔE reaches `threshold`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn changed_mask(delta: &DifferenceField, threshold: f64) -> GrayImage {
    let t = threshold as f32;
    mask::from_fn(delta.dimensions(), |x, y| delta.value(x, y) >= t)
}

/// Build the candidate mask.
///
/// # Errors
///
/// Returns [`DetectError::ShapeMismatch`] if `hsv` and `delta` differ
/// in size.
pub fn segment(
    hsv: &HsvImage,
    delta: &DifferenceField,
    pot_threshold: f64,
    bands: &HotBands,
    config: &SegmentationConfig,
) -> Result<Segmentation, DetectError> {
    ensure_dimensions("segment", delta.dimensions(), hsv.dimensions())?;

    let hot = hot_mask(hsv, bands);
    let gate = mask::intersection(&hot, &changed_mask(delta, pot_threshold));
    let opened = mask::open(&gate, config.open_iterations);
    let candidate = mask::close(&opened, config.close_iterations);
    Ok(Segmentation {
        hot,
        gate,
        candidate,
    })
}
