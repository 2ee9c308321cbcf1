//! Per-pixel CIEDE2000 color difference between registered rasters.

use palette::Lab;
use palette::color_difference::Ciede2000;

use crate::color::rgb_to_lab;
use crate::types::{
    DetectError, DifferenceField, Dimensions, RgbImage, ScalarField, ensure_dimensions,
};

/// Compute the ΔE2000 field between `base` and the registered
/// maintenance raster.
///
/// # Errors
///
/// Returns [`DetectError::ShapeMismatch`] if the rasters differ in size.
pub fn delta_e_map(
    base: &RgbImage,
    maintenance: &RgbImage,
) -> Result<DifferenceField, DetectError> {
    let dims = Dimensions::of(base);
    ensure_dimensions("difference", dims, Dimensions::of(maintenance))?;

    let base_lab: Vec<Lab> = base.pixels().map(|p| rgb_to_lab(p.0)).collect();
    let maint_lab: Vec<Lab> = maintenance.pixels().map(|p| rgb_to_lab(p.0)).collect();
    let width = dims.width as usize;

    let field = ScalarField::from_fn(dims.width, dims.height, |x, y| {
        let i = y as usize * width + x as usize;
        base_lab[i].difference(maint_lab[i])
    });
    Ok(DifferenceField::new(field))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn identical_rasters_have_zero_difference() {
        let img = RgbImage::from_fn(12, 9, |x, y| {
            image::Rgb([u8::try_from(x * 20).unwrap(), u8::try_from(y * 25).unwrap(), 90])
        });
        let d = delta_e_map(&img, &img).unwrap();
        assert!(d.field().max() < 1e-3);
    }

    #[test]
    fn changed_pixel_is_localized() {
        let base = RgbImage::from_pixel(8, 8, image::Rgb([30, 40, 160]));
        let mut maint = base.clone();
        maint.put_pixel(4, 4, image::Rgb([240, 40, 20]));
        let d = delta_e_map(&base, &maint).unwrap();
        assert!(d.value(4, 4) > 30.0);
        assert!(d.value(0, 0) < 1e-3);
        assert!(d.field().as_slice().iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let a = RgbImage::new(4, 4);
        let b = RgbImage::new(4, 5);
        assert!(matches!(
            delta_e_map(&a, &b),
            Err(DetectError::ShapeMismatch {
                stage: "difference",
                ..
            })
        ));
    }
}
