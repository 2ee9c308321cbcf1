//! Image decoding and grayscale conversion.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces the RGB
//! rasters the detector compares, plus single-channel luminance images
//! for registration and similarity scoring.

use image::GrayImage;

use crate::types::{DetectError, Dimensions, ImageRole, RgbImage};

/// Decode raw image bytes into an 8-bit RGB raster.
///
/// Alpha is discarded; thermal exports are opaque.
///
/// # Errors
///
/// Returns [`DetectError::EmptyInput`] if `bytes` is empty,
/// [`DetectError::ImageDecode`] if the format is unrecognized or the
/// data is corrupt, and [`DetectError::ZeroSizedImage`] if the decoded
/// raster has no pixels.
pub fn decode_rgb(bytes: &[u8], role: ImageRole) -> Result<RgbImage, DetectError> {
    if bytes.is_empty() {
        return Err(DetectError::EmptyInput(role));
    }

    let img = image::load_from_memory(bytes)
        .map_err(|source| DetectError::ImageDecode { role, source })?;
    let rgb = img.to_rgb8();
    ensure_non_empty(&rgb, role)?;
    Ok(rgb)
}

/// Fail with [`DetectError::ZeroSizedImage`] if `image` has no pixels.
///
/// # Errors
///
/// See above.
pub fn ensure_non_empty(image: &RgbImage, role: ImageRole) -> Result<(), DetectError> {
    if Dimensions::of(image).is_empty() {
        Err(DetectError::ZeroSizedImage(role))
    } else {
        Ok(())
    }
}

/// Luminance (`0.299*R + 0.587*G + 0.114*B`) of an RGB raster.
#[must_use = "returns the grayscale image"]
pub fn to_gray(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encode_png(img: &RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(
            encoder,
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgb8,
        )
        .unwrap();
        buf
    }

    #[test]
    fn empty_input_returns_error() {
        let result = decode_rgb(&[], ImageRole::Baseline);
        assert!(matches!(
            result,
            Err(DetectError::EmptyInput(ImageRole::Baseline))
        ));
    }

    #[test]
    fn corrupt_bytes_name_the_failing_image() {
        let result = decode_rgb(&[0xFF, 0xFE, 0x00, 0x01], ImageRole::Maintenance);
        assert!(matches!(
            result,
            Err(DetectError::ImageDecode {
                role: ImageRole::Maintenance,
                ..
            })
        ));
    }

    #[test]
    fn valid_png_decodes_with_dimensions() {
        let img = RgbImage::from_pixel(17, 31, image::Rgb([200, 40, 10]));
        let decoded = decode_rgb(&encode_png(&img), ImageRole::Baseline).unwrap();
        assert_eq!(decoded.dimensions(), (17, 31));
        assert_eq!(decoded.get_pixel(3, 3).0, [200, 40, 10]);
    }

    #[test]
    fn zero_sized_raster_is_rejected() {
        let img = RgbImage::new(0, 5);
        assert!(matches!(
            ensure_non_empty(&img, ImageRole::Baseline),
            Err(DetectError::ZeroSizedImage(ImageRole::Baseline))
        ));
    }

    #[test]
    fn gray_weights_green_highest() {
        let img = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => image::Rgb([255, 0, 0]),
            1 => image::Rgb([0, 255, 0]),
            _ => image::Rgb([0, 0, 255]),
        });
        let gray = to_gray(&img);
        let (r, g, b) = (
            gray.get_pixel(0, 0).0[0],
            gray.get_pixel(1, 0).0[0],
            gray.get_pixel(2, 0).0[0],
        );
        assert!(g > r && r > b, "R={r} G={g} B={b}");
    }
}
