//! Annotated overlay raster.
//!
//! Draws a 2-pixel rectangle around each blob on the registered
//! maintenance image, colored by label, with a caption
//! `LABEL:SUBTYPE dE=PEAK c=CONF` above the box (or inside it when the
//! box touches the top edge).

use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use thermofault_pipeline::{BlobReport, DetectionReport, Dimensions, FaultLabel, RgbImage};

use crate::ExportError;
use crate::font::{ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH, glyph, is_lit};

/// Gap between the caption baseline and the box.
const CAPTION_GAP: u32 = 2;

/// Box and caption color for a label.
#[must_use]
pub const fn label_color(label: FaultLabel) -> Rgb<u8> {
    match label {
        FaultLabel::Faulty => Rgb([255, 0, 0]),
        FaultLabel::PotentiallyFaulty => Rgb([255, 165, 0]),
        FaultLabel::Normal => Rgb([0, 255, 0]),
    }
}

/// Caption text for one blob.
#[must_use]
pub fn caption(blob: &BlobReport) -> String {
    let c = &blob.classification;
    format!(
        "{}:{} dE={:.1} c={:.2}",
        c.label(),
        c.subtype(),
        blob.descriptor.peak_delta_e,
        c.confidence(),
    )
}

/// Render the overlay onto a copy of `raster`.
///
/// # Errors
///
/// Returns [`ExportError::ShapeMismatch`] if `raster` is not in the
/// report's geometry.
#[allow(clippy::cast_possible_wrap)]
pub fn render_overlay(
    raster: &RgbImage,
    report: &DetectionReport,
) -> Result<RgbImage, ExportError> {
    let found = Dimensions::of(raster);
    if found != report.dimensions {
        return Err(ExportError::ShapeMismatch {
            expected: report.dimensions,
            found,
        });
    }

    let mut out = raster.clone();
    for blob in &report.blobs {
        let color = label_color(blob.classification.label());
        let b = blob.descriptor.bbox;
        if b.width == 0 || b.height == 0 {
            continue;
        }
        let inner = Rect::at(b.x as i32, b.y as i32).of_size(b.width, b.height);
        let outer = Rect::at(b.x as i32 - 1, b.y as i32 - 1).of_size(b.width + 2, b.height + 2);
        draw_hollow_rect_mut(&mut out, inner, color);
        draw_hollow_rect_mut(&mut out, outer, color);

        let text_top = if b.y >= GLYPH_HEIGHT + CAPTION_GAP {
            b.y - GLYPH_HEIGHT - CAPTION_GAP
        } else {
            b.y + CAPTION_GAP
        };
        draw_text(&mut out, b.x, text_top, &caption(blob), color);
    }
    Ok(out)
}

/// Draw `text` with its top-left corner at `(x, y)`, clipped to the
/// image.
fn draw_text(image: &mut RgbImage, x: u32, y: u32, text: &str, color: Rgb<u8>) {
    let (w, h) = image.dimensions();
    let mut pen = x;
    for c in text.chars() {
        let g = glyph(c);
        for row in 0..GLYPH_HEIGHT {
            for col in 0..GLYPH_WIDTH {
                let (px, py) = (pen + col, y + row);
                if px < w && py < h && is_lit(&g, col, row) {
                    image.put_pixel(px, py, color);
                }
            }
        }
        pen = pen.saturating_add(ADVANCE);
        if pen >= w {
            break;
        }
    }
}
