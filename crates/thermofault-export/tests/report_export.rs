//! Integration test: run a synthetic pair through the full pipeline and export JSON and overlay.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use thermofault_pipeline::{DetectionConfig, Dimensions, FaultLabel, RgbImage, process_staged};

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
fn staged_detection_exports_json_and_overlay() {
    let base = RgbImage::from_pixel(120, 90, image::Rgb([25, 35, 145]));
    let mut maintenance = base.clone();
    for y in 40..60 {
        for x in 50..70 {
            maintenance.put_pixel(x, y, image::Rgb([240, 45, 25]));
        }
    }

    let staged = process_staged(
        &encode_png(&base),
        &encode_png(&maintenance),
        "TX-100",
        Some(50.0),
        &DetectionConfig::default(),
    )
    .expect("pipeline should succeed");
    assert_eq!(staged.report.blobs.len(), 1);
    assert_ne!(staged.report.image_label, FaultLabel::Normal);

    let json = thermofault_export::to_json_with_metadata(
        &staged.report,
        &thermofault_export::ReportMetadata {
            baseline_path: Some("baseline.png"),
            maintenance_path: Some("maintenance.png"),
        },
    )
    .unwrap();
    assert!(json.contains("\"baseline_path\": \"baseline.png\""));
    assert!(json.contains("\"asset_id\": \"TX-100\""));
    assert!(json.contains("sensitivity=50"));

    let overlay = thermofault_export::render_overlay(&staged.warped, &staged.report).unwrap();
    assert_eq!(
        Dimensions::of(&overlay),
        Dimensions {
            width: 120,
            height: 90
        }
    );
    assert_ne!(overlay, staged.warped);
}
