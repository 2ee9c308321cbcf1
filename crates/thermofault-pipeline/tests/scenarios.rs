//! End-to-end detection scenarios on synthetic image pairs.

#![allow(clippy::unwrap_used, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use thermofault_pipeline::{
    DetectionConfig, DetectionReport, Dimensions, FaultLabel, FaultSubtype, RgbImage, Transform,
    TransformKind, detect, mask, process_staged,
};

const BACKGROUND: image::Rgb<u8> = image::Rgb([25, 35, 145]);
const HOT: image::Rgb<u8> = image::Rgb([240, 45, 25]);
const WIRE: image::Rgb<u8> = image::Rgb([150, 150, 150]);

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

/// Smooth gray bumps, shifted by `(dx, dy)`.
fn bumps(width: u32, height: u32, dx: f64, dy: f64) -> RgbImage {
    let centers = [
        (40.0, 50.0),
        (90.0, 70.0),
        (60.0, 95.0),
        (115.0, 45.0),
        (105.0, 100.0),
    ];
    RgbImage::from_fn(width, height, |x, y| {
        let (fx, fy) = (f64::from(x) - dx, f64::from(y) - dy);
        let v: f64 = centers
            .iter()
            .map(|(cx, cy)| {
                let d2 = (fx - cx).powi(2) + (fy - cy).powi(2);
                200.0 * (-d2 / (2.0 * 49.0)).exp()
            })
            .sum();
        let g = (20.0 + v).clamp(0.0, 255.0) as u8;
        image::Rgb([g, g, g])
    })
}

fn paint(img: &mut RgbImage, x0: u32, y0: u32, size: u32, color: image::Rgb<u8>) {
    for y in y0..y0 + size {
        for x in x0..x0 + size {
            img.put_pixel(x, y, color);
        }
    }
}

fn paint_rect(img: &mut RgbImage, (x0, y0, w, h): (u32, u32, u32, u32), color: image::Rgb<u8>) {
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            img.put_pixel(x, y, color);
        }
    }
}

/// A 160x120 cool scene: one 3 px horizontal wire at row 77 crossed by
/// 3 px vertical poles starting at each of `poles`.
fn wired_scene(poles: &[u32]) -> RgbImage {
    RgbImage::from_fn(160, 120, |x, y| {
        let on_wire = (77..80).contains(&y);
        let on_pole = poles.iter().any(|&p| (p..p + 3).contains(&x));
        if on_wire || on_pole { WIRE } else { BACKGROUND }
    })
}

/// Detect on `wired_scene(poles)` against a copy with `hot` rectangles
/// painted in, returning the report.
fn detect_heated(poles: &[u32], hot: &[(u32, u32, u32, u32)]) -> DetectionReport {
    let base = wired_scene(poles);
    let mut maintenance = base.clone();
    for &rect in hot {
        paint_rect(&mut maintenance, rect, HOT);
    }
    detect(&base, &maintenance, "TX-W", None, &DetectionConfig::default()).unwrap()
}

#[test]
fn hot_spot_beside_a_long_cool_wire_is_a_point_overload() {
    let report = detect_heated(&[10, 132], &[(60, 50, 20, 20)]);

    assert_eq!(report.blobs.len(), 1);
    let blob = &report.blobs[0];
    assert!(!blob.topology.near_joint);
    assert!(blob.topology.coverage < 0.25, "{:?}", blob.topology);
    assert!(blob.topology.cool_fraction >= 0.6, "{:?}", blob.topology);
    assert_eq!(blob.classification.label(), FaultLabel::Faulty);
    assert_eq!(blob.classification.subtype(), FaultSubtype::PointOverload);
    assert_eq!(report.image_label, FaultLabel::Faulty);
}

#[test]
fn hot_spot_on_a_wire_junction_is_a_loose_joint() {
    let report = detect_heated(&[10, 69, 132], &[(60, 68, 20, 20)]);

    assert_eq!(report.blobs.len(), 1);
    let blob = &report.blobs[0];
    assert!(blob.topology.near_joint, "{:?}", blob.topology);
    assert_eq!(blob.classification.label(), FaultLabel::Faulty);
    assert_eq!(blob.classification.subtype(), FaultSubtype::LooseJoint);
    assert_eq!(report.image_label, FaultLabel::Faulty);
}

#[test]
fn heated_wire_run_is_a_full_wire_overload() {
    let report = detect_heated(&[10, 132], &[(40, 77, 80, 3)]);

    assert_eq!(report.blobs.len(), 1);
    let blob = &report.blobs[0];
    assert!(!blob.topology.near_joint);
    assert!(blob.topology.coverage >= 0.6, "{:?}", blob.topology);
    assert_eq!(blob.classification.label(), FaultLabel::PotentiallyFaulty);
    assert_eq!(blob.classification.subtype(), FaultSubtype::FullWireOverload);
    assert_eq!(report.image_label, FaultLabel::PotentiallyFaulty);
}

#[test]
fn identical_images_report_normal_with_no_blobs() {
    let img = bumps(160, 120, 0.0, 0.0);
    let png = encode_png(&img);
    let staged = process_staged(&png, &png, "TX-001", None, &DetectionConfig::default()).unwrap();

    assert!(staged.delta.field().max() < 0.5);
    assert_eq!(mask::count(&staged.candidate), 0);
    assert!(staged.report.blobs.is_empty());
    assert_eq!(staged.report.image_label, FaultLabel::Normal);
    assert_eq!(staged.report.asset_id, "TX-001");
}

#[test]
fn hot_square_yields_exactly_one_flagged_blob() {
    let base = RgbImage::from_pixel(120, 90, BACKGROUND);
    let mut maintenance = base.clone();
    paint(&mut maintenance, 50, 35, 20, HOT);

    let staged = process_staged(
        &encode_png(&base),
        &encode_png(&maintenance),
        "TX-002",
        None,
        &DetectionConfig::default(),
    )
    .unwrap();

    assert_eq!(staged.report.blobs.len(), 1);
    let blob = &staged.report.blobs[0];
    assert!(blob.descriptor.peak_delta_e > 30.0);
    assert!(blob.descriptor.area >= 350);
    assert!(blob.classification.label() >= FaultLabel::PotentiallyFaulty);
    assert!((0.0..=1.0).contains(&blob.classification.confidence()));
    assert!((0.0..=100.0).contains(&blob.classification.severity()));
    assert_eq!(staged.report.image_label, blob.classification.label());
}

#[test]
fn gate_is_within_hot_and_changed_masks() {
    let base = RgbImage::from_pixel(120, 90, BACKGROUND);
    let mut maintenance = base.clone();
    paint(&mut maintenance, 10, 10, 15, HOT);
    // Hot already at baseline: hot but unchanged.
    let mut base_with_hot = base;
    paint(&mut base_with_hot, 70, 40, 15, HOT);
    paint(&mut maintenance, 70, 40, 15, HOT);

    let staged = process_staged(
        &encode_png(&base_with_hot),
        &encode_png(&maintenance),
        "TX",
        None,
        &DetectionConfig::default(),
    )
    .unwrap();

    let pot = staged.report.thresholds.pot();
    let changed = mask::from_fn(staged.delta.dimensions(), |x, y| {
        f64::from(staged.delta.value(x, y)) >= pot
    });
    assert!(mask::is_subset(&staged.gate, &staged.hot));
    assert!(mask::is_subset(&staged.gate, &changed));
    assert!(staged.delta.field().as_slice().iter().all(|&v| v >= 0.0));
    assert!(!staged.report.blobs.is_empty());
}

#[test]
fn textureless_inputs_complete_with_identity_transform() {
    let flat = RgbImage::from_pixel(64, 48, image::Rgb([0, 0, 0]));
    let report = detect(&flat, &flat, "TX", None, &DetectionConfig::default()).unwrap();

    assert!(!report.alignment.success);
    assert_eq!(report.alignment.transform, Transform::identity());
    assert!(report.alignment.degradation.is_some());
    assert_eq!(report.image_label, FaultLabel::Normal);
}

#[test]
fn shifted_texture_is_aligned() {
    let base = bumps(160, 120, 0.0, 0.0);
    let maintenance = bumps(160, 120, 3.0, 2.0);
    let report = detect(&base, &maintenance, "TX", None, &DetectionConfig::default()).unwrap();

    assert!(report.alignment.success);
    assert_eq!(report.alignment.kind(), TransformKind::Affine);
    let (u, v) = report.alignment.transform.apply(80.0, 60.0).unwrap();
    assert!((u - 83.0).abs() < 0.5, "u = {u}");
    assert!((v - 62.0).abs() < 0.5, "v = {v}");
    assert!(report.blobs.is_empty());
}

#[test]
fn maintenance_at_other_resolution_is_resized_to_baseline() {
    let base = bumps(160, 120, 0.0, 0.0);
    let maintenance = image::imageops::resize(
        &base,
        320,
        240,
        image::imageops::FilterType::Triangle,
    );
    let staged = process_staged(
        &encode_png(&base),
        &encode_png(&maintenance),
        "TX",
        None,
        &DetectionConfig::default(),
    )
    .unwrap();

    let expected = Dimensions {
        width: 160,
        height: 120,
    };
    assert!(staged.report.alignment.resized);
    assert_eq!(staged.report.dimensions, expected);
    assert_eq!(Dimensions::of(&staged.warped), expected);
    assert_eq!(staged.delta.dimensions(), expected);
}

#[test]
fn full_sensitivity_lowers_threshold_and_never_loses_blobs() {
    let base = RgbImage::from_pixel(140, 100, BACKGROUND);
    let mut maintenance = base.clone();
    paint(&mut maintenance, 15, 15, 18, HOT);
    paint(&mut maintenance, 80, 50, 18, image::Rgb([245, 200, 40]));

    let config = DetectionConfig::default();
    let low = detect(&base, &maintenance, "TX", Some(0.0), &config).unwrap();
    let high = detect(&base, &maintenance, "TX", Some(100.0), &config).unwrap();

    assert!(high.thresholds.pot() < low.thresholds.pot());
    assert!(high.blobs.len() >= low.blobs.len());
    for report in [&low, &high] {
        assert!(report.thresholds.fault() >= report.thresholds.pot());
    }
}

#[test]
fn out_of_range_sensitivity_is_rejected() {
    let img = bumps(64, 48, 0.0, 0.0);
    let result = detect(&img, &img, "TX", Some(150.0), &DetectionConfig::default());
    assert!(matches!(
        result,
        Err(thermofault_pipeline::DetectError::InvalidConfig(_))
    ));
}
