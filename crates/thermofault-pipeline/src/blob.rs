//! Connected-component blob extraction and per-blob descriptors.

use std::collections::HashMap;

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use nalgebra::Matrix2;

use crate::color::{Hsv8, HsvImage};
use crate::config::BlobConfig;
use crate::types::{
    BlobDescriptor, BoundingBox, DetectError, DifferenceField, Dimensions, Point, ensure_dimensions,
};

/// Regularizer added to both eigenvalues of the coordinate covariance.
const EIGEN_EPSILON: f64 = 1e-6;

/// Running sums for one component.
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: u32,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_yy: f64,
    sum_xy: f64,
    sum_de: f64,
    peak_de: f64,
    sum_h: f64,
    sum_s: f64,
    sum_v: f64,
}

impl Accumulator {
    const fn new(x: u32, y: u32) -> Self {
        Self {
            count: 0,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            sum_x: 0.0,
            sum_y: 0.0,
            sum_xx: 0.0,
            sum_yy: 0.0,
            sum_xy: 0.0,
            sum_de: 0.0,
            peak_de: 0.0,
            sum_h: 0.0,
            sum_s: 0.0,
            sum_v: 0.0,
        }
    }

    fn add(&mut self, x: u32, y: u32, delta_e: f64, hsv: Hsv8) {
        let (fx, fy) = (f64::from(x), f64::from(y));
        self.count += 1;
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.sum_x += fx;
        self.sum_y += fy;
        self.sum_xx += fx * fx;
        self.sum_yy += fy * fy;
        self.sum_xy += fx * fy;
        self.sum_de += delta_e;
        self.peak_de = self.peak_de.max(delta_e);
        self.sum_h += f64::from(hsv.h);
        self.sum_s += f64::from(hsv.s);
        self.sum_v += f64::from(hsv.v);
    }

    /// Larger over smaller eigenvalue of the sample covariance of the
    /// pixel coordinates.
    fn elongation(&self, min_pixels: u32) -> f64 {
        if self.count < min_pixels.max(2) {
            return 1.0;
        }
        let n = f64::from(self.count);
        let (mx, my) = (self.sum_x / n, self.sum_y / n);
        let cxx = (n * mx).mul_add(-mx, self.sum_xx) / (n - 1.0);
        let cyy = (n * my).mul_add(-my, self.sum_yy) / (n - 1.0);
        let cxy = (n * mx).mul_add(-my, self.sum_xy) / (n - 1.0);
        let eig = Matrix2::new(cxx, cxy, cxy, cyy).symmetric_eigenvalues();
        let (a, b) = (eig[0].abs(), eig[1].abs());
        (a.max(b) + EIGEN_EPSILON) / (a.min(b) + EIGEN_EPSILON)
    }

    fn into_descriptor(self, id: u32, min_shape_pixels: u32) -> BlobDescriptor {
        let n = f64::from(self.count);
        BlobDescriptor {
            id,
            bbox: BoundingBox {
                x: self.min_x,
                y: self.min_y,
                width: self.max_x - self.min_x + 1,
                height: self.max_y - self.min_y + 1,
            },
            area: self.count,
            centroid: Point::new(self.sum_x / n, self.sum_y / n),
            mean_delta_e: self.sum_de / n,
            peak_delta_e: self.peak_de,
            mean_hue: self.sum_h / n,
            mean_saturation: self.sum_s / n,
            mean_value: self.sum_v / n,
            elongation: self.elongation(min_shape_pixels),
        }
    }
}

/// Label 8-connected components of `candidate` and describe each one
/// with at least `config.min_area` pixels.
///
/// Blobs are numbered from 1 in raster order of their first pixel.
///
/// # Errors
///
/// Returns [`DetectError::ShapeMismatch`] if the mask, ΔE field and HSV
/// raster disagree in size.
pub fn extract_blobs(
    candidate: &GrayImage,
    delta: &DifferenceField,
    hsv: &HsvImage,
    config: &BlobConfig,
) -> Result<Vec<BlobDescriptor>, DetectError> {
    let dims = Dimensions::of(candidate);
    ensure_dimensions("blob", dims, delta.dimensions())?;
    ensure_dimensions("blob", dims, hsv.dimensions())?;

    let labels = connected_components(candidate, Connectivity::Eight, Luma([0u8]));

    // Component label -> slot in `components`, in raster order of first pixel.
    let mut slot_of: HashMap<u32, usize> = HashMap::new();
    let mut components: Vec<Accumulator> = Vec::new();
    for (x, y, px) in labels.enumerate_pixels() {
        let label = px.0[0];
        if label == 0 {
            continue;
        }
        let slot = *slot_of.entry(label).or_insert_with(|| {
            components.push(Accumulator::new(x, y));
            components.len() - 1
        });
        components[slot].add(x, y, f64::from(delta.value(x, y)), hsv.get(x, y));
    }

    let blobs: Vec<BlobDescriptor> = components
        .into_iter()
        .filter(|c| c.count >= config.min_area)
        .zip(1u32..)
        .map(|(c, id)| c.into_descriptor(id, config.min_shape_pixels))
        .collect();
    Ok(blobs)
}
