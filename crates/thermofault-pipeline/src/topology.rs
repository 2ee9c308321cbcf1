//! Wire topology: a 1-pixel skeleton of likely conductors, its joint
//! candidates, and per-blob coverage cues.
//!
//! The skeleton is the Zhang-Suen thinning of Canny edges (dilated 3x3)
//! united with the candidate mask (dilated 5x5). Skeleton pixels with one
//! neighbour are endpoints and with three or more are junctions; both
//! count as joint candidates and are indexed in an R-tree.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use rstar::RTree;

use crate::config::TopologyConfig;
use crate::edge::canny;
use crate::mask::{self, dilate_square, is_on};
use crate::types::{
    BlobDescriptor, DetectError, Dimensions, Point, TopologyFeatures, ensure_dimensions,
};

/// Skeleton, joint candidates and the hot mask they are measured against.
#[derive(Debug, Clone)]
pub struct WireGraph {
    skeleton: GrayImage,
    band: GrayImage,
    hot: GrayImage,
    hot_dilated: GrayImage,
    endpoints: Vec<(u32, u32)>,
    junctions: Vec<(u32, u32)>,
    joints: RTree<[f64; 2]>,
}

impl WireGraph {
    /// Build the graph from the registered maintenance grayscale image
    /// and the candidate hot mask.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::ShapeMismatch`] if the two rasters differ
    /// in size.
    pub fn build(
        maintenance_gray: &GrayImage,
        hot: &GrayImage,
        config: &TopologyConfig,
    ) -> Result<Self, DetectError> {
        ensure_dimensions("topology", Dimensions::of(hot), Dimensions::of(maintenance_gray))?;
        let edges = dilate_square(
            &canny(maintenance_gray, config.canny_low, config.canny_high),
            config.edge_dilation,
        );
        let wires = mask::union(&edges, &dilate_square(hot, config.hot_dilation));
        Self::from_parts(thin(&wires), hot.clone())
    }

    /// Assemble a graph from an existing 1-pixel skeleton.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::ShapeMismatch`] if the two rasters differ
    /// in size.
    pub fn from_parts(skeleton: GrayImage, hot: GrayImage) -> Result<Self, DetectError> {
        ensure_dimensions("topology", Dimensions::of(&skeleton), Dimensions::of(&hot))?;
        let (endpoints, junctions) = find_nodes(&skeleton);
        let joints = RTree::bulk_load(
            endpoints
                .iter()
                .chain(&junctions)
                .map(|&(x, y)| [f64::from(x), f64::from(y)])
                .collect(),
        );
        Ok(Self {
            band: dilate_square(&skeleton, 1),
            hot_dilated: dilate_square(&hot, 1),
            skeleton,
            hot,
            endpoints,
            junctions,
            joints,
        })
    }

    /// The 1-pixel skeleton (0/255).
    #[must_use]
    pub const fn skeleton(&self) -> &GrayImage {
        &self.skeleton
    }

    /// Degree-1 skeleton pixels.
    #[must_use]
    pub fn endpoints(&self) -> &[(u32, u32)] {
        &self.endpoints
    }

    /// Degree-3+ skeleton pixels.
    #[must_use]
    pub fn junctions(&self) -> &[(u32, u32)] {
        &self.junctions
    }

    /// Number of joint candidates.
    #[must_use]
    pub fn joint_count(&self) -> usize {
        self.joints.size()
    }

    /// Whether any joint candidate lies within `radius` of `p`.
    #[must_use]
    pub fn is_near_joint(&self, p: Point, radius: f64) -> bool {
        self.joints
            .locate_within_distance([p.x, p.y], radius * radius)
            .next()
            .is_some()
    }

    /// Topology cues for one blob.
    ///
    /// Coverage is measured against the hot mask dilated 3x3, cool
    /// fraction against the undilated mask, both within the blob's
    /// bounding box grown by `window_margin`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn features(&self, blob: &BlobDescriptor, config: &TopologyConfig) -> TopologyFeatures {
        let (xs, ys) = blob
            .bbox
            .expanded(config.window_margin, Dimensions::of(&self.skeleton));

        let (mut skeleton_px, mut hot_skeleton_px) = (0u32, 0u32);
        let (mut band_px, mut cool_px) = (0u32, 0u32);
        for y in ys {
            for x in xs.clone() {
                if is_on(&self.skeleton, x, y) {
                    skeleton_px += 1;
                    if is_on(&self.hot_dilated, x, y) {
                        hot_skeleton_px += 1;
                    }
                }
                if is_on(&self.band, x, y) {
                    band_px += 1;
                    if !is_on(&self.hot, x, y) {
                        cool_px += 1;
                    }
                }
            }
        }

        let ratio = |num: u32, den: u32| {
            if den == 0 {
                0.0
            } else {
                f64::from(num) / f64::from(den)
            }
        };
        TopologyFeatures {
            near_joint: self.is_near_joint(blob.centroid, config.joint_radius),
            coverage: ratio(hot_skeleton_px, skeleton_px),
            cool_fraction: ratio(cool_px, band_px),
            hot_skeleton_px,
            skeleton_px,
        }
    }
}

/// 8-neighbourhood of `(x, y)` in Zhang-Suen order P2..P9, starting
/// north and going clockwise. Out-of-range neighbours read as off.
fn neighbours(on: &[bool], width: u32, height: u32, x: u32, y: u32) -> [bool; 8] {
    const OFFSETS: [(i64, i64); 8] = [
        (0, -1),
        (1, -1),
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
        (-1, 0),
        (-1, -1),
    ];
    OFFSETS.map(|(dx, dy)| {
        let nx = i64::from(x) + dx;
        let ny = i64::from(y) + dy;
        if nx < 0 || ny < 0 || nx >= i64::from(width) || ny >= i64::from(height) {
            return false;
        }
        usize::try_from(ny * i64::from(width) + nx)
            .ok()
            .and_then(|i| on.get(i).copied())
            .unwrap_or(false)
    })
}

/// Reduce a binary mask to a 1-pixel-wide skeleton (Zhang-Suen).
///
/// Every 8-connected component keeps at least one pixel: when a
/// subiteration would delete a whole component (a 2x2 block, or the
/// last ring of a compact blob), its first pixel in raster order stays.
///
/// Terminates when a full pass removes nothing; every productive pass
/// removes at least one pixel, so the pass count is bounded by the pixel
/// count.
#[must_use = "returns the skeleton"]
pub fn thin(mask: &GrayImage) -> GrayImage {
    let (w, h) = mask.dimensions();
    let mut on: Vec<bool> = mask.pixels().map(|p| p.0[0] > 0).collect();
    let idx = |x: u32, y: u32| y as usize * w as usize + x as usize;

    loop {
        let mut changed = false;
        for step in 0..2 {
            let mut remove = Vec::new();
            for y in 0..h {
                for x in 0..w {
                    if !on[idx(x, y)] {
                        continue;
                    }
                    let n = neighbours(&on, w, h, x, y);
                    let [p2, p3, p4, p5, p6, p7, p8, p9] = n;
                    let b = n.iter().filter(|&&v| v).count();
                    if !(2..=6).contains(&b) {
                        continue;
                    }
                    let ring = [p2, p3, p4, p5, p6, p7, p8, p9, p2];
                    let a = ring.windows(2).filter(|w| !w[0] && w[1]).count();
                    if a != 1 {
                        continue;
                    }
                    let keep = if step == 0 {
                        (p2 && p4 && p6) || (p4 && p6 && p8)
                    } else {
                        (p2 && p4 && p8) || (p2 && p6 && p8)
                    };
                    if !keep {
                        remove.push(idx(x, y));
                    }
                }
            }
            if !remove.is_empty() {
                spare_last_pixels(&on, Dimensions { width: w, height: h }, &mut remove);
            }
            changed |= !remove.is_empty();
            for i in remove {
                on[i] = false;
            }
        }
        if !changed {
            break;
        }
    }

    mask::from_fn(Dimensions { width: w, height: h }, |x, y| on[idx(x, y)])
}

/// Take one pixel out of `remove` for every 8-connected component of
/// `on` that `remove` would otherwise empty. `remove` is in raster order.
fn spare_last_pixels(on: &[bool], dims: Dimensions, remove: &mut Vec<usize>) {
    let width = dims.width as usize;
    let current = mask::from_fn(dims, |x, y| on[y as usize * width + x as usize]);
    let labels = connected_components(&current, Connectivity::Eight, Luma([0u8]));
    let labels = labels.as_raw();

    let components = labels.iter().copied().max().unwrap_or(0) as usize + 1;
    let mut size = vec![0usize; components];
    for &label in labels {
        size[label as usize] += 1;
    }
    let mut doomed = vec![0usize; components];
    for &i in &*remove {
        doomed[labels[i] as usize] += 1;
    }

    let mut spared = vec![false; components];
    remove.retain(|&i| {
        let label = labels[i] as usize;
        if doomed[label] == size[label] && !spared[label] {
            spared[label] = true;
            return false;
        }
        true
    });
}

/// Endpoints (degree 1) and junctions (degree >= 3) of a skeleton, in
/// raster order.
fn find_nodes(skeleton: &GrayImage) -> (Vec<(u32, u32)>, Vec<(u32, u32)>) {
    let (w, h) = skeleton.dimensions();
    let on: Vec<bool> = skeleton.pixels().map(|p| p.0[0] > 0).collect();
    let mut endpoints = Vec::new();
    let mut junctions = Vec::new();
    for y in 0..h {
        for x in 0..w {
            if !on[y as usize * w as usize + x as usize] {
                continue;
            }
            let degree = neighbours(&on, w, h, x, y).iter().filter(|&&v| v).count();
            if degree == 1 {
                endpoints.push((x, y));
            } else if degree >= 3 {
                junctions.push((x, y));
            }
        }
    }
    (endpoints, junctions)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    fn blob_at(bbox: BoundingBox) -> BlobDescriptor {
        BlobDescriptor {
            id: 1,
            bbox,
            area: bbox.width * bbox.height,
            centroid: Point::new(
                f64::from(bbox.x) + f64::from(bbox.width) / 2.0,
                f64::from(bbox.y) + f64::from(bbox.height) / 2.0,
            ),
            mean_delta_e: 10.0,
            peak_delta_e: 20.0,
            mean_hue: 5.0,
            mean_saturation: 220.0,
            mean_value: 230.0,
            elongation: 1.0,
        }
    }

    #[test]
    fn thick_bar_thins_to_single_pixel_line() {
        let bar = mask::from_fn(dims(40, 15), |x, y| (5..35).contains(&x) && (5..10).contains(&y));
        let skel = thin(&bar);
        assert!(mask::count(&skel) > 0);
        for x in 10..30 {
            let column = (0..15).filter(|&y| is_on(&skel, x, y)).count();
            assert_eq!(column, 1, "column {x}");
        }
        assert!(mask::is_subset(&skel, &bar));
    }

    #[test]
    fn solid_blocks_keep_at_least_one_pixel() {
        for side in [2u32, 3, 24] {
            let block = mask::from_fn(dims(40, 40), |x, y| {
                (8..8 + side).contains(&x) && (8..8 + side).contains(&y)
            });
            let skel = thin(&block);
            assert!(mask::count(&skel) >= 1, "{side}x{side} block vanished");
            assert!(mask::is_subset(&skel, &block));
        }
    }

    #[test]
    fn every_component_survives_thinning() {
        let blocks = mask::from_fn(dims(30, 12), |x, y| {
            let column = (2..4).contains(&x) || (10..12).contains(&x) || (20..22).contains(&x);
            (2..4).contains(&y) && column
        });
        let skel = thin(&blocks);
        assert_eq!(mask::count(&skel), 3);
        for x0 in [2, 10, 20] {
            let kept = (x0..x0 + 2)
                .flat_map(|x| (2..4).map(move |y| (x, y)))
                .filter(|&(x, y)| is_on(&skel, x, y))
                .count();
            assert_eq!(kept, 1, "block at x={x0}");
        }
    }

    #[test]
    fn isolated_compact_blob_is_not_a_joint() {
        let block =
            mask::from_fn(dims(40, 40), |x, y| (10..12).contains(&x) && (10..12).contains(&y));
        let g = WireGraph::from_parts(thin(&block), block).unwrap();
        assert_eq!(mask::count(g.skeleton()), 1);
        assert_eq!(g.joint_count(), 0);
    }

    #[test]
    fn empty_mask_thins_to_nothing() {
        let skel = thin(&GrayImage::new(10, 10));
        assert_eq!(mask::count(&skel), 0);
    }

    #[test]
    fn line_has_two_endpoints_and_no_junctions() {
        let line = mask::from_fn(dims(30, 20), |x, y| y == 10 && (5..25).contains(&x));
        let g = WireGraph::from_parts(line, GrayImage::new(30, 20)).unwrap();
        assert_eq!(g.endpoints(), &[(5, 10), (24, 10)]);
        assert!(g.junctions().is_empty());
        assert_eq!(g.joint_count(), 2);
    }

    #[test]
    fn tee_has_junctions_at_the_meeting_point() {
        let tee = mask::from_fn(dims(30, 30), |x, y| {
            (y == 10 && (5..25).contains(&x)) || (x == 15 && (10..20).contains(&y))
        });
        let g = WireGraph::from_parts(tee, GrayImage::new(30, 30)).unwrap();
        assert!(!g.junctions().is_empty());
        for &(x, y) in g.junctions() {
            assert!(x.abs_diff(15) <= 1 && y.abs_diff(10) <= 1, "({x}, {y})");
        }
        assert_eq!(g.endpoints().len(), 3);
    }

    #[test]
    fn joint_proximity_uses_euclidean_radius() {
        let line = mask::from_fn(dims(30, 20), |x, y| y == 10 && (5..25).contains(&x));
        let g = WireGraph::from_parts(line, GrayImage::new(30, 20)).unwrap();
        assert!(g.is_near_joint(Point::new(5.0, 17.0), 8.0));
        assert!(!g.is_near_joint(Point::new(15.0, 10.0), 8.0));
        assert!(!g.is_near_joint(Point::new(11.0, 16.0), 8.0));
    }

    #[test]
    fn coverage_and_cool_fraction_on_a_straight_wire() {
        let skel = mask::from_fn(dims(60, 30), |_, y| y == 15);
        let hot =
            mask::from_fn(dims(60, 30), |x, y| (20..24).contains(&x) && (14..17).contains(&y));
        let g = WireGraph::from_parts(skel, hot).unwrap();
        let blob = blob_at(BoundingBox {
            x: 20,
            y: 14,
            width: 4,
            height: 3,
        });
        let f = g.features(&blob, &TopologyConfig::default());
        assert_eq!(f.skeleton_px, 24);
        assert_eq!(f.hot_skeleton_px, 6);
        assert!((f.coverage - 0.25).abs() < 1e-12);
        assert!((f.cool_fraction - 60.0 / 72.0).abs() < 1e-12);
        assert!(!f.near_joint);
    }

    #[test]
    fn window_without_skeleton_scores_zero() {
        let g = WireGraph::from_parts(GrayImage::new(40, 40), GrayImage::new(40, 40)).unwrap();
        let f = g.features(
            &blob_at(BoundingBox {
                x: 10,
                y: 10,
                width: 5,
                height: 5,
            }),
            &TopologyConfig::default(),
        );
        assert!(f.coverage.abs() < f64::EPSILON);
        assert!(f.cool_fraction.abs() < f64::EPSILON);
        assert_eq!(f.skeleton_px, 0);
    }

    #[test]
    fn build_unions_edges_with_the_hot_mask() {
        let gray = GrayImage::from_pixel(40, 40, image::Luma([60]));
        let hot =
            mask::from_fn(dims(40, 40), |x, y| (10..30).contains(&x) && (18..22).contains(&y));
        let g = WireGraph::build(&gray, &hot, &TopologyConfig::default()).unwrap();
        assert!(mask::count(g.skeleton()) > 0);
        assert!(g.endpoints().len() >= 2);
        assert!(mask::is_subset(g.skeleton(), &dilate_square(&hot, 2)));
    }
}
