//! Incremental detection: advance stage by stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process_staged`], which runs every stage in one call,
//! [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use thermofault_pipeline::{DetectError, DetectionConfig, Pipeline};
//! # fn run(baseline: Vec<u8>, maintenance: Vec<u8>) -> Result<(), DetectError> {
//! let staged = Pipeline::new(baseline, maintenance, "TX-001", None, DetectionConfig::default())
//!     .decode()?
//!     .register()
//!     .difference()?
//!     .derive_thresholds()?
//!     .segment()?
//!     .extract_blobs()?
//!     .build_topology()?
//!     .classify()
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state, carrying
//! every previously computed intermediate so [`StagedDetection`] can
//! expose them all.

use image::GrayImage;
use tracing::debug;

use crate::classify::{Evidence, absolute_heat_fraction, classify};
use crate::color::HsvImage;
use crate::config::DetectionConfig;
use crate::grayscale::{decode_rgb, ensure_non_empty, to_gray};
use crate::register::RegisteredPair;
use crate::segment::Segmentation;
use crate::threshold::ThresholdSet;
use crate::topology::WireGraph;
use crate::types::{
    BlobDescriptor, BlobReport, DetectError, DetectionReport, DifferenceField, ImageRole, RgbImage,
};

/// Everything a run produced, final report included.
#[derive(Debug, Clone)]
pub struct StagedDetection {
    /// The durable report.
    pub report: DetectionReport,
    /// Baseline color raster.
    pub base: RgbImage,
    /// Maintenance color raster warped onto the baseline.
    pub warped: RgbImage,
    /// Per-pixel ΔE2000.
    pub delta: DifferenceField,
    /// Hot-band mask of the warped maintenance image.
    pub hot: GrayImage,
    /// `hot ∧ changed`, before morphology.
    pub gate: GrayImage,
    /// Candidate mask after morphology.
    pub candidate: GrayImage,
    /// Wire skeleton.
    pub skeleton: GrayImage,
}

/// Settings carried unchanged through every stage.
#[derive(Debug, Clone)]
struct Run {
    config: DetectionConfig,
    asset_id: String,
    sensitivity: Option<f64>,
}

/// Entry point for stage-by-stage detection.
pub struct Pipeline;

impl Pipeline {
    /// Start from encoded image bytes.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(
        baseline: Vec<u8>,
        maintenance: Vec<u8>,
        asset_id: &str,
        sensitivity: Option<f64>,
        config: DetectionConfig,
    ) -> Pending {
        Pending {
            run: Run {
                config,
                asset_id: asset_id.to_string(),
                sensitivity,
            },
            baseline,
            maintenance,
        }
    }

    /// Start from already-decoded rasters, skipping the decode stage.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::ZeroSizedImage`] if either raster is empty
    /// and [`DetectError::InvalidConfig`] if `config` fails validation.
    pub fn from_images(
        base: RgbImage,
        maintenance: RgbImage,
        asset_id: &str,
        sensitivity: Option<f64>,
        config: DetectionConfig,
    ) -> Result<Decoded, DetectError> {
        config.validate()?;
        ensure_non_empty(&base, ImageRole::Baseline)?;
        ensure_non_empty(&maintenance, ImageRole::Maintenance)?;
        Ok(Decoded {
            run: Run {
                config,
                asset_id: asset_id.to_string(),
                sensitivity,
            },
            base,
            maintenance,
        })
    }
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// State before any processing: encoded bytes only.
#[must_use = "pipeline stages are consumed by advancing, call .decode() to continue"]
pub struct Pending {
    run: Run,
    baseline: Vec<u8>,
    maintenance: Vec<u8>,
}

impl Pending {
    /// Combined size of both encoded inputs.
    #[must_use]
    pub fn input_bytes(&self) -> usize {
        self.baseline.len() + self.maintenance.len()
    }

    /// Validate the configuration and decode both images.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::InvalidConfig`] for a bad configuration,
    /// or an input error for empty, undecodable or zero-sized images.
    pub fn decode(self) -> Result<Decoded, DetectError> {
        self.run.config.validate()?;
        let base = decode_rgb(&self.baseline, ImageRole::Baseline)?;
        let maintenance = decode_rgb(&self.maintenance, ImageRole::Maintenance)?;
        Ok(Decoded {
            run: self.run,
            base,
            maintenance,
        })
    }
}

// ───────────────────────── Stage 1: Decoded ──────────────────────────

/// Both images decoded, not yet aligned.
#[must_use = "pipeline stages are consumed by advancing, call .register() to continue"]
pub struct Decoded {
    run: Run,
    base: RgbImage,
    maintenance: RgbImage,
}

impl Decoded {
    /// Baseline raster.
    #[must_use]
    pub const fn base(&self) -> &RgbImage {
        &self.base
    }

    /// Maintenance raster as decoded.
    #[must_use]
    pub const fn maintenance(&self) -> &RgbImage {
        &self.maintenance
    }

    /// Align the maintenance image onto the baseline. Never fails.
    pub fn register(self) -> Registered {
        let pair = crate::register::register(
            &self.base,
            &self.maintenance,
            &self.run.config.registration,
        );
        Registered {
            base_gray: to_gray(pair.base()),
            warped_gray: to_gray(pair.warped()),
            run: self.run,
            pair,
        }
    }
}

// ───────────────────────── Stage 2: Registered ──────────────────────────

/// Maintenance image warped into baseline geometry.
#[must_use = "pipeline stages are consumed by advancing, call .difference() to continue"]
pub struct Registered {
    run: Run,
    pair: RegisteredPair,
    base_gray: GrayImage,
    warped_gray: GrayImage,
}

impl Registered {
    /// The registered pair.
    #[must_use]
    pub const fn pair(&self) -> &RegisteredPair {
        &self.pair
    }

    /// Compute the ΔE2000 field and the maintenance HSV raster.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::ShapeMismatch`] if registration produced
    /// rasters of different sizes.
    pub fn difference(self) -> Result<Differenced, DetectError> {
        let delta = crate::difference::delta_e_map(self.pair.base(), self.pair.warped())?;
        debug!(max_delta_e = delta.field().max(), "computed difference map");
        Ok(Differenced {
            hsv: HsvImage::from_rgb(self.pair.warped()),
            run: self.run,
            pair: self.pair,
            base_gray: self.base_gray,
            warped_gray: self.warped_gray,
            delta,
        })
    }
}

// ───────────────────────── Stage 3: Differenced ──────────────────────────

/// ΔE field available.
#[must_use = "pipeline stages are consumed by advancing, call .derive_thresholds() to continue"]
pub struct Differenced {
    run: Run,
    pair: RegisteredPair,
    base_gray: GrayImage,
    warped_gray: GrayImage,
    delta: DifferenceField,
    hsv: HsvImage,
}

impl Differenced {
    /// Per-pixel ΔE2000.
    #[must_use]
    pub const fn delta(&self) -> &DifferenceField {
        &self.delta
    }

    /// Measure similarity and derive the ΔE thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::InvalidConfig`] if the sensitivity is
    /// outside `[0, 100]`.
    pub fn derive_thresholds(self) -> Result<Thresholded, DetectError> {
        let cfg = &self.run.config.thresholds;
        let ssim = crate::similarity::ssim(&self.base_gray, &self.warped_gray, cfg.ssim_window);
        let palette = crate::similarity::histogram_correlation(
            &self.base_gray,
            &self.warped_gray,
            cfg.histogram_bins,
        );
        let thresholds = crate::threshold::derive(ssim, palette, self.run.sensitivity, cfg)?;
        debug!(
            ssim,
            palette_correlation = palette,
            pot = thresholds.pot(),
            fault = thresholds.fault(),
            provenance = thresholds.provenance(),
            "derived thresholds"
        );
        Ok(Thresholded {
            run: self.run,
            pair: self.pair,
            warped_gray: self.warped_gray,
            delta: self.delta,
            hsv: self.hsv,
            thresholds,
        })
    }
}

// ───────────────────────── Stage 4: Thresholded ──────────────────────────

/// Thresholds derived.
#[must_use = "pipeline stages are consumed by advancing, call .segment() to continue"]
pub struct Thresholded {
    run: Run,
    pair: RegisteredPair,
    warped_gray: GrayImage,
    delta: DifferenceField,
    hsv: HsvImage,
    thresholds: ThresholdSet,
}

impl Thresholded {
    /// Derived thresholds.
    #[must_use]
    pub const fn thresholds(&self) -> &ThresholdSet {
        &self.thresholds
    }

    /// Build the hot, gate and candidate masks.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::ShapeMismatch`] on inconsistent rasters.
    pub fn segment(self) -> Result<Segmented, DetectError> {
        let segmentation = crate::segment::segment(
            &self.hsv,
            &self.delta,
            self.thresholds.pot(),
            &self.run.config.hot_bands,
            &self.run.config.segmentation,
        )?;
        debug!(
            hot_px = crate::mask::count(&segmentation.hot),
            gate_px = crate::mask::count(&segmentation.gate),
            candidate_px = crate::mask::count(&segmentation.candidate),
            "segmented hot regions"
        );
        Ok(Segmented {
            run: self.run,
            pair: self.pair,
            warped_gray: self.warped_gray,
            delta: self.delta,
            hsv: self.hsv,
            thresholds: self.thresholds,
            segmentation,
        })
    }
}

// ───────────────────────── Stage 5: Segmented ──────────────────────────

/// Candidate mask available.
#[must_use = "pipeline stages are consumed by advancing, call .extract_blobs() to continue"]
pub struct Segmented {
    run: Run,
    pair: RegisteredPair,
    warped_gray: GrayImage,
    delta: DifferenceField,
    hsv: HsvImage,
    thresholds: ThresholdSet,
    segmentation: Segmentation,
}

impl Segmented {
    /// Segmentation masks.
    #[must_use]
    pub const fn segmentation(&self) -> &Segmentation {
        &self.segmentation
    }

    /// Label and describe the candidate regions.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::ShapeMismatch`] on inconsistent rasters.
    pub fn extract_blobs(self) -> Result<BlobsExtracted, DetectError> {
        let blobs = crate::blob::extract_blobs(
            &self.segmentation.candidate,
            &self.delta,
            &self.hsv,
            &self.run.config.blobs,
        )?;
        debug!(count = blobs.len(), "extracted blobs");
        Ok(BlobsExtracted {
            run: self.run,
            pair: self.pair,
            warped_gray: self.warped_gray,
            delta: self.delta,
            hsv: self.hsv,
            thresholds: self.thresholds,
            segmentation: self.segmentation,
            blobs,
        })
    }
}

// ───────────────────────── Stage 6: BlobsExtracted ──────────────────────────

/// Blob descriptors available.
#[must_use = "pipeline stages are consumed by advancing, call .build_topology() to continue"]
pub struct BlobsExtracted {
    run: Run,
    pair: RegisteredPair,
    warped_gray: GrayImage,
    delta: DifferenceField,
    hsv: HsvImage,
    thresholds: ThresholdSet,
    segmentation: Segmentation,
    blobs: Vec<BlobDescriptor>,
}

impl BlobsExtracted {
    /// Blob descriptors.
    #[must_use]
    pub fn blobs(&self) -> &[BlobDescriptor] {
        &self.blobs
    }

    /// Skeletonize the wiring and locate joint candidates.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::ShapeMismatch`] on inconsistent rasters.
    pub fn build_topology(self) -> Result<TopologyBuilt, DetectError> {
        let graph = WireGraph::build(
            &self.warped_gray,
            &self.segmentation.candidate,
            &self.run.config.topology,
        )?;
        debug!(
            skeleton_px = crate::mask::count(graph.skeleton()),
            endpoints = graph.endpoints().len(),
            junctions = graph.junctions().len(),
            joints = graph.joint_count(),
            "built wire topology"
        );
        Ok(TopologyBuilt {
            run: self.run,
            pair: self.pair,
            delta: self.delta,
            hsv: self.hsv,
            thresholds: self.thresholds,
            segmentation: self.segmentation,
            blobs: self.blobs,
            graph,
        })
    }
}

// ───────────────────────── Stage 7: TopologyBuilt ──────────────────────────

/// Wire graph available.
#[must_use = "pipeline stages are consumed by advancing, call .classify() to continue"]
pub struct TopologyBuilt {
    run: Run,
    pair: RegisteredPair,
    delta: DifferenceField,
    hsv: HsvImage,
    thresholds: ThresholdSet,
    segmentation: Segmentation,
    blobs: Vec<BlobDescriptor>,
    graph: WireGraph,
}

impl TopologyBuilt {
    /// Wire graph.
    #[must_use]
    pub const fn graph(&self) -> &WireGraph {
        &self.graph
    }

    /// Classify every blob and assemble the report.
    pub fn classify(self) -> Classified {
        let cfg = &self.run.config;
        let reports: Vec<BlobReport> = self
            .blobs
            .into_iter()
            .map(|descriptor| {
                let topology = self.graph.features(&descriptor, &cfg.topology);
                let heat = absolute_heat_fraction(
                    &self.hsv,
                    descriptor.bbox,
                    &cfg.hot_bands,
                    &cfg.classifier,
                );
                let evidence = Evidence::gather(
                    &descriptor,
                    topology,
                    heat,
                    self.thresholds.pair(),
                    &cfg.hot_bands,
                    cfg.blobs.wire_elongation,
                );
                let classification = classify(evidence, self.thresholds.pot(), &cfg.classifier);
                debug!(
                    id = descriptor.id,
                    label = %classification.label(),
                    subtype = %classification.subtype(),
                    confidence = classification.confidence(),
                    "classified blob"
                );
                BlobReport {
                    descriptor,
                    topology,
                    absolute_heat_fraction: heat,
                    classification,
                }
            })
            .collect();

        let alignment = crate::report::alignment_metadata(&self.pair, self.thresholds.ssim());
        let report = crate::report::assemble(
            &self.run.asset_id,
            reports,
            alignment,
            self.thresholds,
            self.pair.dimensions(),
        );
        debug!(label = %report.image_label, blobs = report.blobs.len(), "assembled report");

        Classified {
            report,
            pair: self.pair,
            delta: self.delta,
            segmentation: self.segmentation,
            graph: self.graph,
        }
    }
}

// ───────────────────────── Stage 8: Classified ──────────────────────────

/// Final state: the report is ready.
#[must_use = "call .into_result() or .report() to use the output"]
pub struct Classified {
    report: DetectionReport,
    pair: RegisteredPair,
    delta: DifferenceField,
    segmentation: Segmentation,
    graph: WireGraph,
}

impl Classified {
    /// The report.
    #[must_use]
    pub const fn report(&self) -> &DetectionReport {
        &self.report
    }

    /// Consume the pipeline, keeping only the report.
    #[must_use]
    pub fn into_report(self) -> DetectionReport {
        self.report
    }

    /// Consume the pipeline into the full staged output.
    #[must_use]
    pub fn into_result(self) -> StagedDetection {
        let skeleton = self.graph.skeleton().clone();
        StagedDetection {
            report: self.report,
            base: self.pair.base().clone(),
            warped: self.pair.warped().clone(),
            delta: self.delta,
            hot: self.segmentation.hot,
            gate: self.segmentation.gate,
            candidate: self.segmentation.candidate,
            skeleton,
        }
    }
}
