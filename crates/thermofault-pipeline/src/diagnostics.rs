//! Detection diagnostics: timing and counts for each stage.
//!
//! The crate never reads a clock itself. Callers supply a [`Clock`]
//! implementation, so the core stays sans-IO and tests can use a fake.
//!
//! Durations are serialized as fractional seconds (`f64`) since
//! `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::DetectionConfig;
use crate::pipeline::{Pipeline, StagedDetection};
use crate::types::{DetectError, FaultLabel, TransformKind};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of timestamps for stage timing.
pub trait Clock {
    /// Opaque timestamp type.
    type Instant;

    /// Current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Diagnostics collected from a single detection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionDiagnostics {
    /// Decoding both images.
    pub decode: StageDiagnostics,
    /// Registration and warping.
    pub registration: StageDiagnostics,
    /// ΔE2000 map.
    pub difference: StageDiagnostics,
    /// SSIM, palette check and threshold derivation.
    pub thresholds: StageDiagnostics,
    /// Hot/gate/candidate masks.
    pub segmentation: StageDiagnostics,
    /// Blob labelling and description.
    pub blobs: StageDiagnostics,
    /// Skeleton and joint candidates.
    pub topology: StageDiagnostics,
    /// Classification and report assembly.
    pub classification: StageDiagnostics,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Image decoding.
    Decode {
        /// Combined size of both encoded inputs.
        input_bytes: usize,
        /// Baseline width.
        width: u32,
        /// Baseline height.
        height: u32,
    },
    /// Registration.
    Registration {
        /// Whether any strategy succeeded.
        success: bool,
        /// Applied model family.
        kind: TransformKind,
        /// Alignment score.
        score: f64,
        /// Whether the maintenance image was resized first.
        resized: bool,
    },
    /// ΔE2000 map.
    Difference {
        /// Largest ΔE in the field.
        max_delta_e: f32,
    },
    /// Threshold derivation.
    Thresholds {
        /// Structural similarity of the registered pair.
        ssim: f64,
        /// Histogram correlation.
        palette_correlation: f64,
        /// Pot threshold.
        pot: f64,
        /// Fault threshold.
        fault: f64,
    },
    /// Segmentation.
    Segmentation {
        /// Hot-band pixels.
        hot_pixels: u64,
        /// Pixels passing the hot ∧ changed gate.
        gate_pixels: u64,
        /// Pixels surviving morphology.
        candidate_pixels: u64,
    },
    /// Blob extraction.
    Blobs {
        /// Blobs above the speckle floor.
        count: usize,
    },
    /// Wire topology.
    Topology {
        /// Skeleton pixels.
        skeleton_pixels: u64,
        /// Degree-1 skeleton pixels.
        endpoints: usize,
        /// Degree-3+ skeleton pixels.
        junctions: usize,
    },
    /// Classification.
    Classification {
        /// Image-level label.
        image_label: FaultLabel,
        /// Faulty blobs.
        faulty: usize,
        /// Potentially faulty blobs.
        potentially_faulty: usize,
    },
}

impl DetectionDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Detection Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let stages = [
            ("Decode", &self.decode),
            ("Registration", &self.registration),
            ("Difference", &self.difference),
            ("Thresholds", &self.thresholds),
            ("Segmentation", &self.segmentation),
            ("Blobs", &self.blobs),
            ("Topology", &self.topology),
            ("Classification", &self.classification),
        ];

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes,
            width,
            height,
        } => format!("{input_bytes} bytes -> {width}x{height}"),
        StageMetrics::Registration {
            success,
            kind,
            score,
            resized,
        } => {
            let status = if *success { "ok" } else { "failed" };
            let resized = if *resized { " (resized)" } else { "" };
            format!("{status} {kind} score={score:.3}{resized}")
        }
        StageMetrics::Difference { max_delta_e } => format!("max dE={max_delta_e:.1}"),
        StageMetrics::Thresholds {
            ssim,
            palette_correlation,
            pot,
            fault,
        } => format!(
            "ssim={ssim:.3} palette={palette_correlation:.3} pot={pot:.2} fault={fault:.2}"
        ),
        StageMetrics::Segmentation {
            hot_pixels,
            gate_pixels,
            candidate_pixels,
        } => format!("hot={hot_pixels} gate={gate_pixels} candidate={candidate_pixels}"),
        StageMetrics::Blobs { count } => format!("{count} blobs"),
        StageMetrics::Topology {
            skeleton_pixels,
            endpoints,
            junctions,
        } => format!("skeleton={skeleton_pixels} endpoints={endpoints} junctions={junctions}"),
        StageMetrics::Classification {
            image_label,
            faulty,
            potentially_faulty,
        } => format!("{image_label} (faulty={faulty} potential={potentially_faulty})"),
    }
}

/// Time one stage.
fn timed<C: Clock, T>(clock: &C, f: impl FnOnce() -> T) -> (T, Duration) {
    let start = clock.now();
    let out = f();
    (out, clock.elapsed(&start))
}

/// Run the whole pipeline, recording per-stage durations and metrics.
///
/// # Errors
///
/// Same as [`crate::process_staged`].
#[allow(clippy::too_many_lines)]
pub fn process_staged_with_diagnostics<C: Clock>(
    baseline: &[u8],
    maintenance: &[u8],
    asset_id: &str,
    sensitivity: Option<f64>,
    config: &DetectionConfig,
    clock: &C,
) -> Result<(StagedDetection, DetectionDiagnostics), DetectError> {
    let start = clock.now();
    let pending = Pipeline::new(
        baseline.to_vec(),
        maintenance.to_vec(),
        asset_id,
        sensitivity,
        config.clone(),
    );
    let input_bytes = pending.input_bytes();

    let (decoded, duration) = timed(clock, || pending.decode());
    let decoded = decoded?;
    let decode = StageDiagnostics {
        duration,
        metrics: StageMetrics::Decode {
            input_bytes,
            width: decoded.base().width(),
            height: decoded.base().height(),
        },
    };

    let (registered, duration) = timed(clock, || decoded.register());
    let pair = registered.pair();
    let registration = StageDiagnostics {
        duration,
        metrics: StageMetrics::Registration {
            success: pair.success(),
            kind: pair.kind(),
            score: pair.score(),
            resized: pair.resized(),
        },
    };

    let (differenced, duration) = timed(clock, || registered.difference());
    let differenced = differenced?;
    let difference = StageDiagnostics {
        duration,
        metrics: StageMetrics::Difference {
            max_delta_e: differenced.delta().field().max(),
        },
    };

    let (thresholded, duration) = timed(clock, || differenced.derive_thresholds());
    let thresholded = thresholded?;
    let t = thresholded.thresholds();
    let thresholds = StageDiagnostics {
        duration,
        metrics: StageMetrics::Thresholds {
            ssim: t.ssim(),
            palette_correlation: t.palette_correlation(),
            pot: t.pot(),
            fault: t.fault(),
        },
    };

    let (segmented, duration) = timed(clock, || thresholded.segment());
    let segmented = segmented?;
    let s = segmented.segmentation();
    let segmentation = StageDiagnostics {
        duration,
        metrics: StageMetrics::Segmentation {
            hot_pixels: crate::mask::count(&s.hot),
            gate_pixels: crate::mask::count(&s.gate),
            candidate_pixels: crate::mask::count(&s.candidate),
        },
    };

    let (extracted, duration) = timed(clock, || segmented.extract_blobs());
    let extracted = extracted?;
    let blobs = StageDiagnostics {
        duration,
        metrics: StageMetrics::Blobs {
            count: extracted.blobs().len(),
        },
    };

    let (built, duration) = timed(clock, || extracted.build_topology());
    let built = built?;
    let g = built.graph();
    let topology = StageDiagnostics {
        duration,
        metrics: StageMetrics::Topology {
            skeleton_pixels: crate::mask::count(g.skeleton()),
            endpoints: g.endpoints().len(),
            junctions: g.junctions().len(),
        },
    };

    let (classified, duration) = timed(clock, || built.classify());
    let report = classified.report();
    let classification = StageDiagnostics {
        duration,
        metrics: StageMetrics::Classification {
            image_label: report.image_label,
            faulty: report.count(FaultLabel::Faulty),
            potentially_faulty: report.count(FaultLabel::PotentiallyFaulty),
        },
    };

    let staged = classified.into_result();
    let diagnostics = DetectionDiagnostics {
        decode,
        registration,
        difference,
        thresholds,
        segmentation,
        blobs,
        topology,
        classification,
        total_duration: clock.elapsed(&start),
    };
    Ok((staged, diagnostics))
}
