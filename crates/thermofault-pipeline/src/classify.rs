//! Rule-based blob classifier.
//!
//! A blob moves through three explicit states:
//!
//! ```text
//! Unclassified --route()--> Routed --decide()--> Decided --finish()--> Classification
//!                                                   |
//!                                               promote()
//! ```
//!
//! [`Route`] picks the topology branch, [`Routed::decide`] applies the
//! color/ΔE flags for that branch, and [`Decided::promote`] rescues
//! emissive anomalies that the ΔE flags missed (for example when the
//! whole scene brightened between visits). Each step is a pure function
//! of its inputs.

use crate::color::{HsvImage, HueBand};
use crate::config::{ClassifierConfig, HotBands, ThresholdPair};
use crate::types::{
    BlobDescriptor, BoundingBox, Classification, FaultLabel, FaultSubtype, TopologyFeatures,
};

/// Share of `bbox` pixels in the maintenance image that look hot on their
/// own: inside a hot band with V at or above `heat_gate_value`, or with V
/// at or above `heat_gate_white_value` regardless of hue.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn absolute_heat_fraction(
    hsv: &HsvImage,
    bbox: BoundingBox,
    bands: &HotBands,
    config: &ClassifierConfig,
) -> f64 {
    let dims = hsv.dimensions();
    let x1 = bbox.x.saturating_add(bbox.width).min(dims.width);
    let y1 = bbox.y.saturating_add(bbox.height).min(dims.height);
    let mut total = 0u64;
    let mut hot = 0u64;
    for y in bbox.y..y1 {
        for x in bbox.x..x1 {
            let px = hsv.get(x, y);
            total += 1;
            if (bands.is_hot(px) && px.v >= config.heat_gate_value)
                || px.v >= config.heat_gate_white_value
            {
                hot += 1;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        hot as f64 / total as f64
    }
}

/// Everything the classifier looks at for one blob.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evidence {
    /// Hue band of the blob's mean hue.
    pub band: HueBand,
    /// Red/orange with peak ΔE at or above the fault threshold.
    pub faulty: bool,
    /// Yellow with peak ΔE at or above the pot threshold, or wire-like
    /// with mean ΔE at or above it.
    pub potential: bool,
    /// Peak ΔE.
    pub peak_delta_e: f64,
    /// Mean ΔE.
    pub mean_delta_e: f64,
    /// Pixel count.
    pub area: u32,
    /// Mean V (0..255).
    pub mean_value: f64,
    /// Topology cues.
    pub topology: TopologyFeatures,
    /// See [`absolute_heat_fraction`].
    pub absolute_heat_fraction: f64,
}

impl Evidence {
    /// Compute the baseline flags for a blob.
    #[must_use]
    pub fn gather(
        blob: &BlobDescriptor,
        topology: TopologyFeatures,
        absolute_heat_fraction: f64,
        thresholds: ThresholdPair,
        bands: &HotBands,
        wire_elongation: f64,
    ) -> Self {
        let band = HueBand::of(blob.mean_hue, bands);
        let faulty = band == HueBand::RedOrange && blob.peak_delta_e >= thresholds.fault;
        let potential = (band == HueBand::Yellow && blob.peak_delta_e >= thresholds.pot)
            || (blob.is_wire_like(wire_elongation) && blob.mean_delta_e >= thresholds.pot);
        Self {
            band,
            faulty,
            potential,
            peak_delta_e: blob.peak_delta_e,
            mean_delta_e: blob.mean_delta_e,
            area: blob.area,
            mean_value: blob.mean_value,
            topology,
            absolute_heat_fraction,
        }
    }

    const fn tiered(&self) -> FaultLabel {
        if self.faulty {
            FaultLabel::Faulty
        } else if self.potential {
            FaultLabel::PotentiallyFaulty
        } else {
            FaultLabel::Normal
        }
    }

    const fn flagged(&self) -> bool {
        self.faulty || self.potential
    }
}

/// Topology branch of the decision procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Centroid lies near an endpoint or junction.
    NearJoint,
    /// On-wire, most of the local skeleton is hot.
    OnWireFull,
    /// On-wire, a small hot section on an otherwise cool wire.
    OnWirePoint,
    /// On-wire, neither full nor clearly localized.
    OnWireAmbiguous,
}

impl Route {
    /// Pick the branch for a set of topology cues.
    #[must_use]
    pub fn of(topology: &TopologyFeatures, config: &ClassifierConfig) -> Self {
        if topology.near_joint {
            Self::NearJoint
        } else if topology.coverage >= config.full_coverage {
            Self::OnWireFull
        } else if topology.coverage < config.point_coverage
            && topology.cool_fraction >= config.rest_cool
        {
            Self::OnWirePoint
        } else {
            Self::OnWireAmbiguous
        }
    }
}

// ───────────────────────── Unclassified ──────────────────────────

/// A blob with evidence but no branch yet.
#[derive(Debug, Clone, Copy)]
#[must_use = "classifier states are consumed by advancing, call .route() to continue"]
pub struct Unclassified {
    evidence: Evidence,
}

impl Unclassified {
    /// Start classifying.
    pub const fn new(evidence: Evidence) -> Self {
        Self { evidence }
    }

    /// The evidence being classified.
    #[must_use]
    pub const fn evidence(&self) -> &Evidence {
        &self.evidence
    }

    /// Select the topology branch.
    pub fn route(self, config: &ClassifierConfig) -> Routed {
        Routed {
            route: Route::of(&self.evidence.topology, config),
            evidence: self.evidence,
        }
    }
}

// ───────────────────────── Routed ──────────────────────────

/// A blob assigned to a topology branch.
#[derive(Debug, Clone, Copy)]
#[must_use = "classifier states are consumed by advancing, call .decide() to continue"]
pub struct Routed {
    evidence: Evidence,
    route: Route,
}

impl Routed {
    /// The selected branch.
    #[must_use]
    pub const fn route(&self) -> Route {
        self.route
    }

    /// Apply the branch's labeling rule.
    pub const fn decide(self) -> Decided {
        let e = &self.evidence;
        let (label, subtype) = match self.route {
            Route::NearJoint => (e.tiered(), FaultSubtype::LooseJoint),
            Route::OnWireFull => {
                let label = if e.flagged() {
                    FaultLabel::PotentiallyFaulty
                } else {
                    FaultLabel::Normal
                };
                (label, FaultSubtype::FullWireOverload)
            }
            Route::OnWirePoint => (e.tiered(), FaultSubtype::PointOverload),
            Route::OnWireAmbiguous => {
                let subtype = if e.flagged() {
                    FaultSubtype::PointOverload
                } else {
                    FaultSubtype::None
                };
                (e.tiered(), subtype)
            }
        };
        Decided {
            evidence: self.evidence,
            label,
            subtype,
            promoted: false,
        }
    }
}

// ───────────────────────── Decided ──────────────────────────

/// A blob with a label and subtype, before scoring.
#[derive(Debug, Clone, Copy)]
#[must_use = "classifier states are consumed by advancing, call .finish() to continue"]
pub struct Decided {
    evidence: Evidence,
    label: FaultLabel,
    subtype: FaultSubtype,
    promoted: bool,
}

impl Decided {
    /// Current label.
    #[must_use]
    pub const fn label(&self) -> FaultLabel {
        self.label
    }

    /// Current subtype (may be non-`None` on a `Normal` label until
    /// [`finish`](Self::finish) normalizes it).
    #[must_use]
    pub const fn subtype(&self) -> FaultSubtype {
        self.subtype
    }

    /// Whether [`promote`](Self::promote) changed the verdict.
    #[must_use]
    pub const fn promoted(&self) -> bool {
        self.promoted
    }

    /// Promote a `Normal` verdict on absolute-heat evidence. The first
    /// matching rule wins; non-`Normal` verdicts pass through.
    pub fn promote(self, config: &ClassifierConfig) -> Self {
        if self.label != FaultLabel::Normal {
            return self;
        }
        let e = &self.evidence;
        let t = &e.topology;
        let heat = e.absolute_heat_fraction;

        let promotion = if t.near_joint
            && (e.mean_value >= config.promote_value || heat >= config.promote_heat_fraction)
        {
            Some((FaultLabel::Faulty, FaultSubtype::LooseJoint))
        } else if !t.near_joint
            && t.coverage < config.point_coverage
            && t.cool_fraction >= config.rest_cool
            && heat >= config.promote_heat_fraction
        {
            Some((FaultLabel::Faulty, FaultSubtype::PointOverload))
        } else if t.coverage >= config.full_coverage && heat >= config.promote_full_heat_fraction {
            Some((FaultLabel::PotentiallyFaulty, FaultSubtype::FullWireOverload))
        } else {
            None
        };

        match promotion {
            Some((label, subtype)) => Self {
                label,
                subtype,
                promoted: true,
                ..self
            },
            None => self,
        }
    }

    /// Score the verdict.
    ///
    /// Confidence is `0.5 + 0.5 tanh((peak - pot) / scale)` plus color and
    /// topology bonuses; severity is `0.6 peak + 0.4 mean + 0.005 area`.
    /// Both are clamped by [`Classification::new`].
    #[must_use]
    pub fn finish(self, pot_threshold: f64, config: &ClassifierConfig) -> Classification {
        let e = &self.evidence;
        let t = &e.topology;

        let color_bonus = match e.band {
            HueBand::RedOrange => config.red_bonus,
            HueBand::Yellow => config.yellow_bonus,
            HueBand::Other => 0.0,
        };
        let mut topology_bonus = 0.0;
        if self.subtype == FaultSubtype::FullWireOverload && t.coverage >= config.full_coverage {
            topology_bonus += config.coverage_bonus;
        }
        if self.subtype == FaultSubtype::PointOverload
            && t.coverage < config.point_coverage
            && t.cool_fraction >= config.rest_cool
        {
            topology_bonus += config.coverage_bonus;
        }
        if self.subtype == FaultSubtype::LooseJoint && t.near_joint {
            topology_bonus += config.joint_bonus;
        }

        let confidence = 0.5f64.mul_add(
            ((e.peak_delta_e - pot_threshold) / config.confidence_scale).tanh(),
            0.5,
        ) + color_bonus
            + topology_bonus;
        let severity = 0.005f64.mul_add(
            f64::from(e.area),
            0.6f64.mul_add(e.peak_delta_e, 0.4 * e.mean_delta_e),
        );

        Classification::new(self.label, self.subtype, confidence, severity)
    }
}

/// Run the full state machine for one blob.
#[must_use]
pub fn classify(
    evidence: Evidence,
    pot_threshold: f64,
    config: &ClassifierConfig,
) -> Classification {
    Unclassified::new(evidence)
        .route(config)
        .decide()
        .promote(config)
        .finish(pot_threshold, config)
}

/// Worst label over all verdicts; `Normal` when there are none.
#[must_use]
pub fn image_label<'a>(verdicts: impl IntoIterator<Item = &'a Classification>) -> FaultLabel {
    verdicts
        .into_iter()
        .map(Classification::label)
        .max()
        .unwrap_or(FaultLabel::Normal)
}
