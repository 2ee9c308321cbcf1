//! Adaptive ΔE thresholds.
//!
//! The pot/fault pair is chosen from the registration quality (SSIM),
//! optionally rescaled by an operator sensitivity, and softened when the
//! two images' tonal distributions disagree (palette or range change
//! between visits). Every intermediate value is kept for the report.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{ThresholdConfig, ThresholdPair};
use crate::types::DetectError;

/// Registration-quality regime selected by the SSIM split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityRegime {
    /// SSIM at or above the split: tight thresholds.
    High,
    /// SSIM below the split: looser thresholds.
    Low,
}

/// What set the final pot threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdSource {
    /// Base value from the similarity regime.
    Similarity,
    /// Operator sensitivity rescaling.
    Sensitivity,
}

impl fmt::Display for SimilarityRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => f.write_str("ssim_high"),
            Self::Low => f.write_str("ssim_low"),
        }
    }
}

/// Derived ΔE thresholds and their provenance.
///
/// `fault >= pot` holds for every value produced by [`derive`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pot: f64,
    fault: f64,
    base: ThresholdPair,
    ratio: f64,
    scale: f64,
    sensitivity: Option<f64>,
    source: ThresholdSource,
    regime: SimilarityRegime,
    ssim: f64,
    palette_correlation: f64,
    palette_softened: bool,
    provenance: String,
}

impl ThresholdSet {
    /// "Potentially faulty" ΔE threshold.
    #[must_use]
    pub const fn pot(&self) -> f64 {
        self.pot
    }

    /// "Faulty" ΔE threshold.
    #[must_use]
    pub const fn fault(&self) -> f64 {
        self.fault
    }

    /// The effective pot/fault pair.
    #[must_use]
    pub const fn pair(&self) -> ThresholdPair {
        ThresholdPair {
            pot: self.pot,
            fault: self.fault,
        }
    }

    /// Regime base values before any adjustment.
    #[must_use]
    pub const fn base(&self) -> ThresholdPair {
        self.base
    }

    /// Base fault:pot ratio.
    #[must_use]
    pub const fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Sensitivity scale applied to the pot base (1.0 without one).
    #[must_use]
    pub const fn scale(&self) -> f64 {
        self.scale
    }

    /// Operator sensitivity percentage, if given.
    #[must_use]
    pub const fn sensitivity(&self) -> Option<f64> {
        self.sensitivity
    }

    /// What set the pot threshold.
    #[must_use]
    pub const fn source(&self) -> ThresholdSource {
        self.source
    }

    /// Registration-quality regime.
    #[must_use]
    pub const fn regime(&self) -> SimilarityRegime {
        self.regime
    }

    /// SSIM the regime was chosen from.
    #[must_use]
    pub const fn ssim(&self) -> f64 {
        self.ssim
    }

    /// Histogram correlation of the registered pair.
    #[must_use]
    pub const fn palette_correlation(&self) -> f64 {
        self.palette_correlation
    }

    /// Whether the palette check softened both thresholds.
    #[must_use]
    pub const fn palette_softened(&self) -> bool {
        self.palette_softened
    }

    /// Tag string, e.g. `ssim_high+sensitivity=75+palette_softened`.
    #[must_use]
    pub fn provenance(&self) -> &str {
        &self.provenance
    }
}

/// Derive the thresholds for one run.
///
/// # Errors
///
/// Returns [`DetectError::InvalidConfig`] if `sensitivity` is outside
/// `[0, 100]` or not finite.
pub fn derive(
    ssim: f64,
    palette_correlation: f64,
    sensitivity: Option<f64>,
    config: &ThresholdConfig,
) -> Result<ThresholdSet, DetectError> {
    if let Some(p) = sensitivity {
        if !(0.0..=100.0).contains(&p) {
            return Err(DetectError::InvalidConfig(format!(
                "sensitivity must be in [0, 100], got {p}"
            )));
        }
    }

    let (regime, base, clamp) = if ssim >= config.ssim_split {
        (SimilarityRegime::High, config.high_similarity, config.high_clamp)
    } else {
        (SimilarityRegime::Low, config.low_similarity, config.low_clamp)
    };
    let ratio = base.fault / base.pot;
    let mut tags = vec![regime.to_string()];

    let (mut pot, mut fault, scale, source) = match sensitivity {
        Some(p) => {
            let scale = config
                .sensitivity_scale_span
                .mul_add(-p / 100.0, config.sensitivity_scale_max);
            let pot = (base.pot * scale).clamp(clamp.0, clamp.1);
            tags.push(format!("sensitivity={p}"));
            (pot, pot * ratio, scale, ThresholdSource::Sensitivity)
        }
        None => (base.pot, base.fault, 1.0, ThresholdSource::Similarity),
    };

    let palette_softened = palette_correlation < config.palette_min_correlation;
    if palette_softened {
        pot = (pot - config.palette_softening).max(config.softened_pot_floor);
        fault = (fault - config.palette_softening).max(config.softened_fault_floor);
        tags.push("palette_softened".to_string());
    }
    fault = fault.max(pot);

    Ok(ThresholdSet {
        pot,
        fault,
        base,
        ratio,
        scale,
        sensitivity,
        source,
        regime,
        ssim,
        palette_correlation,
        palette_softened,
        provenance: tags.join("+"),
    })
}
