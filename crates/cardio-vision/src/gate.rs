//! Statistical admission check for preprocessed frames.
//!
//! Rejects frames that plainly carry no anatomy (probe lifted off skin,
//! frozen black screen, saturated gain) before an expensive model runs on
//! them.  Defaults are permissive: a false admit costs one wasted model
//! call, a false reject starves the clinician of any result.

use serde::{Deserialize, Serialize};

use crate::luma::mean_and_std;

/// Tunable gate thresholds, all on normalised `[0, 1]` samples.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateThresholds {
    /// Minimum standard deviation (structural variation).
    pub min_std: f32,
    /// Lower edge of the permitted mean-brightness band.
    pub min_mean: f32,
    /// Upper edge of the permitted mean-brightness band.
    pub max_mean: f32,
    /// Minimum `max − min` dynamic range.
    pub min_range: f32,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            min_std: 0.02,
            min_mean: 0.01,
            max_mean: 0.95,
            min_range: 0.08,
        }
    }
}

/// Summary statistics of one sample set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    pub mean: f32,
    pub std: f32,
    pub min: f32,
    pub max: f32,
}

impl SampleStats {
    pub fn of(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let (mean, std) = mean_and_std(samples);
        let (min, max) = samples
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        Self {
            mean,
            std,
            min,
            max,
        }
    }

    pub fn range(&self) -> f32 {
        self.max - self.min
    }
}

/// Why a frame was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRejection {
    /// No samples at all.
    Empty,
    /// Standard deviation below `min_std`.
    LowContrast,
    /// Mean outside `[min_mean, max_mean]`.
    BrightnessOutOfBand,
    /// `max − min` below `min_range`.
    NarrowDynamicRange,
}

/// Outcome of gating one frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub stats: SampleStats,
    pub rejection: Option<GateRejection>,
}

impl GateDecision {
    pub fn admitted(&self) -> bool {
        self.rejection.is_none()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CardiacContentGate {
    thresholds: GateThresholds,
}

impl CardiacContentGate {
    pub fn new(thresholds: GateThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &GateThresholds {
        &self.thresholds
    }

    /// Evaluate normalised samples, keeping the statistics for reporting.
    pub fn evaluate(&self, samples: &[f32]) -> GateDecision {
        let stats = SampleStats::of(samples);
        let t = &self.thresholds;
        let rejection = if samples.is_empty() {
            Some(GateRejection::Empty)
        } else if stats.std < t.min_std {
            Some(GateRejection::LowContrast)
        } else if stats.mean < t.min_mean || stats.mean > t.max_mean {
            Some(GateRejection::BrightnessOutOfBand)
        } else if stats.range() < t.min_range {
            Some(GateRejection::NarrowDynamicRange)
        } else {
            None
        };
        GateDecision { stats, rejection }
    }

    /// `true` when the samples look like they could contain cardiac content.
    pub fn admit(&self, samples: &[f32]) -> bool {
        self.evaluate(samples).admitted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_frame_is_rejected() {
        let gate = CardiacContentGate::default();
        let flat = vec![0.4f32; 64 * 64];
        let decision = gate.evaluate(&flat);
        assert!(!decision.admitted());
        assert_eq!(decision.rejection, Some(GateRejection::LowContrast));
    }

    #[test]
    fn strong_edges_at_mid_brightness_are_admitted() {
        let gate = CardiacContentGate::default();
        // Bright walls on a dark cavity: alternating bands around mid-grey.
        let samples: Vec<f32> = (0..64 * 64)
            .map(|i| if (i % 64) / 8 % 2 == 0 { 0.2 } else { 0.8 })
            .collect();
        assert!(gate.admit(&samples));
    }

    #[test]
    fn black_frame_with_faint_speckle_is_rejected() {
        let gate = CardiacContentGate::default();
        let mut samples = vec![0.0f32; 1000];
        for v in samples.iter_mut().step_by(5) {
            *v = 0.04;
        }
        let decision = gate.evaluate(&samples);
        assert!(!decision.admitted());
    }

    #[test]
    fn empty_sample_set_is_rejected() {
        let gate = CardiacContentGate::default();
        assert_eq!(gate.evaluate(&[]).rejection, Some(GateRejection::Empty));
    }

    #[test]
    fn stats_report_range() {
        let stats = SampleStats::of(&[0.1, 0.5, 0.9]);
        assert!((stats.range() - 0.8).abs() < 1e-6);
        assert!((stats.mean - 0.5).abs() < 1e-6);
    }
}
