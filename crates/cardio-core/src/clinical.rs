//! Clinical result types handed to result consumers.
//!
//! Every metric is optional: `None` means "not available" (model missing,
//! output absent, or value withheld as implausible).  Consumers must render
//! it explicitly rather than as zero or a stale value.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─── Metric identifiers ──────────────────────────────────────────────────────

/// Identifier of one calibrated cardiac metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricId {
    /// Ejection fraction, %.
    EjectionFraction,
    /// End-diastolic volume, mL.
    EndDiastolicVolume,
    /// End-systolic volume, mL.
    EndSystolicVolume,
    /// Interventricular septal thickness at diastole (IVSd), cm.
    SeptalThickness,
    /// Posterior wall thickness at diastole (LVPWd), cm.
    PosteriorWallThickness,
    /// LV internal dimension at diastole (LVIDd), cm.
    DiastolicDimension,
    /// LV internal dimension at systole (LVIDs), cm.
    SystolicDimension,
    /// Tricuspid annular plane systolic excursion, mm.
    Tapse,
}

impl MetricId {
    pub const ALL: [MetricId; 8] = [
        MetricId::EjectionFraction,
        MetricId::EndDiastolicVolume,
        MetricId::EndSystolicVolume,
        MetricId::SeptalThickness,
        MetricId::PosteriorWallThickness,
        MetricId::DiastolicDimension,
        MetricId::SystolicDimension,
        MetricId::Tapse,
    ];

    /// Short clinical abbreviation.
    pub const fn abbreviation(self) -> &'static str {
        match self {
            Self::EjectionFraction => "EF",
            Self::EndDiastolicVolume => "EDV",
            Self::EndSystolicVolume => "ESV",
            Self::SeptalThickness => "IVSd",
            Self::PosteriorWallThickness => "LVPWd",
            Self::DiastolicDimension => "LVIDd",
            Self::SystolicDimension => "LVIDs",
            Self::Tapse => "TAPSE",
        }
    }

    pub const fn unit(self) -> &'static str {
        match self {
            Self::EjectionFraction => "%",
            Self::EndDiastolicVolume | Self::EndSystolicVolume => "mL",
            Self::SeptalThickness
            | Self::PosteriorWallThickness
            | Self::DiastolicDimension
            | Self::SystolicDimension => "cm",
            Self::Tapse => "mm",
        }
    }

    /// Percentage-valued metrics are clamped to `[0, 100]` after scaling.
    pub const fn is_percentage(self) -> bool {
        matches!(self, Self::EjectionFraction)
    }

    /// Hard physiological bounds.  A calibrated value outside them is withheld.
    pub const fn hard_bounds(self) -> (f32, f32) {
        match self {
            Self::EjectionFraction => (0.0, 100.0),
            Self::EndDiastolicVolume => (5.0, 500.0),
            Self::EndSystolicVolume => (2.0, 400.0),
            Self::SeptalThickness | Self::PosteriorWallThickness => (0.2, 3.0),
            Self::DiastolicDimension | Self::SystolicDimension => (1.0, 10.0),
            Self::Tapse => (2.0, 40.0),
        }
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbreviation())
    }
}

// ─── Calibrated metrics ──────────────────────────────────────────────────────

/// Where the reported ejection fraction came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EfSource {
    /// Temporal ejection-fraction regressor.
    TemporalModel,
    /// Direct EF head of the multi-output regressor.
    MultiOutputHead,
    /// Derived from EDV and ESV.
    Volumetric,
}

/// Advisory raised while calibrating a cycle's outputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    /// A calibrated value fell outside its hard physiological bound and was withheld.
    Implausible { metric: MetricId, value: f32 },
    /// The raw EF fell outside `[0, 100]` and was squashed into the plausible band.
    EfSquashed { raw: f32, calibrated: f32 },
    /// EF was derived from volumes because the direct head was missing or too small.
    EfDerivedFromVolumes,
}

/// Calibrated clinical quantities of one inference cycle.  Immutable once built.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibratedMetrics {
    pub ejection_fraction: Option<f32>,
    pub ef_source: Option<EfSource>,
    pub end_diastolic_volume: Option<f32>,
    pub end_systolic_volume: Option<f32>,
    pub septal_thickness: Option<f32>,
    pub posterior_wall_thickness: Option<f32>,
    pub diastolic_dimension: Option<f32>,
    pub systolic_dimension: Option<f32>,
    pub tapse: Option<f32>,
    pub advisories: Vec<Advisory>,
}

impl CalibratedMetrics {
    pub fn get(&self, id: MetricId) -> Option<f32> {
        match id {
            MetricId::EjectionFraction => self.ejection_fraction,
            MetricId::EndDiastolicVolume => self.end_diastolic_volume,
            MetricId::EndSystolicVolume => self.end_systolic_volume,
            MetricId::SeptalThickness => self.septal_thickness,
            MetricId::PosteriorWallThickness => self.posterior_wall_thickness,
            MetricId::DiastolicDimension => self.diastolic_dimension,
            MetricId::SystolicDimension => self.systolic_dimension,
            MetricId::Tapse => self.tapse,
        }
    }

    pub fn set(&mut self, id: MetricId, value: Option<f32>) {
        let slot = match id {
            MetricId::EjectionFraction => &mut self.ejection_fraction,
            MetricId::EndDiastolicVolume => &mut self.end_diastolic_volume,
            MetricId::EndSystolicVolume => &mut self.end_systolic_volume,
            MetricId::SeptalThickness => &mut self.septal_thickness,
            MetricId::PosteriorWallThickness => &mut self.posterior_wall_thickness,
            MetricId::DiastolicDimension => &mut self.diastolic_dimension,
            MetricId::SystolicDimension => &mut self.systolic_dimension,
            MetricId::Tapse => &mut self.tapse,
        };
        *slot = value;
    }

    /// `true` when no metric is available.
    pub fn is_empty(&self) -> bool {
        MetricId::ALL.iter().all(|&id| self.get(id).is_none())
    }
}

// ─── Consistency ─────────────────────────────────────────────────────────────

/// Tri-state outcome of one consistency check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Pass,
    Fail,
    /// Required inputs were absent; rendered as "not checkable", never as a failure.
    #[default]
    Unknown,
}

impl CheckOutcome {
    pub fn from_bool(ok: bool) -> Self {
        if ok { Self::Pass } else { Self::Fail }
    }

    /// Combine two outcomes of the same check: any failure fails, any pass
    /// (with no failure) passes, otherwise unknown.
    pub fn and(self, other: CheckOutcome) -> CheckOutcome {
        match (self, other) {
            (Self::Fail, _) | (_, Self::Fail) => Self::Fail,
            (Self::Pass, _) | (_, Self::Pass) => Self::Pass,
            _ => Self::Unknown,
        }
    }
}

/// Cross-metric physiological checks for one cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Volumetric EF agrees with the direct EF within tolerance.
    pub ef_consistency: CheckOutcome,
    /// Volumetric EF when it could be computed.
    pub derived_ef: Option<f32>,
    /// LVIDs < LVIDd and EDV ≥ ESV ≥ 0.
    pub physiologic_relationships: CheckOutcome,
}

impl ConsistencyReport {
    pub fn any_failed(&self) -> bool {
        self.ef_consistency == CheckOutcome::Fail
            || self.physiologic_relationships == CheckOutcome::Fail
    }
}

// ─── Quality ─────────────────────────────────────────────────────────────────

/// Four-level ordinal quality rating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityRating {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityRating {
    /// Bucket a combined score in `[0, 1]`.
    pub fn from_score(score: f32) -> Self {
        if score >= 0.85 {
            Self::Excellent
        } else if score >= 0.70 {
            Self::Good
        } else if score >= 0.50 {
            Self::Fair
        } else {
            Self::Poor
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Poor => "poor",
            Self::Fair => "fair",
            Self::Good => "good",
            Self::Excellent => "excellent",
        }
    }
}

impl fmt::Display for QualityRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reliability scores for one frame/result pair.  Each score is in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub clarity: f32,
    pub confidence: f32,
    pub signal_to_noise: f32,
    /// Weighted combination that produced `rating`.
    pub overall: f32,
    pub rating: QualityRating,
}

// ─── Segmentation mask ───────────────────────────────────────────────────────

/// Per-pixel foreground mask at model resolution.
///
/// `data` is row-major, one byte per pixel: `255` foreground, `0` background.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationMask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl SegmentationMask {
    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.data[(y as usize) * (self.width as usize) + x as usize] != 0
    }

    /// Fraction of pixels marked foreground.
    pub fn coverage(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let fg = self.data.iter().filter(|&&v| v != 0).count();
        fg as f32 / self.data.len() as f32
    }
}
