//! Cross-metric physiological consistency checks.

use cardio_core::clinical::{CalibratedMetrics, CheckOutcome, ConsistencyReport, EfSource};

/// Default EF agreement tolerance, percentage points.
pub const DEFAULT_EF_TOLERANCE: f32 = 10.0;

#[derive(Clone, Copy, Debug)]
pub struct ConsistencyValidator {
    tolerance: f32,
}

impl Default for ConsistencyValidator {
    fn default() -> Self {
        Self::new(DEFAULT_EF_TOLERANCE)
    }
}

impl ConsistencyValidator {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }

    pub fn validate(&self, metrics: &CalibratedMetrics) -> ConsistencyReport {
        let derived_ef = derived_ef(metrics);
        ConsistencyReport {
            ef_consistency: self.ef_consistency(metrics, derived_ef),
            derived_ef,
            physiologic_relationships: physiologic_relationships(metrics),
        }
    }

    /// `|(EDV − ESV) / EDV × 100 − EF| ≤ tolerance`.  Unknown unless EDV,
    /// ESV and a direct EF are all present with EDV > 0.  An EF that was
    /// itself derived from the volumes is not direct.
    fn ef_consistency(&self, metrics: &CalibratedMetrics, derived: Option<f32>) -> CheckOutcome {
        let direct = metrics
            .ejection_fraction
            .filter(|_| metrics.ef_source != Some(EfSource::Volumetric));
        match (derived, direct) {
            (Some(derived), Some(direct)) => {
                CheckOutcome::from_bool((derived - direct).abs() <= self.tolerance)
            }
            _ => CheckOutcome::Unknown,
        }
    }
}

fn derived_ef(metrics: &CalibratedMetrics) -> Option<f32> {
    match (metrics.end_diastolic_volume, metrics.end_systolic_volume) {
        (Some(edv), Some(esv)) if edv > 0.0 => Some((edv - esv) / edv * 100.0),
        _ => None,
    }
}

/// LVIDs < LVIDd, and EDV ≥ ESV ≥ 0.  Each sub-check contributes only when
/// its inputs are present.
fn physiologic_relationships(metrics: &CalibratedMetrics) -> CheckOutcome {
    let dimensions = match (metrics.systolic_dimension, metrics.diastolic_dimension) {
        (Some(s), Some(d)) => CheckOutcome::from_bool(s < d),
        _ => CheckOutcome::Unknown,
    };
    let volumes = match (metrics.end_diastolic_volume, metrics.end_systolic_volume) {
        (Some(edv), Some(esv)) => CheckOutcome::from_bool(edv >= esv && esv >= 0.0),
        _ => CheckOutcome::Unknown,
    };
    dimensions.and(volumes)
}
