//! Raw model outputs → calibrated clinical metrics.
//!
//! # Order of operations
//!
//! ```text
//! lookup (name table) ─► EF range normalisation ─► × multiplier ─► clamp %
//!   ─► hard physiological bounds (withhold + advisory)
//!   ─► volumetric EF fallback
//! ```
//!
//! The calibrator is a pure function of `(outputs, table)`: calling it twice
//! with the same inputs yields identical metrics.

use tracing::warn;

use cardio_core::backend::RawOutputs;
use cardio_core::clinical::{Advisory, CalibratedMetrics, EfSource, MetricId};
use cardio_core::error::EngineError;

use crate::config::{CalibrationTable, EfNormalization};
use crate::outputs::OutputNameTable;

#[derive(Clone, Debug, Default)]
pub struct OutputCalibrator {
    names: OutputNameTable,
    ef: EfNormalization,
}

/// Outcome of normalising one raw EF value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalizedEf {
    pub percent: f32,
    pub squashed: bool,
}

impl OutputCalibrator {
    pub fn new(names: OutputNameTable, ef: EfNormalization) -> Self {
        Self { names, ef }
    }

    pub fn names(&self) -> &OutputNameTable {
        &self.names
    }

    /// Calibrate the multi-output head's outputs.
    pub fn calibrate(&self, outputs: &RawOutputs, table: &CalibrationTable) -> CalibratedMetrics {
        let mut metrics = CalibratedMetrics::default();

        for id in MetricId::ALL {
            let Some(raw) = self.names.value(outputs, id).filter(|v| v.is_finite()) else {
                continue;
            };
            let value = if id == MetricId::EjectionFraction {
                let ef = self.normalize_ef(raw);
                if ef.squashed {
                    metrics.advisories.push(Advisory::EfSquashed {
                        raw,
                        calibrated: ef.percent,
                    });
                }
                metrics.ef_source = Some(EfSource::MultiOutputHead);
                ef.percent
            } else {
                raw
            };
            metrics.set(id, Some(scale(id, value, table)));
        }

        apply_hard_bounds(&mut metrics);
        self.volumetric_fallback(&mut metrics);
        metrics
    }

    /// Replace the reported EF with the temporal model's estimate.
    ///
    /// A temporal EF below `min_plausible` never displaces an EF that is
    /// already reported; the head or volumetric estimate stands.  When the
    /// temporal EF does win, advisories about the replaced estimate go.
    pub fn merge_temporal_ef(
        &self,
        metrics: &mut CalibratedMetrics,
        raw: f32,
        table: &CalibrationTable,
    ) {
        if !raw.is_finite() {
            warn!(raw, "Temporal EF output is not finite; keeping head estimate");
            return;
        }
        let ef = self.normalize_ef(raw);
        let percent = scale(MetricId::EjectionFraction, ef.percent, table);
        if percent < self.ef.min_plausible
            && let Some(current) = metrics.ejection_fraction
        {
            warn!(
                temporal = percent,
                current,
                source = ?metrics.ef_source,
                "Temporal EF implausibly small; keeping current estimate"
            );
            return;
        }

        metrics.advisories.retain(|a| {
            !matches!(
                a,
                Advisory::EfSquashed { .. } | Advisory::EfDerivedFromVolumes
            )
        });
        if ef.squashed {
            metrics.advisories.push(Advisory::EfSquashed {
                raw,
                calibrated: ef.percent,
            });
        }
        metrics.ejection_fraction = Some(percent);
        metrics.ef_source = Some(EfSource::TemporalModel);
    }

    /// Map a raw EF onto percent.
    ///
    /// - `[0, 1]` is a fraction → × 100
    /// - `(1, 100]` is already a percentage
    /// - anything else is squashed into the configured band
    pub fn normalize_ef(&self, raw: f32) -> NormalizedEf {
        if (0.0..=1.0).contains(&raw) {
            NormalizedEf {
                percent: raw * 100.0,
                squashed: false,
            }
        } else if raw > 1.0 && raw <= 100.0 {
            NormalizedEf {
                percent: raw,
                squashed: false,
            }
        } else {
            let c = &self.ef;
            let s = 1.0 / (1.0 + (-c.steepness * (raw - c.midpoint)).exp());
            let percent = (c.squash_min + (c.squash_max - c.squash_min) * s)
                .clamp(c.squash_min, c.squash_max);
            NormalizedEf {
                percent,
                squashed: true,
            }
        }
    }

    fn volumetric_fallback(&self, metrics: &mut CalibratedMetrics) {
        let direct_ok = metrics
            .ejection_fraction
            .is_some_and(|ef| ef >= self.ef.min_plausible);
        if direct_ok {
            return;
        }
        if let (Some(edv), Some(esv)) = (metrics.end_diastolic_volume, metrics.end_systolic_volume)
            && edv > 0.0
        {
            let derived = ((edv - esv) / edv * 100.0).clamp(0.0, 100.0);
            metrics.ejection_fraction = Some(derived);
            metrics.ef_source = Some(EfSource::Volumetric);
            metrics.advisories.push(Advisory::EfDerivedFromVolumes);
        }
    }
}

/// Multiply by the metric's calibration factor; clamp percentages.
fn scale(id: MetricId, value: f32, table: &CalibrationTable) -> f32 {
    let v = value * table.multiplier(id);
    if id.is_percentage() {
        v.clamp(0.0, 100.0)
    } else {
        v
    }
}

fn apply_hard_bounds(metrics: &mut CalibratedMetrics) {
    for id in MetricId::ALL {
        let Some(value) = metrics.get(id) else {
            continue;
        };
        let (min, max) = id.hard_bounds();
        if value < min || value > max {
            let err = EngineError::ImplausibleResult {
                metric: id,
                value,
                min,
                max,
            };
            warn!(error = %err, code = err.error_code(), "Implausible result withheld");
            metrics.set(id, None);
            if id == MetricId::EjectionFraction {
                metrics.ef_source = None;
            }
            metrics
                .advisories
                .push(Advisory::Implausible { metric: id, value });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrator() -> OutputCalibrator {
        OutputCalibrator::default()
    }

    #[test]
    fn fractional_ef_is_scaled_to_percent() {
        let outputs = RawOutputs::new().with_scalar("ef", 0.652);
        let m = calibrator().calibrate(&outputs, &CalibrationTable::default());
        assert!((m.ejection_fraction.unwrap() - 65.2).abs() < 1e-4);
        assert_eq!(m.ef_source, Some(EfSource::MultiOutputHead));
        assert!(m.advisories.is_empty());
    }

    #[test]
    fn out_of_range_ef_is_squashed_not_passed_through() {
        let outputs = RawOutputs::new().with_scalar("ef", 145.0);
        let m = calibrator().calibrate(&outputs, &CalibrationTable::default());
        let ef = m.ejection_fraction.unwrap();
        assert!((0.0..=100.0).contains(&ef));
        assert!((15.0..=80.0).contains(&ef), "{ef}");
        assert_ne!(ef, 145.0);
        assert!(matches!(m.advisories[0], Advisory::EfSquashed { raw, .. } if raw == 145.0));
    }

    #[test]
    fn percentage_ef_is_kept() {
        let n = calibrator().normalize_ef(57.5);
        assert_eq!(n.percent, 57.5);
        assert!(!n.squashed);
    }

    #[test]
    fn multipliers_apply_and_percentages_clamp() {
        let outputs = RawOutputs::new()
            .with_scalar("ef", 90.0)
            .with_scalar("edv", 100.0);
        let mut table = CalibrationTable::default();
        table.set(MetricId::EjectionFraction, 1.5).unwrap();
        table.set(MetricId::EndDiastolicVolume, 1.1).unwrap();
        let m = calibrator().calibrate(&outputs, &table);
        assert_eq!(m.ejection_fraction, Some(100.0));
        assert!((m.end_diastolic_volume.unwrap() - 110.0).abs() < 1e-3);
    }

    #[test]
    fn volumes_replace_missing_or_tiny_ef() {
        let table = CalibrationTable::default();
        let outputs = RawOutputs::new()
            .with_scalar("ef", 0.02)
            .with_scalar("edv", 120.0)
            .with_scalar("esv", 42.0);
        let m = calibrator().calibrate(&outputs, &table);
        assert!((m.ejection_fraction.unwrap() - 65.0).abs() < 1e-4);
        assert_eq!(m.ef_source, Some(EfSource::Volumetric));
        assert!(m.advisories.contains(&Advisory::EfDerivedFromVolumes));

        let outputs = RawOutputs::new()
            .with_scalar("edv", 120.0)
            .with_scalar("esv", 42.0);
        let m = calibrator().calibrate(&outputs, &table);
        assert_eq!(m.ef_source, Some(EfSource::Volumetric));
    }

    #[test]
    fn implausible_values_are_withheld_with_advisory() {
        let outputs = RawOutputs::new()
            .with_scalar("ivsd", 7.5)
            .with_scalar("lvidd", 5.0);
        let m = calibrator().calibrate(&outputs, &CalibrationTable::default());
        assert_eq!(m.septal_thickness, None);
        assert_eq!(m.diastolic_dimension, Some(5.0));
        assert_eq!(
            m.advisories,
            vec![Advisory::Implausible {
                metric: MetricId::SeptalThickness,
                value: 7.5
            }]
        );
    }

    #[test]
    fn implausible_volumes_do_not_feed_the_fallback() {
        let outputs = RawOutputs::new()
            .with_scalar("edv", 900.0)
            .with_scalar("esv", 42.0);
        let m = calibrator().calibrate(&outputs, &CalibrationTable::default());
        assert_eq!(m.ejection_fraction, None);
        assert_eq!(m.end_diastolic_volume, None);
    }

    #[test]
    fn calibration_is_idempotent() {
        let outputs = RawOutputs::new()
            .with_scalar("ef", 145.0)
            .with_scalar("edv", 120.0)
            .with_scalar("esv", 42.0)
            .with_scalar("tapse", 19.0);
        let mut table = CalibrationTable::default();
        table.set(MetricId::Tapse, 1.05).unwrap();
        let c = calibrator();
        assert_eq!(c.calibrate(&outputs, &table), c.calibrate(&outputs, &table));
    }

    #[test]
    fn temporal_ef_overrides_head_and_volumes() {
        let c = calibrator();
        let table = CalibrationTable::default();
        let outputs = RawOutputs::new()
            .with_scalar("edv", 120.0)
            .with_scalar("esv", 42.0);
        let mut m = c.calibrate(&outputs, &table);
        c.merge_temporal_ef(&mut m, 0.58, &table);
        assert!((m.ejection_fraction.unwrap() - 58.0).abs() < 1e-4);
        assert_eq!(m.ef_source, Some(EfSource::TemporalModel));
        assert!(!m.advisories.contains(&Advisory::EfDerivedFromVolumes));
    }

    #[test]
    fn tiny_temporal_ef_keeps_volumetric_estimate() {
        let c = calibrator();
        let table = CalibrationTable::default();
        let outputs = RawOutputs::new()
            .with_scalar("edv", 120.0)
            .with_scalar("esv", 42.0);
        let mut m = c.calibrate(&outputs, &table);
        c.merge_temporal_ef(&mut m, 0.02, &table);
        assert!((m.ejection_fraction.unwrap() - 65.0).abs() < 1e-4);
        assert_eq!(m.ef_source, Some(EfSource::Volumetric));
        assert!(m.advisories.contains(&Advisory::EfDerivedFromVolumes));
    }

    #[test]
    fn tiny_temporal_ef_is_reported_when_nothing_else_is() {
        let c = calibrator();
        let table = CalibrationTable::default();
        let mut m = c.calibrate(&RawOutputs::new(), &table);
        c.merge_temporal_ef(&mut m, 0.02, &table);
        assert!((m.ejection_fraction.unwrap() - 2.0).abs() < 1e-4);
        assert_eq!(m.ef_source, Some(EfSource::TemporalModel));
    }

    #[test]
    fn temporal_override_drops_head_squash_advisory() {
        let c = calibrator();
        let table = CalibrationTable::default();
        let outputs = RawOutputs::new().with_scalar("ef", 145.0);
        let mut m = c.calibrate(&outputs, &table);
        assert!(matches!(m.advisories[..], [Advisory::EfSquashed { .. }]));

        c.merge_temporal_ef(&mut m, 0.61, &table);
        assert!((m.ejection_fraction.unwrap() - 61.0).abs() < 1e-4);
        assert_eq!(m.ef_source, Some(EfSource::TemporalModel));
        assert!(m.advisories.is_empty(), "{:?}", m.advisories);
    }
}
