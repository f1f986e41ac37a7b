//! Output-name lookup for models whose output names drift between revisions.
//!
//! Resolution order for one metric:
//!
//! 1. each candidate name, in order, compared case-insensitively;
//! 2. the first output (in name order) whose lowercase name contains the
//!    metric's keyword.
//!
//! Only scalar outputs (or one-element arrays) match.  No match means the
//! metric is absent this cycle, not an error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cardio_core::backend::RawOutputs;
use cardio_core::clinical::MetricId;

/// Candidate names and keyword for one metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NameRule {
    pub candidates: Vec<String>,
    pub keyword: String,
}

impl NameRule {
    fn new(candidates: &[&str], keyword: &str) -> Self {
        Self {
            candidates: candidates.iter().map(|s| s.to_string()).collect(),
            keyword: keyword.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputNameTable {
    pub metrics: BTreeMap<MetricId, NameRule>,
    /// Names of a model-reported confidence output.
    pub confidence: Vec<String>,
}

impl Default for OutputNameTable {
    fn default() -> Self {
        let metrics = BTreeMap::from([
            (
                MetricId::EjectionFraction,
                NameRule::new(&["ef", "ejection_fraction", "lvef", "ef_output"], "ef"),
            ),
            (
                MetricId::EndDiastolicVolume,
                NameRule::new(&["edv", "end_diastolic_volume", "lvedv"], "edv"),
            ),
            (
                MetricId::EndSystolicVolume,
                NameRule::new(&["esv", "end_systolic_volume", "lvesv"], "esv"),
            ),
            (
                MetricId::SeptalThickness,
                NameRule::new(&["ivsd", "ivs", "septal_thickness"], "ivs"),
            ),
            (
                MetricId::PosteriorWallThickness,
                NameRule::new(&["lvpwd", "lvpw", "posterior_wall_thickness"], "lvpw"),
            ),
            (
                MetricId::DiastolicDimension,
                NameRule::new(&["lvidd", "lvid_d", "diastolic_dimension"], "lvidd"),
            ),
            (
                MetricId::SystolicDimension,
                NameRule::new(&["lvids", "lvid_s", "systolic_dimension"], "lvids"),
            ),
            (MetricId::Tapse, NameRule::new(&["tapse"], "tapse")),
        ]);
        Self {
            metrics,
            confidence: vec!["confidence".into(), "conf".into(), "score".into()],
        }
    }
}

impl OutputNameTable {
    /// Resolve `id` against `outputs`, returning the matched name and value.
    pub fn lookup<'a>(&self, outputs: &'a RawOutputs, id: MetricId) -> Option<(&'a str, f32)> {
        let rule = self.metrics.get(&id)?;
        find_exact(outputs, &rule.candidates).or_else(|| {
            if rule.keyword.is_empty() {
                return None;
            }
            let keyword = rule.keyword.to_ascii_lowercase();
            outputs.iter().find_map(|(name, value)| {
                let scalar = value.as_scalar()?;
                name.to_ascii_lowercase()
                    .contains(&keyword)
                    .then_some((name, scalar))
            })
        })
    }

    pub fn value(&self, outputs: &RawOutputs, id: MetricId) -> Option<f32> {
        self.lookup(outputs, id).map(|(_, v)| v)
    }

    /// Model-reported confidence, clamped to `[0, 1]`.
    pub fn confidence(&self, outputs: &RawOutputs) -> Option<f32> {
        find_exact(outputs, &self.confidence)
            .map(|(_, v)| v)
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 1.0))
    }
}

fn find_exact<'a>(outputs: &'a RawOutputs, candidates: &[String]) -> Option<(&'a str, f32)> {
    candidates.iter().find_map(|candidate| {
        outputs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(candidate))
            .and_then(|(name, value)| value.as_scalar().map(|v| (name, v)))
    })
}
