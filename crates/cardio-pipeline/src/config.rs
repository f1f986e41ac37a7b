use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use cardio_core::backend::ModelKind;
use cardio_core::clinical::MetricId;
use cardio_core::error::{EngineError, Result};
use cardio_core::frame_window::DEFAULT_WINDOW_CAPACITY;
use cardio_vision::gate::GateThresholds;
use cardio_vision::preprocess::ModelInputSpec;
use cardio_vision::quality::QualityConfig;
use cardio_vision::resample::DEFAULT_TARGET_FRAMES;

use crate::outputs::OutputNameTable;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

// ─── EF normalisation ───────────────────────────────────────────────────────

/// Constants for normalising the raw ejection-fraction head.
///
/// Raw values outside `[0, 100]` are compressed with a logistic curve into
/// `[squash_min, squash_max]`:
///
/// ```text
/// ef = squash_min + (squash_max − squash_min) · σ(steepness · (raw − midpoint))
/// ```
///
/// None of these constants are validated against a reference population;
/// they are configuration, not physiology.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EfNormalization {
    pub squash_min: f32,
    pub squash_max: f32,
    pub midpoint: f32,
    pub steepness: f32,
    /// A direct EF below this (percent) is treated as a failed head and the
    /// volumetric fallback is tried.
    pub min_plausible: f32,
}

impl Default for EfNormalization {
    fn default() -> Self {
        Self {
            squash_min: 15.0,
            squash_max: 80.0,
            midpoint: 50.0,
            steepness: 0.05,
            min_plausible: 5.0,
        }
    }
}

// ─── Model input specs ──────────────────────────────────────────────────────

/// Configured preprocessing targets per model.  Static shapes declared by a
/// loaded model override these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelInputs {
    pub ejection_fraction: ModelInputSpec,
    pub segmentation: ModelInputSpec,
    pub multi_output: ModelInputSpec,
}

impl Default for ModelInputs {
    fn default() -> Self {
        Self {
            ejection_fraction: ModelInputSpec::for_kind(ModelKind::EjectionFraction),
            segmentation: ModelInputSpec::for_kind(ModelKind::Segmentation),
            multi_output: ModelInputSpec::for_kind(ModelKind::MultiOutput),
        }
    }
}

impl ModelInputs {
    pub fn get(&self, kind: ModelKind) -> &ModelInputSpec {
        match kind {
            ModelKind::EjectionFraction => &self.ejection_fraction,
            ModelKind::Segmentation => &self.segmentation,
            ModelKind::MultiOutput => &self.multi_output,
        }
    }
}

// ─── Pipeline config ────────────────────────────────────────────────────────

/// Runtime configuration for a [`CardiacPipeline`](crate::pipeline::CardiacPipeline).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub config_schema_version: u32,
    /// Frames retained for temporal context.
    pub window_capacity: usize,
    /// Frames per clip fed to the temporal EF model when its input does
    /// not declare a static frame axis.
    pub ef_frame_count: usize,
    /// Minimum spacing of displayed frames (frame timestamps).
    pub display_interval_ms: u64,
    /// Minimum spacing of AI cycle triggers (frame timestamps).
    pub ai_interval_ms: u64,
    /// Segmentation runs on every Nth AI cycle.
    pub segmentation_every: u32,
    /// The temporal EF model runs on every Nth AI cycle.
    pub ef_every: u32,
    pub inputs: ModelInputs,
    pub gate: GateThresholds,
    pub ef_normalization: EfNormalization,
    /// Maximum |derived EF − direct EF| in percentage points.
    pub consistency_tolerance: f32,
    /// Foreground threshold for single-channel segmentation masks.
    pub mask_threshold: f32,
    pub quality: QualityConfig,
    pub output_names: OutputNameTable,
    /// Consecutive prediction failures before a model is retired; 0 never retires.
    pub model_failure_limit: u32,
    /// Buffered cycle reports before new ones are dropped.
    pub result_channel_capacity: usize,
    /// Bounded frame channel between a blocking frame source and the scheduler.
    pub frame_channel_capacity: usize,
    pub model_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            config_schema_version: CONFIG_SCHEMA_VERSION,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            ef_frame_count: DEFAULT_TARGET_FRAMES,
            display_interval_ms: 200,
            ai_interval_ms: 500,
            segmentation_every: 2,
            ef_every: 2,
            inputs: ModelInputs::default(),
            gate: GateThresholds::default(),
            ef_normalization: EfNormalization::default(),
            consistency_tolerance: 10.0,
            mask_threshold: 0.5,
            quality: QualityConfig::default(),
            output_names: OutputNameTable::default(),
            model_failure_limit: 5,
            result_channel_capacity: 8,
            frame_channel_capacity: 4,
            model_dir: PathBuf::from("models"),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(data: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(data)
            .map_err(|err| EngineError::Config(format!("Invalid pipeline config JSON: {err}")))?;

        // A missing version means "current"; anything else must match exactly.
        if let Some(version_value) = value.get("config_schema_version") {
            let Some(version) = version_value.as_u64() else {
                return Err(EngineError::Config(format!(
                    "Config schema mismatch: expected {CONFIG_SCHEMA_VERSION}, got non-integer"
                )));
            };
            if version != CONFIG_SCHEMA_VERSION as u64 {
                return Err(EngineError::Config(format!(
                    "Config schema mismatch: expected {CONFIG_SCHEMA_VERSION}, got {version}"
                )));
            }
        }

        let config: Self = serde_json::from_value(value)
            .map_err(|err| EngineError::Config(format!("Invalid pipeline config JSON: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|err| {
            EngineError::Config(format!(
                "Failed to read pipeline config from {}: {err}",
                path.display()
            ))
        })?;
        Self::from_json_str(&data)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(EngineError::Config(msg));

        if self.config_schema_version != CONFIG_SCHEMA_VERSION {
            return fail(format!(
                "Config schema mismatch: expected {CONFIG_SCHEMA_VERSION}, got {}",
                self.config_schema_version
            ));
        }
        if self.window_capacity == 0 {
            return Err(EngineError::ZeroCapacityWindow);
        }
        if self.ef_frame_count == 0 {
            return fail("ef_frame_count must be at least 1".into());
        }
        if self.ai_interval_ms == 0 {
            return fail("ai_interval_ms must be positive".into());
        }
        if self.segmentation_every == 0 || self.ef_every == 0 {
            return fail("decimation factors must be at least 1".into());
        }
        for kind in ModelKind::ALL {
            self.inputs.get(kind).validate()?;
        }
        let g = &self.gate;
        if !(g.min_mean < g.max_mean) {
            return fail(format!(
                "gate brightness band is empty: [{}, {}]",
                g.min_mean, g.max_mean
            ));
        }
        let ef = &self.ef_normalization;
        if !(0.0 <= ef.squash_min && ef.squash_min < ef.squash_max && ef.squash_max <= 100.0) {
            return fail(format!(
                "EF squash band must satisfy 0 <= min < max <= 100, got [{}, {}]",
                ef.squash_min, ef.squash_max
            ));
        }
        if !(ef.steepness > 0.0 && ef.steepness.is_finite()) {
            return fail(format!("EF squash steepness must be positive, got {}", ef.steepness));
        }
        if !(self.consistency_tolerance >= 0.0) {
            return fail(format!(
                "consistency_tolerance must be non-negative, got {}",
                self.consistency_tolerance
            ));
        }
        if !(self.mask_threshold > 0.0 && self.mask_threshold < 1.0) {
            return fail(format!(
                "mask_threshold must lie in (0, 1), got {}",
                self.mask_threshold
            ));
        }
        if self.result_channel_capacity == 0 || self.frame_channel_capacity == 0 {
            return fail("channel capacities must be at least 1".into());
        }
        Ok(())
    }

    /// Display cadence in frame-timestamp units (µs).
    pub fn display_interval_us(&self) -> i64 {
        (self.display_interval_ms as i64).saturating_mul(1_000)
    }

    /// AI cadence in frame-timestamp units (µs).
    pub fn ai_interval_us(&self) -> i64 {
        (self.ai_interval_ms as i64).saturating_mul(1_000)
    }
}

// ─── Calibration ────────────────────────────────────────────────────────────

/// Per-metric calibration multipliers.  Metrics not listed use 1.0.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationTable {
    multipliers: BTreeMap<MetricId, f32>,
}

impl CalibrationTable {
    /// Every metric listed explicitly at 1.0.
    pub fn identity() -> Self {
        Self {
            multipliers: MetricId::ALL.iter().map(|&id| (id, 1.0)).collect(),
        }
    }

    pub fn multiplier(&self, id: MetricId) -> f32 {
        self.multipliers.get(&id).copied().unwrap_or(1.0)
    }

    pub fn set(&mut self, id: MetricId, multiplier: f32) -> Result<()> {
        if !(multiplier.is_finite() && multiplier > 0.0) {
            return Err(EngineError::Config(format!(
                "calibration multiplier for {id} must be positive and finite, got {multiplier}"
            )));
        }
        self.multipliers.insert(id, multiplier);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricId, f32)> + '_ {
        self.multipliers.iter().map(|(&id, &m)| (id, m))
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        let raw: BTreeMap<MetricId, f32> = serde_json::from_str(data)
            .map_err(|err| EngineError::Config(format!("Invalid calibration JSON: {err}")))?;
        let mut table = Self::default();
        for (id, m) in raw {
            table.set(id, m)?;
        }
        Ok(table)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|err| {
            EngineError::Config(format!(
                "Failed to read calibration table from {}: {err}",
                path.display()
            ))
        })?;
        Self::from_json_str(&data)
    }
}

/// Calibration table shared between the pipeline and whoever tunes it.
///
/// Each AI cycle clones the table once at start, so an update lands on the
/// next cycle and never splits one.
#[derive(Clone, Debug, Default)]
pub struct CalibrationHandle {
    inner: Arc<RwLock<CalibrationTable>>,
}

impl CalibrationHandle {
    pub fn new(table: CalibrationTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(table)),
        }
    }

    pub fn snapshot(&self) -> CalibrationTable {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, id: MetricId, multiplier: f32) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| EngineError::Pipeline("calibration table lock poisoned".into()))?;
        guard.set(id, multiplier)
    }

    pub fn replace(&self, table: CalibrationTable) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| EngineError::Pipeline("calibration table lock poisoned".into()))?;
        *guard = table;
        Ok(())
    }
}
