//! Model handles and the three inference engine variants.
//!
//! # Availability
//!
//! A handle is created once per model and never reloaded.  It is
//! unavailable for the rest of the process when either
//!
//! - loading failed (missing file, runtime not compiled in, bad graph), or
//! - `failure_limit` consecutive predictions failed.
//!
//! Callers poll [`InferenceEngine::is_available`]; a prediction on an
//! unavailable handle returns [`EngineError::ModelUnavailable`] without
//! touching the backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use cardio_core::backend::{ModelBackend, ModelKind, ModelLoader, ModelMetadata, RawOutputs};
use cardio_core::error::{EngineError, Result};
use cardio_core::tensor::Tensor;
use cardio_vision::preprocess::ModelInputSpec;

// ─── Metrics ────────────────────────────────────────────────────────────────

/// Atomic counters for one model's predictions.
#[derive(Debug)]
pub struct InferenceMetrics {
    pub predictions: AtomicU64,
    pub failures: AtomicU64,
    pub total_inference_us: AtomicU64,
    pub peak_inference_us: AtomicU64,
}

impl InferenceMetrics {
    pub const fn new() -> Self {
        Self {
            predictions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            total_inference_us: AtomicU64::new(0),
            peak_inference_us: AtomicU64::new(0),
        }
    }

    pub fn record(&self, elapsed_us: u64) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
        self.total_inference_us
            .fetch_add(elapsed_us, Ordering::Relaxed);
        self.peak_inference_us
            .fetch_max(elapsed_us, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> InferenceMetricsSnapshot {
        let predictions = self.predictions.load(Ordering::Relaxed);
        let total = self.total_inference_us.load(Ordering::Relaxed);
        InferenceMetricsSnapshot {
            predictions,
            failures: self.failures.load(Ordering::Relaxed),
            avg_inference_us: if predictions > 0 { total / predictions } else { 0 },
            peak_inference_us: self.peak_inference_us.load(Ordering::Relaxed),
        }
    }
}

impl Default for InferenceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InferenceMetricsSnapshot {
    pub predictions: u64,
    pub failures: u64,
    pub avg_inference_us: u64,
    pub peak_inference_us: u64,
}

// ─── Handle ─────────────────────────────────────────────────────────────────

pub struct ModelHandle {
    kind: ModelKind,
    backend: Option<Arc<dyn ModelBackend>>,
    available: AtomicBool,
    consecutive_failures: AtomicU32,
    failure_limit: u32,
    load_error: Option<String>,
    metrics: InferenceMetrics,
}

impl ModelHandle {
    pub fn loaded(kind: ModelKind, backend: Arc<dyn ModelBackend>, failure_limit: u32) -> Self {
        Self {
            kind,
            backend: Some(backend),
            available: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
            failure_limit,
            load_error: None,
            metrics: InferenceMetrics::new(),
        }
    }

    pub fn unavailable(kind: ModelKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            backend: None,
            available: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            failure_limit: 0,
            load_error: Some(reason.into()),
            metrics: InferenceMetrics::new(),
        }
    }

    /// Load through `loader`.  Never fails: a load error yields an
    /// unavailable handle carrying the reason.
    pub async fn load(loader: &dyn ModelLoader, kind: ModelKind, failure_limit: u32) -> Self {
        match loader.load(kind).await {
            Ok(backend) => {
                let meta = backend.metadata();
                info!(
                    model = %kind,
                    name = %meta.name,
                    input_shape = ?meta.input_shape,
                    "Model available"
                );
                Self::loaded(kind, backend, failure_limit)
            }
            Err(e) => {
                warn!(model = %kind, error = %e, code = e.error_code(), "Model unavailable");
                Self::unavailable(kind, e.to_string())
            }
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn metadata(&self) -> Option<&ModelMetadata> {
        self.backend.as_deref().map(|b| b.metadata())
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn metrics(&self) -> &InferenceMetrics {
        &self.metrics
    }

    /// Run the backend.  Blocking; call from a blocking context.
    pub fn predict(&self, input: &Tensor) -> Result<RawOutputs> {
        let backend = match &self.backend {
            Some(b) if self.is_available() => b,
            _ => return Err(EngineError::ModelUnavailable(self.kind)),
        };

        input.expect_rank(self.kind.input_rank())?;

        let t_start = Instant::now();
        match backend.run(input) {
            Ok(outputs) => {
                self.consecutive_failures.store(0, Ordering::Release);
                self.metrics
                    .record(t_start.elapsed().as_micros() as u64);
                Ok(outputs)
            }
            Err(e) => {
                self.metrics.record_failure();
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if self.failure_limit > 0 && failures >= self.failure_limit {
                    self.available.store(false, Ordering::Release);
                    warn!(
                        model = %self.kind,
                        failures,
                        "Model retired after consecutive prediction failures"
                    );
                }
                Err(match e {
                    EngineError::Inference { .. } => e,
                    other => EngineError::Inference {
                        model: self.kind,
                        message: other.to_string(),
                    },
                })
            }
        }
    }
}

// ─── Engine variants ────────────────────────────────────────────────────────

/// One of the three model roles.  All share the `predict` / `is_available`
/// contract; the variant decides which input geometry applies.
pub enum InferenceEngine {
    /// Temporal regressor: `[1, C, T, H, W]` → one scalar.
    EjectionFraction(ModelHandle),
    /// Spatial segmenter: `[1, C, H, W]` → per-pixel mask.
    Segmentation(ModelHandle),
    /// Spatial regressor: `[1, C, H, W]` → named scalars.
    MultiOutput(ModelHandle),
}

impl InferenceEngine {
    pub fn new(handle: ModelHandle) -> Self {
        match handle.kind() {
            ModelKind::EjectionFraction => Self::EjectionFraction(handle),
            ModelKind::Segmentation => Self::Segmentation(handle),
            ModelKind::MultiOutput => Self::MultiOutput(handle),
        }
    }

    pub fn handle(&self) -> &ModelHandle {
        match self {
            Self::EjectionFraction(h) | Self::Segmentation(h) | Self::MultiOutput(h) => h,
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.handle().kind()
    }

    pub fn is_available(&self) -> bool {
        self.handle().is_available()
    }

    pub fn predict(&self, input: &Tensor) -> Result<RawOutputs> {
        self.handle().predict(input)
    }

    /// The configured spec, overridden by whatever the model declares statically.
    pub fn input_spec(&self, configured: &ModelInputSpec) -> ModelInputSpec {
        match self.handle().metadata() {
            Some(meta) => configured.clone().refined_by(meta),
            None => configured.clone(),
        }
    }

    /// Clip length for the temporal model: the static frame axis of
    /// `[N, C, T, H, W]` when declared, else `configured`.
    pub fn frame_count(&self, configured: usize) -> usize {
        match self {
            Self::EjectionFraction(h) => h
                .metadata()
                .filter(|m| m.input_shape.len() == 5)
                .and_then(|m| m.static_input_dim(2))
                .unwrap_or(configured),
            _ => configured,
        }
    }
}

// ─── Model set ──────────────────────────────────────────────────────────────

/// The three engines of one pipeline, loaded together.
pub struct ModelSet {
    ejection_fraction: InferenceEngine,
    segmentation: InferenceEngine,
    multi_output: InferenceEngine,
}

impl ModelSet {
    /// Load all three models concurrently.
    pub async fn load(loader: &dyn ModelLoader, failure_limit: u32) -> Self {
        let t_start = Instant::now();
        let (ef, seg, multi) = tokio::join!(
            ModelHandle::load(loader, ModelKind::EjectionFraction, failure_limit),
            ModelHandle::load(loader, ModelKind::Segmentation, failure_limit),
            ModelHandle::load(loader, ModelKind::MultiOutput, failure_limit),
        );
        let set = Self::from_handles(ef, seg, multi);
        info!(
            available = set.available_count(),
            elapsed_ms = t_start.elapsed().as_millis() as u64,
            "Model set ready"
        );
        set
    }

    pub fn from_handles(ef: ModelHandle, seg: ModelHandle, multi: ModelHandle) -> Self {
        Self {
            ejection_fraction: InferenceEngine::new(ef),
            segmentation: InferenceEngine::new(seg),
            multi_output: InferenceEngine::new(multi),
        }
    }

    pub fn get(&self, kind: ModelKind) -> &InferenceEngine {
        match kind {
            ModelKind::EjectionFraction => &self.ejection_fraction,
            ModelKind::Segmentation => &self.segmentation,
            ModelKind::MultiOutput => &self.multi_output,
        }
    }

    pub fn available_count(&self) -> usize {
        ModelKind::ALL
            .iter()
            .filter(|&&k| self.get(k).is_available())
            .count()
    }

    pub fn status(&self) -> Vec<ModelStatus> {
        ModelKind::ALL
            .iter()
            .map(|&kind| ModelStatus::of(self.get(kind).handle()))
            .collect()
    }
}

/// Pollable per-model capability report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelStatus {
    pub kind: ModelKind,
    pub logical_name: &'static str,
    pub available: bool,
    pub model_name: Option<String>,
    pub input_name: Option<String>,
    pub input_shape: Option<Vec<i64>>,
    pub outputs: Vec<String>,
    pub load_error: Option<String>,
    pub inference: InferenceMetricsSnapshot,
}

impl ModelStatus {
    pub fn of(handle: &ModelHandle) -> Self {
        let meta = handle.metadata();
        Self {
            kind: handle.kind(),
            logical_name: handle.kind().logical_name(),
            available: handle.is_available(),
            model_name: meta.map(|m| m.name.clone()),
            input_name: meta.map(|m| m.input_name.clone()),
            input_shape: meta.map(|m| m.input_shape.clone()),
            outputs: meta
                .map(|m| m.outputs.iter().map(|o| o.name.clone()).collect())
                .unwrap_or_default(),
            load_error: handle.load_error().map(str::to_string),
            inference: handle.metrics().snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, MockLoader};

    #[test]
    fn unavailable_handle_never_reaches_backend() {
        let handle = ModelHandle::unavailable(ModelKind::Segmentation, "missing file");
        let err = handle.predict(&Tensor::zeros([1, 3, 4, 4])).unwrap_err();
        assert!(matches!(err, EngineError::ModelUnavailable(ModelKind::Segmentation)));
        assert_eq!(handle.load_error(), Some("missing file"));
    }

    #[test]
    fn wrong_rank_is_rejected_before_inference() {
        let backend = MockBackend::new(ModelKind::EjectionFraction, "ef", 0.6);
        let calls = backend.calls();
        let handle = ModelHandle::loaded(ModelKind::EjectionFraction, Arc::new(backend), 5);
        let err = handle.predict(&Tensor::zeros([1, 3, 4, 4])).unwrap_err();
        assert!(matches!(err, EngineError::ShapeMismatch { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn consecutive_failures_retire_the_model() {
        let handle = ModelHandle::loaded(
            ModelKind::MultiOutput,
            Arc::new(MockBackend::failing(ModelKind::MultiOutput)),
            3,
        );
        let input = Tensor::zeros([1, 3, 2, 2]);
        for _ in 0..3 {
            let err = handle.predict(&input).unwrap_err();
            assert!(matches!(err, EngineError::Inference { .. }));
        }
        assert!(!handle.is_available());
        assert!(matches!(
            handle.predict(&input),
            Err(EngineError::ModelUnavailable(_))
        ));
        assert_eq!(handle.metrics().snapshot().failures, 3);
    }

    #[test]
    fn zero_limit_never_retires() {
        let handle = ModelHandle::loaded(
            ModelKind::MultiOutput,
            Arc::new(MockBackend::failing(ModelKind::MultiOutput)),
            0,
        );
        let input = Tensor::zeros([1, 3, 2, 2]);
        for _ in 0..10 {
            let _ = handle.predict(&input);
        }
        assert!(handle.is_available());
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let backend = MockBackend::new(ModelKind::MultiOutput, "ef", 0.5);
        let fail = backend.fail_switch();
        let handle = ModelHandle::loaded(ModelKind::MultiOutput, Arc::new(backend), 2);
        let input = Tensor::zeros([1, 3, 2, 2]);

        fail.store(true, Ordering::SeqCst);
        assert!(handle.predict(&input).is_err());
        fail.store(false, Ordering::SeqCst);
        assert!(handle.predict(&input).is_ok());
        fail.store(true, Ordering::SeqCst);
        assert!(handle.predict(&input).is_err());
        assert!(handle.is_available());
    }

    #[test]
    fn static_metadata_refines_spec_and_clip_length() {
        let backend = MockBackend::new(ModelKind::EjectionFraction, "ef", 0.6)
            .with_input_shape(vec![1, 3, 16, 64, 64]);
        let engine = InferenceEngine::new(ModelHandle::loaded(
            ModelKind::EjectionFraction,
            Arc::new(backend),
            5,
        ));
        let spec = engine.input_spec(&ModelInputSpec::ejection_fraction());
        assert_eq!((spec.height, spec.width), (64, 64));
        assert_eq!(engine.frame_count(32), 16);
    }

    #[tokio::test]
    async fn set_loads_each_model_independently() {
        let loader = MockLoader::new().with(
            ModelKind::MultiOutput,
            Arc::new(MockBackend::new(ModelKind::MultiOutput, "ef", 0.6)),
        );
        let set = ModelSet::load(&loader, 5).await;
        assert_eq!(set.available_count(), 1);
        let status = set.status();
        assert!(status.iter().any(|s| s.kind == ModelKind::MultiOutput && s.available));
        assert!(
            status
                .iter()
                .filter(|s| s.kind != ModelKind::MultiOutput)
                .all(|s| !s.available && s.load_error.is_some())
        );
    }
}
