//! Typed error hierarchy for the cardiac inference engine.
//!
//! Uses `thiserror` for library-grade errors.  The CLI maps every error to
//! a process exit code through [`EngineError::error_code`].
//!
//! # Propagation policy
//!
//! - Configuration errors are fatal at construction time.
//! - Model availability errors are detected once at load time and surfaced
//!   as a capability flag; they never retry.
//! - Inference and preprocessing errors abort the current AI cycle only
//!   (see [`EngineError::aborts_cycle_only`]).
//! - Nothing in this taxonomy is allowed to terminate the pipeline process.

use crate::backend::ModelKind;
use crate::clinical::MetricId;

/// All errors originating from the cardiac engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Frame has zero-sized dimensions: {width}x{height}")]
    ZeroSizedFrame { width: u32, height: u32 },

    #[error("Frame window capacity must be at least 1")]
    ZeroCapacityWindow,

    #[error("Frame window is empty; nothing to resample")]
    EmptyWindow,

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Index {index:?} out of range for tensor shape {shape:?}")]
    IndexOutOfRange {
        index: Vec<usize>,
        shape: Vec<usize>,
    },

    #[error("Buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    // ── Model availability ───────────────────────────────────────────
    #[error("Model '{}' is unavailable for this process", .0.logical_name())]
    ModelUnavailable(ModelKind),

    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Model metadata error: {0}")]
    ModelMetadata(String),

    // ── Inference ────────────────────────────────────────────────────
    #[error("Inference failed in '{}': {message}", .model.logical_name())]
    Inference { model: ModelKind, message: String },

    // ── Results ──────────────────────────────────────────────────────
    #[error("Implausible {metric}: {value} outside [{min}, {max}]")]
    ImplausibleResult {
        metric: MetricId,
        value: f32,
        min: f32,
        max: f32,
    },

    // ── Pipeline ─────────────────────────────────────────────────────
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Panic recovered in {stage}: {message}")]
    PanicRecovered {
        stage: &'static str,
        message: String,
    },

    // ── I/O ──────────────────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Stable integer error code for structured telemetry and exit codes.
    ///
    /// Codes are grouped by category:
    /// - 1xx: configuration / shape contracts
    /// - 2xx: model availability
    /// - 3xx: inference
    /// - 4xx: result plausibility
    /// - 5xx: pipeline
    /// - 6xx: I/O
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Config(_) => 100,
            Self::ZeroSizedFrame { .. } => 101,
            Self::ZeroCapacityWindow => 102,
            Self::EmptyWindow => 103,
            Self::ShapeMismatch { .. } => 104,
            Self::IndexOutOfRange { .. } => 105,
            Self::BufferTooSmall { .. } => 106,
            Self::ModelUnavailable(_) => 200,
            Self::ModelLoad(_) => 201,
            Self::ModelMetadata(_) => 202,
            Self::Inference { .. } => 300,
            Self::ImplausibleResult { .. } => 400,
            Self::Pipeline(_) => 500,
            Self::PanicRecovered { .. } => 501,
            Self::Io(_) => 600,
            Self::Json(_) => 601,
        }
    }

    /// Whether this error only invalidates the current AI cycle.
    ///
    /// The pipeline logs these and keeps running; the cycle reports
    /// "no result" for the affected capability.
    pub fn aborts_cycle_only(&self) -> bool {
        matches!(
            self,
            Self::ZeroSizedFrame { .. }
                | Self::EmptyWindow
                | Self::ShapeMismatch { .. }
                | Self::IndexOutOfRange { .. }
                | Self::BufferTooSmall { .. }
                | Self::ModelUnavailable(_)
                | Self::Inference { .. }
                | Self::ImplausibleResult { .. }
                | Self::PanicRecovered { .. }
        )
    }

    /// Whether this error reflects a model that is permanently missing,
    /// as opposed to a transient failure of a loaded model.
    pub fn is_model_unavailable(&self) -> bool {
        matches!(self, Self::ModelUnavailable(_) | Self::ModelLoad(_))
    }
}

/// Convenience alias used throughout the engine crates.
pub type Result<T> = std::result::Result<T, EngineError>;
