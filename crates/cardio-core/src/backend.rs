//! Model backend contracts: the opaque numeric functions behind the
//! three inference engines.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tensor::Tensor;

/// The three model variants the pipeline knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Temporal ejection-fraction regressor: `[1, C, T, H, W]` → one scalar.
    EjectionFraction,
    /// Spatial segmentation model: `[1, C, H, W]` → per-pixel mask.
    Segmentation,
    /// Spatial multi-output regressor: `[1, C, H, W]` → named scalars.
    MultiOutput,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [
        ModelKind::EjectionFraction,
        ModelKind::Segmentation,
        ModelKind::MultiOutput,
    ];

    /// Fixed logical name used to discover the model artifact.
    pub const fn logical_name(self) -> &'static str {
        match self {
            Self::EjectionFraction => "ef_regressor",
            Self::Segmentation => "segmentation",
            Self::MultiOutput => "multi_output",
        }
    }

    /// Rank of the input tensor this variant consumes.
    pub const fn input_rank(self) -> usize {
        match self {
            Self::EjectionFraction => 5,
            Self::Segmentation | Self::MultiOutput => 4,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.logical_name())
    }
}

/// Declared shape of one model output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    /// Dimensions as declared by the model; `-1` marks a dynamic axis.
    pub shape: Vec<i64>,
}

/// Metadata read from a model artifact at load time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Model identifier (graph name, or the logical name if the graph has none).
    pub name: String,
    /// Name of the single input tensor node.
    pub input_name: String,
    /// Declared input dimensions; `-1` marks a dynamic axis.
    pub input_shape: Vec<i64>,
    /// Declared outputs in graph order.
    pub outputs: Vec<OutputSpec>,
}

impl ModelMetadata {
    /// Input dimension at `axis` if it is static and positive.
    pub fn static_input_dim(&self, axis: usize) -> Option<usize> {
        self.input_shape
            .get(axis)
            .copied()
            .filter(|&d| d > 0)
            .map(|d| d as usize)
    }
}

/// One model output value, exactly as produced.
#[derive(Clone, Debug, PartialEq)]
pub enum OutputValue {
    Scalar(f32),
    Array(Tensor),
}

impl OutputValue {
    /// Scalar view: the value itself, or the first element of a one-element array.
    pub fn as_scalar(&self) -> Option<f32> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Array(t) if t.numel() == 1 => t.first(),
            Self::Array(_) => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Self::Array(t) => Some(t),
            Self::Scalar(_) => None,
        }
    }
}

/// Named outputs of one model call.  Ephemeral: consumed by calibration in
/// the same cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawOutputs {
    values: BTreeMap<String, OutputValue>,
}

impl RawOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: OutputValue) {
        self.values.insert(name.into(), value);
    }

    /// Builder-style insert of a scalar, convenient for mocks and tests.
    pub fn with_scalar(mut self, name: impl Into<String>, value: f32) -> Self {
        self.insert(name, OutputValue::Scalar(value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&OutputValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OutputValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// First value in name order, used for single-output heads whose name
    /// carries no meaning.
    pub fn first_value(&self) -> Option<&OutputValue> {
        self.values.values().next()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A loaded model.  Calls are synchronous and may block; the pipeline runs
/// them on the blocking pool, one at a time.
pub trait ModelBackend: Send + Sync {
    /// Metadata extracted when the model was loaded.
    fn metadata(&self) -> &ModelMetadata;

    /// Run a single forward pass.
    fn run(&self, input: &Tensor) -> Result<RawOutputs>;
}

/// Resolves a [`ModelKind`] to a loaded backend.
///
/// Loading is asynchronous (disk I/O, graph optimisation).  A failed load
/// is final for the process lifetime.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, kind: ModelKind) -> Result<Arc<dyn ModelBackend>>;
}
