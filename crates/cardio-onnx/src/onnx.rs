//! ONNX Runtime backend: CPU session per model, host tensors in and out.
//!
//! # Threading
//!
//! `Session::run` takes `&mut self`, so each model's session sits behind a
//! `std::sync::Mutex`.  The pipeline already serialises every model call of
//! a cycle onto one blocking task; the lock is uncontended in practice and
//! only exists to give `ModelBackend::run` its `&self` signature.
//!
//! # Output decoding
//!
//! Every graph output is read as `f32`.  An output with exactly one element
//! becomes [`OutputValue::Scalar`]; anything else keeps its shape as an
//! [`OutputValue::Array`].  Dynamic axes reported as `-1` by the graph are
//! resolved from the tensor actually produced.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use ort::session::Session;
use ort::value::{Tensor as OrtTensor, ValueType};

use cardio_core::backend::{
    ModelBackend, ModelKind, ModelLoader, ModelMetadata, OutputSpec, OutputValue, RawOutputs,
};
use cardio_core::error::{EngineError, Result};
use cardio_core::tensor::Tensor;

use crate::model_file;

// ─── Model ───────────────────────────────────────────────────────────────────

pub struct OnnxModel {
    kind: ModelKind,
    path: PathBuf,
    meta: ModelMetadata,
    session: Mutex<Session>,
}

impl OnnxModel {
    /// Build a session from `path` and read its signature.  Blocking.
    pub fn load(kind: ModelKind, path: &Path, intra_threads: usize) -> Result<Self> {
        if !path.is_file() {
            return Err(EngineError::ModelLoad(format!(
                "{} model file not found: {}",
                kind,
                path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| load_error(path, e))?
            .with_intra_threads(intra_threads.max(1))
            .map_err(|e| load_error(path, e))?
            .commit_from_file(path)
            .map_err(|e| load_error(path, e))?;

        let meta = Self::extract_metadata(&session)?;
        if meta.input_shape.len() != kind.input_rank() {
            warn!(
                model = %kind,
                declared_rank = meta.input_shape.len(),
                expected_rank = kind.input_rank(),
                "Model input rank differs from its role; predictions will be rejected"
            );
        }

        Ok(Self {
            kind,
            path: path.to_path_buf(),
            meta,
            session: Mutex::new(session),
        })
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn extract_metadata(session: &Session) -> Result<ModelMetadata> {
        let inputs = session.inputs();
        let outputs = session.outputs();

        if inputs.is_empty() || outputs.is_empty() {
            return Err(EngineError::ModelMetadata(
                "Model must have at least one input and one output tensor".into(),
            ));
        }

        let input_info = &inputs[0];
        let input_shape = match input_info.dtype() {
            ValueType::Tensor { shape, .. } => shape.iter().copied().collect::<Vec<i64>>(),
            other => {
                return Err(EngineError::ModelMetadata(format!(
                    "Expected tensor input, got {other:?}"
                )));
            }
        };

        let outputs = outputs
            .iter()
            .map(|o| match o.dtype() {
                ValueType::Tensor { shape, .. } => Ok(OutputSpec {
                    name: o.name().to_string(),
                    shape: shape.iter().copied().collect(),
                }),
                other => Err(EngineError::ModelMetadata(format!(
                    "Expected tensor output '{}', got {other:?}",
                    o.name()
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        let name = session
            .metadata()
            .map(|m| m.name().unwrap_or("unknown".to_string()))
            .unwrap_or_else(|_| "unknown".to_string());

        Ok(ModelMetadata {
            name,
            input_name: input_info.name().to_string(),
            input_shape,
            outputs,
        })
    }

    fn inference_err(&self, message: impl ToString) -> EngineError {
        EngineError::Inference {
            model: self.kind,
            message: message.to_string(),
        }
    }
}

impl ModelBackend for OnnxModel {
    fn metadata(&self) -> &ModelMetadata {
        &self.meta
    }

    fn run(&self, input: &Tensor) -> Result<RawOutputs> {
        let shape: Vec<i64> = input.dims().iter().map(|&d| d as i64).collect();
        let value = OrtTensor::from_array((shape, input.as_slice().to_vec()))
            .map_err(|e| self.inference_err(e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| self.inference_err("session lock poisoned"))?;

        let t_start = Instant::now();
        let outputs = session
            .run(ort::inputs![self.meta.input_name.as_str() => value])
            .map_err(|e| self.inference_err(e))?;

        let mut raw = RawOutputs::new();
        for spec in &self.meta.outputs {
            let (out_shape, data) = outputs[spec.name.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(|e| self.inference_err(format!("output '{}': {e}", spec.name)))?;
            let value = if data.len() == 1 {
                OutputValue::Scalar(data[0])
            } else {
                let dims: Vec<usize> = out_shape.iter().map(|&d| d.max(0) as usize).collect();
                OutputValue::Array(Tensor::new(dims, data.to_vec())?)
            };
            raw.insert(spec.name.clone(), value);
        }

        debug!(
            model = %self.kind,
            outputs = raw.len(),
            elapsed_us = t_start.elapsed().as_micros() as u64,
            "ONNX session run"
        );
        Ok(raw)
    }
}

fn load_error(path: &Path, e: impl std::fmt::Display) -> EngineError {
    EngineError::ModelLoad(format!("{}: {e}", path.display()))
}

// ─── Loader ──────────────────────────────────────────────────────────────────

/// Loads `<model_dir>/<logical_name>.onnx` on the blocking pool.
#[derive(Clone, Debug)]
pub struct OnnxModelLoader {
    model_dir: PathBuf,
    intra_threads: usize,
}

impl OnnxModelLoader {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            intra_threads: 1,
        }
    }

    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads.max(1);
        self
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn model_path(&self, kind: ModelKind) -> PathBuf {
        model_file(&self.model_dir, kind)
    }
}

#[async_trait]
impl ModelLoader for OnnxModelLoader {
    async fn load(&self, kind: ModelKind) -> Result<Arc<dyn ModelBackend>> {
        let path = self.model_path(kind);
        let threads = self.intra_threads;
        info!(model = %kind, path = %path.display(), threads, "Loading ONNX model");

        let t_start = Instant::now();
        let model = tokio::task::spawn_blocking(move || OnnxModel::load(kind, &path, threads))
            .await
            .map_err(|e| EngineError::PanicRecovered {
                stage: "model_load",
                message: e.to_string(),
            })??;

        let meta = model.metadata();
        info!(
            model = %kind,
            name = %meta.name,
            input = %meta.input_name,
            input_shape = ?meta.input_shape,
            outputs = meta.outputs.len(),
            elapsed_ms = t_start.elapsed().as_millis() as u64,
            "Model loaded"
        );
        Ok(Arc::new(model))
    }
}
