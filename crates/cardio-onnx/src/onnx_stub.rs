//! Stub backend for builds without ONNX Runtime.
//!
//! Same public surface as the real backend.  Every load fails with
//! [`EngineError::ModelLoad`], which the pipeline treats as a permanently
//! unavailable model.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use cardio_core::backend::{ModelBackend, ModelKind, ModelLoader, ModelMetadata, RawOutputs};
use cardio_core::error::{EngineError, Result};
use cardio_core::tensor::Tensor;

use crate::model_file;

const DISABLED: &str = "built without the `ort-runtime` feature";

/// Uninhabited: no model can be loaded in this build.
pub enum OnnxModel {}

impl OnnxModel {
    pub fn load(kind: ModelKind, path: &Path, _intra_threads: usize) -> Result<Self> {
        Err(EngineError::ModelLoad(format!(
            "cannot load {kind} from {}: {DISABLED}",
            path.display()
        )))
    }

    pub fn kind(&self) -> ModelKind {
        match *self {}
    }

    pub fn path(&self) -> &Path {
        match *self {}
    }
}

impl ModelBackend for OnnxModel {
    fn metadata(&self) -> &ModelMetadata {
        match *self {}
    }

    fn run(&self, _input: &Tensor) -> Result<RawOutputs> {
        match *self {}
    }
}

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
        warn!(model = %kind, "ONNX Runtime not compiled in; model unavailable");
        let model = OnnxModel::load(kind, &self.model_path(kind), self.intra_threads)?;
        Ok(Arc::new(model))
    }
}
