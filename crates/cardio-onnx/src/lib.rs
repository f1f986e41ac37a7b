#![doc = include_str!("../README.md")]

use std::path::{Path, PathBuf};

use serde::Serialize;

use cardio_core::backend::ModelKind;

#[cfg(feature = "ort-runtime")]
pub mod onnx;
#[cfg(not(feature = "ort-runtime"))]
#[path = "onnx_stub.rs"]
pub mod onnx;

pub use onnx::{OnnxModel, OnnxModelLoader};

/// `true` when this build links ONNX Runtime.
pub const RUNTIME_ENABLED: bool = cfg!(feature = "ort-runtime");

/// Extension every model file carries.
pub const MODEL_EXTENSION: &str = "onnx";

/// `<dir>/<logical_name>.onnx`
pub fn model_file(dir: &Path, kind: ModelKind) -> PathBuf {
    dir.join(kind.logical_name()).with_extension(MODEL_EXTENSION)
}

/// What is on disk for one model, before anything is loaded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModelFileStatus {
    pub kind: ModelKind,
    pub path: PathBuf,
    pub present: bool,
    pub size_bytes: Option<u64>,
}

/// Probe the model directory for all three model files.
pub fn scan_model_dir(dir: &Path) -> Vec<ModelFileStatus> {
    ModelKind::ALL
        .iter()
        .map(|&kind| {
            let path = model_file(dir, kind);
            let size_bytes = std::fs::metadata(&path)
                .ok()
                .filter(|m| m.is_file())
                .map(|m| m.len());
            ModelFileStatus {
                kind,
                present: size_bytes.is_some(),
                size_bytes,
                path,
            }
        })
        .collect()
}
