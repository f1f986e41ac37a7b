//! CLI/runtime bridge helpers.
//!
//! Keeps model-runtime composition inside `cardio-pipeline` so callers can
//! depend on pipeline contracts without importing `cardio-onnx` directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use cardio_core::error::Result;
use cardio_onnx::{ModelFileStatus, OnnxModelLoader, scan_model_dir};

use crate::config::{CalibrationTable, PipelineConfig};
use crate::pipeline::CardiacPipeline;

#[derive(Clone, Debug, Default)]
pub struct RuntimeRequest {
    pub config_path: Option<PathBuf>,
    pub calibration_path: Option<PathBuf>,
    /// Overrides `model_dir` from the config file.
    pub model_dir: Option<PathBuf>,
    pub intra_threads: Option<usize>,
}

pub struct RuntimeSetup {
    pub pipeline: Arc<CardiacPipeline>,
    pub model_dir: PathBuf,
    pub model_files: Vec<ModelFileStatus>,
}

pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_json_file(path),
        None => Ok(PipelineConfig::default()),
    }
}

pub fn load_calibration(path: Option<&Path>) -> Result<CalibrationTable> {
    match path {
        Some(path) => CalibrationTable::from_json_file(path),
        None => Ok(CalibrationTable::identity()),
    }
}

/// Build a pipeline backed by ONNX models from the resolved model directory.
///
/// Missing model files are not an error here; they surface as unavailable
/// capabilities once the models are loaded.
pub fn prepare_runtime(request: &RuntimeRequest) -> Result<RuntimeSetup> {
    let mut config = load_config(request.config_path.as_deref())?;
    if let Some(dir) = &request.model_dir {
        config.model_dir = dir.clone();
    }
    let calibration = load_calibration(request.calibration_path.as_deref())?;

    let model_dir = config.model_dir.clone();
    let model_files = scan_model_dir(&model_dir);
    info!(
        model_dir = %model_dir.display(),
        present = model_files.iter().filter(|f| f.present).count(),
        runtime = cardio_onnx::RUNTIME_ENABLED,
        "Runtime resolved"
    );

    let mut loader = OnnxModelLoader::new(&model_dir);
    if let Some(threads) = request.intra_threads {
        loader = loader.with_intra_threads(threads);
    }

    let pipeline = CardiacPipeline::new(config, Arc::new(loader), calibration)?;
    Ok(RuntimeSetup {
        pipeline,
        model_dir,
        model_files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardio_core::error::EngineError;

    #[test]
    fn defaults_without_files() {
        let config = load_config(None).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(load_calibration(None).unwrap(), CalibrationTable::identity());
    }

    #[test]
    fn missing_config_file_is_a_config_error() {
        let err = load_config(Some(Path::new("/nonexistent/cardio.json"))).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn empty_model_dir_yields_pipeline_with_nothing_available() {
        let request = RuntimeRequest {
            model_dir: Some(PathBuf::from("/nonexistent/models")),
            ..RuntimeRequest::default()
        };
        let setup = prepare_runtime(&request).unwrap();
        assert_eq!(setup.model_dir, PathBuf::from("/nonexistent/models"));
        assert!(setup.model_files.iter().all(|f| !f.present));
        let status = setup.pipeline.warm_up().await;
        assert_eq!(status.len(), 3);
        assert!(status.iter().all(|s| !s.available));
    }
}
