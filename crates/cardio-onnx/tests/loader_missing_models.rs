use std::path::PathBuf;

use cardio_core::backend::{ModelKind, ModelLoader};
use cardio_core::error::EngineError;
use cardio_onnx::{OnnxModelLoader, scan_model_dir};

fn empty_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cardio-onnx-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[tokio::test]
async fn missing_model_file_is_a_load_error() {
    let dir = empty_dir("missing");
    let loader = OnnxModelLoader::new(&dir);
    for kind in ModelKind::ALL {
        let err = match loader.load(kind).await {
            Ok(_) => panic!("{kind} loaded from an empty directory"),
            Err(e) => e,
        };
        assert!(matches!(err, EngineError::ModelLoad(_)), "{err}");
    }
    assert!(scan_model_dir(&dir).iter().all(|s| !s.present));
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn corrupt_model_file_is_a_load_error() {
    let dir = empty_dir("corrupt");
    let loader = OnnxModelLoader::new(&dir).with_intra_threads(2);
    std::fs::write(loader.model_path(ModelKind::Segmentation), b"\x00\x01garbage").unwrap();

    let result = loader.load(ModelKind::Segmentation).await;
    assert!(matches!(result, Err(EngineError::ModelLoad(_))));
    let _ = std::fs::remove_dir_all(&dir);
}
