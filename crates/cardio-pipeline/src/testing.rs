//! In-process model doubles for unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use cardio_core::backend::{
    ModelBackend, ModelKind, ModelLoader, ModelMetadata, OutputSpec, RawOutputs,
};
use cardio_core::error::{EngineError, Result};
use cardio_core::tensor::Tensor;
use cardio_core::types::RawFrame;

/// Returns fixed outputs; can be switched to fail or to block until released.
pub struct MockBackend {
    kind: ModelKind,
    meta: ModelMetadata,
    outputs: RawOutputs,
    calls: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
    gate: Option<Mutex<mpsc::Receiver<()>>>,
}

impl MockBackend {
    pub fn new(kind: ModelKind, name: &str, value: f32) -> Self {
        Self::with_outputs(kind, RawOutputs::new().with_scalar(name, value))
    }

    pub fn with_outputs(kind: ModelKind, outputs: RawOutputs) -> Self {
        let input_shape = match kind.input_rank() {
            5 => vec![1, 3, -1, -1, -1],
            _ => vec![1, 3, -1, -1],
        };
        let meta = ModelMetadata {
            name: format!("mock_{}", kind.logical_name()),
            input_name: "input".into(),
            input_shape,
            outputs: outputs
                .names()
                .map(|name| OutputSpec {
                    name: name.to_string(),
                    shape: vec![1],
                })
                .collect(),
        };
        Self {
            kind,
            meta,
            outputs,
            calls: Arc::new(AtomicUsize::new(0)),
            fail: Arc::new(AtomicBool::new(false)),
            gate: None,
        }
    }

    pub fn failing(kind: ModelKind) -> Self {
        let backend = Self::with_outputs(kind, RawOutputs::new());
        backend.fail.store(true, Ordering::SeqCst);
        backend
    }

    pub fn with_input_shape(mut self, shape: Vec<i64>) -> Self {
        self.meta.input_shape = shape;
        self
    }

    /// Every `run` blocks until one `()` arrives on the returned sender.
    pub fn gated(mut self) -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        self.gate = Some(Mutex::new(rx));
        (self, tx)
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn fail_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail)
    }
}

impl ModelBackend for MockBackend {
    fn metadata(&self) -> &ModelMetadata {
        &self.meta
    }

    fn run(&self, _input: &Tensor) -> Result<RawOutputs> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let rx = gate.lock().unwrap();
            rx.recv()
                .map_err(|_| EngineError::Pipeline("mock gate closed".into()))?;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Inference {
                model: self.kind,
                message: "mock failure".into(),
            });
        }
        Ok(self.outputs.clone())
    }
}

/// Serves preregistered backends; every other kind fails to load.
#[derive(Default)]
pub struct MockLoader {
    backends: BTreeMap<ModelKind, Arc<dyn ModelBackend>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ModelKind, backend: Arc<dyn ModelBackend>) -> Self {
        self.backends.insert(kind, backend);
        self
    }
}

#[async_trait]
impl ModelLoader for MockLoader {
    async fn load(&self, kind: ModelKind) -> Result<Arc<dyn ModelBackend>> {
        self.backends
            .get(&kind)
            .cloned()
            .ok_or_else(|| EngineError::ModelLoad(format!("no artifact for {kind}")))
    }
}

/// 64×64 checkerboard of 8-pixel cells: mid brightness, strong edges.
pub fn echo_frame(timestamp_us: i64) -> RawFrame {
    RawFrame::from_fn(64, 64, timestamp_us, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 { 40 } else { 200 }
    })
    .unwrap()
}

/// `[1, 1, 8, 8]` probability mask with a centred 4×4 foreground block.
pub fn blob_mask() -> RawOutputs {
    let data = (0..64)
        .map(|i| {
            let (x, y) = (i % 8, i / 8);
            if (2..6).contains(&x) && (2..6).contains(&y) { 0.9 } else { 0.1 }
        })
        .collect();
    let mut outputs = RawOutputs::new();
    outputs.insert(
        "mask",
        cardio_core::backend::OutputValue::Array(Tensor::new([1, 1, 8, 8], data).unwrap()),
    );
    outputs
}
