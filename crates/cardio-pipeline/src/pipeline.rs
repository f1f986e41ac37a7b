//! Frame-to-metric pipeline.
//!
//! # Architecture
//!
//! ```text
//! FrameSource ─(blocking thread)─► mpsc(frame_channel_capacity)
//!                                          │
//!                                   on_frame (display path, never awaits)
//!                                   ├─ display cadence ─► FrameWindow
//!                                   └─ AI cadence ─► InFlight guard ─► tokio::spawn
//!                                                                        │
//!                                  models (OnceCell, loaded on first use)│
//!                                                                        ▼
//!                                spawn_blocking: preprocess ─► gate ─► multi-output
//!                                    ─► segmentation (decimated) ─► temporal EF (decimated)
//!                                    ─► calibrate ─► consistency ─► quality
//!                                                                        │
//!                                   mpsc(result_channel_capacity) ◄──────┘
//!                                          │
//!                                      ResultSink
//! ```
//!
//! # Invariants
//!
//! - At most one AI cycle is in flight.  An AI tick that arrives while one
//!   is running is counted in `ai_dropped` and forgotten.
//! - The display path never awaits model loading or inference.
//! - A cycle that finishes after its session ended is discarded, not
//!   delivered.
//! - A full result channel drops the newest report; the pipeline never
//!   blocks on a slow consumer.
//! - Model and preprocessing errors end the cycle (or the one capability)
//!   only; they never end the pipeline.
//!
//! # Metrics
//!
//! [`PipelineMetrics`] counters satisfy `ai_triggers = ai_dropped +
//! cycles_started` and `cycles_started = completed + failed + discarded`
//! whenever no cycle is in flight.  [`CardiacPipeline::run`] checks this at
//! shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{OnceCell, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use cardio_core::backend::{ModelKind, ModelLoader, RawOutputs};
use cardio_core::clinical::{
    CalibratedMetrics, ConsistencyReport, QualityMetrics, SegmentationMask,
};
use cardio_core::error::{EngineError, Result};
use cardio_core::frame_window::{FrameWindow, WindowSnapshot};
use cardio_core::source::FrameSource;
use cardio_core::tensor::Tensor;
use cardio_core::types::RawFrame;
use cardio_vision::gate::{CardiacContentGate, GateDecision};
use cardio_vision::preprocess::Preprocessor;
use cardio_vision::quality::QualityScorer;
use cardio_vision::resample::TemporalResampler;

use crate::calibrate::OutputCalibrator;
use crate::config::{CalibrationHandle, CalibrationTable, ModelInputs, PipelineConfig};
use crate::consistency::ConsistencyValidator;
use crate::inference::{InferenceEngine, ModelSet, ModelStatus};
use crate::mask::decode_mask;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::scheduler::{CyclePlan, InFlight, InFlightPermit, PipelineScheduler};

// ─── Results ────────────────────────────────────────────────────────────────

/// A model call that raised this cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelFailure {
    pub model: ModelKind,
    pub error_code: u32,
    pub message: String,
}

impl ModelFailure {
    fn new(model: ModelKind, err: &EngineError) -> Self {
        Self {
            model,
            error_code: err.error_code(),
            message: err.to_string(),
        }
    }
}

/// Everything one AI cycle produced.
#[derive(Clone, Debug, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub session: u64,
    pub frame_timestamp_us: i64,
    pub window_len: usize,
    pub gate: GateDecision,
    pub metrics: CalibratedMetrics,
    pub consistency: ConsistencyReport,
    pub quality: QualityMetrics,
    /// Pixel buffer for the display; summarised by `mask_coverage` in JSON.
    #[serde(skip)]
    pub mask: Option<SegmentationMask>,
    pub mask_coverage: Option<f32>,
    /// Models that returned outputs this cycle.
    pub models_run: Vec<ModelKind>,
    /// Models that were due but are unavailable for the process.
    pub unavailable: Vec<ModelKind>,
    pub failures: Vec<ModelFailure>,
    pub elapsed_us: u64,
}

/// Consumer of cycle reports (display, recording, export).
pub trait ResultSink: Send {
    fn on_report(&mut self, report: &CycleReport) -> Result<()>;

    /// Called once after the last report of a run.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// What happened to one frame passed to [`CardiacPipeline::on_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameDisposition {
    pub displayed: bool,
    pub ai: AiTrigger,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AiTrigger {
    /// The AI cadence was not due.
    NotDue,
    /// A cycle was spawned.
    Started { cycle: u64 },
    /// Due, but a cycle was already in flight.
    Dropped,
    /// No session is active.
    Inactive,
}

// ─── Cycle stages ───────────────────────────────────────────────────────────

/// Immutable per-pipeline processing stages shared by every cycle.
struct CycleStages {
    inputs: ModelInputs,
    preprocessor: Preprocessor,
    gate: CardiacContentGate,
    calibrator: OutputCalibrator,
    validator: ConsistencyValidator,
    scorer: QualityScorer,
    ef_frame_count: usize,
    mask_threshold: f32,
}

#[derive(Default)]
struct CycleOutcome {
    models_run: Vec<ModelKind>,
    unavailable: Vec<ModelKind>,
    failures: Vec<ModelFailure>,
}

impl CycleOutcome {
    fn fail(&mut self, model: ModelKind, err: &EngineError) {
        warn!(model = %model, error = %err, code = err.error_code(), "Model call failed");
        self.failures.push(ModelFailure::new(model, err));
    }
}

struct CycleInput {
    plan: CyclePlan,
    session: u64,
    frame: RawFrame,
    window: WindowSnapshot,
    calibration: CalibrationTable,
}

impl CycleStages {
    fn from_config(config: &PipelineConfig) -> Self {
        Self {
            inputs: config.inputs.clone(),
            preprocessor: Preprocessor::new(),
            gate: CardiacContentGate::new(config.gate),
            calibrator: OutputCalibrator::new(
                config.output_names.clone(),
                config.ef_normalization,
            ),
            validator: ConsistencyValidator::new(config.consistency_tolerance),
            scorer: QualityScorer::new(config.quality),
            ef_frame_count: config.ef_frame_count,
            mask_threshold: config.mask_threshold,
        }
    }

    /// Run one cycle to completion.  Blocking.
    ///
    /// Only a failure to prepare the gating input aborts the whole cycle;
    /// every later error is recorded against the model it came from.
    fn run(&self, models: &ModelSet, input: CycleInput) -> Result<CycleReport> {
        let t_start = Instant::now();
        let CycleInput {
            plan,
            session,
            frame,
            window,
            calibration,
        } = input;
        let mut outcome = CycleOutcome::default();

        let multi = models.get(ModelKind::MultiOutput);
        let spec = multi.input_spec(&self.inputs.multi_output);
        let tensor = self.preprocessor.prepare(&frame, &spec)?;
        let plane = (spec.height * spec.width) as usize;
        let gate = self
            .gate
            .evaluate(tensor.as_slice().get(..plane).unwrap_or(tensor.as_slice()));

        let mut metrics = CalibratedMetrics::default();
        let mut confidence = None;
        let mut mask = None;

        if gate.admitted() {
            if let Some(outputs) = self.invoke(multi, || Ok(tensor), &mut outcome) {
                metrics = self.calibrator.calibrate(&outputs, &calibration);
                confidence = self.calibrator.names().confidence(&outputs);
            }

            if plan.run_segmentation {
                let seg = models.get(ModelKind::Segmentation);
                let spec = seg.input_spec(&self.inputs.segmentation);
                let prepare = || self.preprocessor.prepare(&frame, &spec);
                if let Some(outputs) = self.invoke(seg, prepare, &mut outcome) {
                    match decode_mask(&outputs, self.mask_threshold) {
                        Ok(decoded) => mask = decoded,
                        Err(e) => outcome.fail(ModelKind::Segmentation, &e),
                    }
                }
            }

            if plan.run_ejection_fraction {
                let ef = models.get(ModelKind::EjectionFraction);
                let spec = ef.input_spec(&self.inputs.ejection_fraction);
                let prepare = || {
                    TemporalResampler::new(ef.frame_count(self.ef_frame_count))?
                        .resample(window.frames(), &spec)
                };
                if let Some(outputs) = self.invoke(ef, prepare, &mut outcome) {
                    match outputs.first_value().and_then(|v| v.as_scalar()) {
                        Some(raw) => {
                            self.calibrator
                                .merge_temporal_ef(&mut metrics, raw, &calibration);
                        }
                        None => outcome.fail(
                            ModelKind::EjectionFraction,
                            &EngineError::Inference {
                                model: ModelKind::EjectionFraction,
                                message: "no scalar output".into(),
                            },
                        ),
                    }
                }
            }
        } else {
            debug!(rejection = ?gate.rejection, "Frame gated out");
        }

        let consistency = self.validator.validate(&metrics);
        let quality = self
            .scorer
            .score(&frame, confidence, mask.as_ref(), Some(t_start.elapsed()));

        Ok(CycleReport {
            cycle: plan.index,
            session,
            frame_timestamp_us: frame.timestamp_us(),
            window_len: window.len(),
            gate,
            metrics,
            consistency,
            quality,
            mask_coverage: mask.as_ref().map(SegmentationMask::coverage),
            mask,
            models_run: outcome.models_run,
            unavailable: outcome.unavailable,
            failures: outcome.failures,
            elapsed_us: t_start.elapsed().as_micros() as u64,
        })
    }

    /// Prepare and predict on one engine.  `None` means "no result this
    /// cycle" for that capability; the reason lands in `outcome`.
    fn invoke(
        &self,
        engine: &InferenceEngine,
        prepare: impl FnOnce() -> Result<Tensor>,
        outcome: &mut CycleOutcome,
    ) -> Option<RawOutputs> {
        let kind = engine.kind();
        if !engine.is_available() {
            outcome.unavailable.push(kind);
            return None;
        }
        let result = prepare().and_then(|input| engine.predict(&input));
        match result {
            Ok(outputs) => {
                outcome.models_run.push(kind);
                Some(outputs)
            }
            Err(e) if e.is_model_unavailable() => {
                outcome.unavailable.push(kind);
                None
            }
            Err(e) => {
                outcome.fail(kind, &e);
                None
            }
        }
    }
}

// ─── Pipeline ───────────────────────────────────────────────────────────────

/// Explicitly constructed pipeline context.  Owns the frame window, the
/// model set and the scheduling state; share it as `Arc<CardiacPipeline>`.
pub struct CardiacPipeline {
    config: PipelineConfig,
    loader: Arc<dyn ModelLoader>,
    models: OnceCell<Arc<ModelSet>>,
    window: Mutex<FrameWindow>,
    scheduler: Mutex<PipelineScheduler>,
    in_flight: InFlight,
    calibration: CalibrationHandle,
    stages: Arc<CycleStages>,
    metrics: Arc<PipelineMetrics>,
    session: AtomicU64,
    active: AtomicBool,
    cancel: CancellationToken,
    results_tx: mpsc::Sender<CycleReport>,
    results_rx: Mutex<Option<mpsc::Receiver<CycleReport>>>,
}

impl CardiacPipeline {
    /// Build a pipeline with an active session.  Models are not loaded
    /// until the first AI cycle or [`warm_up`](Self::warm_up).
    ///
    /// # Errors
    ///
    /// Configuration errors only; an invalid config never yields a pipeline.
    pub fn new(
        config: PipelineConfig,
        loader: Arc<dyn ModelLoader>,
        calibration: CalibrationTable,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let window = FrameWindow::new(config.window_capacity)?;
        let scheduler = PipelineScheduler::new(
            config.display_interval_us(),
            config.ai_interval_us(),
            config.segmentation_every,
            config.ef_every,
        );
        let (results_tx, results_rx) = mpsc::channel(config.result_channel_capacity.max(1));

        info!(
            window_capacity = config.window_capacity,
            display_interval_ms = config.display_interval_ms,
            ai_interval_ms = config.ai_interval_ms,
            "Pipeline constructed"
        );

        Ok(Arc::new(Self {
            stages: Arc::new(CycleStages::from_config(&config)),
            config,
            loader,
            models: OnceCell::new(),
            window: Mutex::new(window),
            scheduler: Mutex::new(scheduler),
            in_flight: InFlight::new(),
            calibration: CalibrationHandle::new(calibration),
            metrics: PipelineMetrics::new(),
            session: AtomicU64::new(1),
            active: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            results_tx,
            results_rx: Mutex::new(Some(results_rx)),
        }))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runtime-tunable calibration multipliers.  Updates apply from the
    /// next AI cycle on.
    pub fn calibration(&self) -> &CalibrationHandle {
        &self.calibration
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn session(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_cycle_in_flight(&self) -> bool {
        self.in_flight.is_busy()
    }

    /// Take the cycle report receiver.  Only one consumer exists; `None`
    /// once taken.
    pub fn take_results(&self) -> Option<mpsc::Receiver<CycleReport>> {
        lock(&self.results_rx).take()
    }

    // ── Session lifecycle ────────────────────────────────────────────

    /// Begin a new scanning session: empty window, fresh cadence, and any
    /// cycle still running from the previous session is discarded.
    pub fn start_session(&self) -> u64 {
        let session = self.reset_session();
        self.active.store(true, Ordering::Release);
        info!(session, "Scanning session started");
        session
    }

    /// Stop scanning.  Frames are ignored until the next `start_session`.
    pub fn stop_session(&self) {
        let session = self.reset_session();
        self.active.store(false, Ordering::Release);
        info!(ended = session - 1, "Scanning session stopped");
    }

    fn reset_session(&self) -> u64 {
        lock(&self.window).clear();
        lock(&self.scheduler).reset();
        self.session.fetch_add(1, Ordering::AcqRel) + 1
    }

    // ── Models ───────────────────────────────────────────────────────

    async fn models(&self) -> Arc<ModelSet> {
        let set = self
            .models
            .get_or_init(|| async {
                Arc::new(
                    ModelSet::load(self.loader.as_ref(), self.config.model_failure_limit).await,
                )
            })
            .await;
        Arc::clone(set)
    }

    /// Load all models now instead of on the first AI cycle.
    pub async fn warm_up(&self) -> Vec<ModelStatus> {
        self.models().await.status()
    }

    /// Per-model capability flags, or `None` before models were loaded.
    pub fn availability(&self) -> Option<Vec<ModelStatus>> {
        self.models.get().map(|set| set.status())
    }

    // ── Frame path ───────────────────────────────────────────────────

    /// Handle one frame from the source.  Never awaits; safe to call from
    /// the display thread as long as a Tokio runtime is entered.
    ///
    /// # Errors
    ///
    /// [`EngineError::Pipeline`] when an AI cycle is due but no Tokio
    /// runtime is available to run it.
    pub fn on_frame(self: &Arc<Self>, frame: RawFrame) -> Result<FrameDisposition> {
        PipelineMetrics::bump(&self.metrics.frames_received);
        if !self.is_active() {
            return Ok(FrameDisposition {
                displayed: false,
                ai: AiTrigger::Inactive,
            });
        }

        let tick = lock(&self.scheduler).on_frame(frame.timestamp_us());
        if tick.display {
            lock(&self.window).push(frame.clone());
            PipelineMetrics::bump(&self.metrics.frames_displayed);
        }
        if !tick.ai {
            return Ok(FrameDisposition {
                displayed: tick.display,
                ai: AiTrigger::NotDue,
            });
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            EngineError::Pipeline("AI cycle due outside a Tokio runtime".into())
        })?;
        PipelineMetrics::bump(&self.metrics.ai_triggers);

        let Some(permit) = self.in_flight.try_acquire() else {
            PipelineMetrics::bump(&self.metrics.ai_dropped);
            debug!(
                timestamp_us = frame.timestamp_us(),
                "AI trigger dropped: cycle in flight"
            );
            return Ok(FrameDisposition {
                displayed: tick.display,
                ai: AiTrigger::Dropped,
            });
        };

        let plan = lock(&self.scheduler).plan_cycle();
        let window = {
            let window = lock(&self.window);
            if window.is_empty() {
                WindowSnapshot::from(vec![frame.clone()])
            } else {
                window.snapshot()
            }
        };
        PipelineMetrics::bump(&self.metrics.cycles_started);

        let input = CycleInput {
            plan,
            session: self.session(),
            frame,
            window,
            calibration: self.calibration.snapshot(),
        };
        runtime.spawn(Arc::clone(self).run_cycle(permit, input));

        Ok(FrameDisposition {
            displayed: tick.display,
            ai: AiTrigger::Started { cycle: plan.index },
        })
    }

    async fn run_cycle(self: Arc<Self>, permit: InFlightPermit, input: CycleInput) {
        let t_start = Instant::now();
        let (cycle, session) = (input.plan.index, input.session);

        let models = self.models().await;
        let stages = Arc::clone(&self.stages);
        let joined = tokio::task::spawn_blocking(move || stages.run(&models, input)).await;
        let elapsed_us = t_start.elapsed().as_micros() as u64;

        match joined {
            Ok(Ok(report)) => {
                self.metrics
                    .inference_failures
                    .fetch_add(report.failures.len() as u64, Ordering::Relaxed);
                if !report.gate.admitted() {
                    PipelineMetrics::bump(&self.metrics.gate_rejections);
                }
                self.metrics
                    .cycle_total_us
                    .fetch_add(elapsed_us, Ordering::Relaxed);

                if !self.is_active() || self.session() != session {
                    PipelineMetrics::bump(&self.metrics.cycles_discarded);
                    debug!(cycle, session, "Late AI result discarded");
                } else {
                    PipelineMetrics::bump(&self.metrics.cycles_completed);
                    info!(
                        cycle,
                        elapsed_us,
                        admitted = report.gate.admitted(),
                        models_run = report.models_run.len(),
                        failures = report.failures.len(),
                        "AI cycle complete"
                    );
                    self.deliver(report);
                }
            }
            Ok(Err(e)) => {
                PipelineMetrics::bump(&self.metrics.cycles_failed);
                if e.aborts_cycle_only() {
                    warn!(cycle, error = %e, code = e.error_code(), "AI cycle aborted");
                } else {
                    error!(cycle, error = %e, code = e.error_code(), "AI cycle failed");
                }
            }
            Err(join_err) => {
                PipelineMetrics::bump(&self.metrics.cycles_failed);
                let e = EngineError::PanicRecovered {
                    stage: "ai_cycle",
                    message: join_err.to_string(),
                };
                error!(cycle, error = %e, code = e.error_code(), "AI cycle panicked");
            }
        }

        // Counters are final before the slot frees.
        drop(permit);
    }

    fn deliver(&self, report: CycleReport) {
        match self.results_tx.try_send(report) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(report)) => {
                PipelineMetrics::bump(&self.metrics.results_dropped);
                warn!(cycle = report.cycle, "Result channel full, report dropped");
            }
            Err(mpsc::error::TrySendError::Closed(report)) => {
                PipelineMetrics::bump(&self.metrics.results_dropped);
                debug!(cycle = report.cycle, "No result consumer, report dropped");
            }
        }
    }

    /// Resolve once no AI cycle is in flight.
    pub async fn wait_idle(&self) {
        self.in_flight.wait_idle().await;
    }

    // ── Driving loop ─────────────────────────────────────────────────

    /// Drive `source` to end-of-stream (or cancellation), forwarding every
    /// cycle report to `sink`.
    ///
    /// The source is read on the blocking pool and handed over through a
    /// bounded channel, so a slow scheduler applies backpressure to the
    /// source rather than buffering frames.
    #[instrument(skip_all, name = "cardiac_pipeline")]
    pub async fn run<S: FrameSource>(
        self: &Arc<Self>,
        mut source: S,
        sink: &mut dyn ResultSink,
    ) -> Result<MetricsSnapshot> {
        let mut results = self
            .take_results()
            .ok_or_else(|| EngineError::Pipeline("result receiver already taken".into()))?;

        let (frame_tx, mut frames) = mpsc::channel::<RawFrame>(self.config.frame_channel_capacity.max(1));
        let cancel = self.cancel.clone();
        let source_task = tokio::task::spawn_blocking(move || -> Result<u64> {
            let mut delivered = 0u64;
            while let Some(frame) = source.next_frame()? {
                if cancel.is_cancelled() || frame_tx.blocking_send(frame).is_err() {
                    break;
                }
                delivered += 1;
            }
            Ok(delivered)
        });

        let loop_result: Result<()> = async {
            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        info!("Pipeline cancelled");
                        return Ok(());
                    }
                    Some(report) = results.recv() => sink.on_report(&report)?,
                    frame = frames.recv() => match frame {
                        Some(frame) => {
                            self.on_frame(frame)?;
                        }
                        None => return Ok(()),
                    },
                }
            }
        }
        .await;

        // Unblocks a source stuck in `blocking_send`.
        drop(frames);
        let mut source_task = source_task;
        let joined = if self.cancel.is_cancelled() {
            match tokio::time::timeout(SOURCE_CANCEL_GRACE, &mut source_task).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    warn!("Frame source still blocked after cancel; detaching it");
                    None
                }
            }
        } else {
            Some(source_task.await)
        };
        let source_result = joined
            .transpose()
            .map_err(|e| EngineError::PanicRecovered {
                stage: "frame_source",
                message: e.to_string(),
            })?;

        self.in_flight.wait_idle().await;
        while let Ok(report) = results.try_recv() {
            sink.on_report(&report)?;
        }
        *lock(&self.results_rx) = Some(results);
        loop_result?;
        sink.finish()?;

        let delivered = source_result.transpose()?.unwrap_or(0);
        self.metrics.report();
        self.metrics.enforce()?;
        info!(frames = delivered, "Frame source drained");
        Ok(self.metrics.snapshot())
    }
}

/// How long a cancelled run waits for a source blocked in `next_frame`.
const SOURCE_CANCEL_GRACE: Duration = Duration::from_millis(250);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering::SeqCst;

    use cardio_core::clinical::{CheckOutcome, EfSource};
    use cardio_core::source::VecFrameSource;

    use crate::testing::{MockBackend, MockLoader, blob_mask, echo_frame};

    fn pipeline(loader: MockLoader, config: PipelineConfig) -> Arc<CardiacPipeline> {
        CardiacPipeline::new(config, Arc::new(loader), CalibrationTable::default()).unwrap()
    }

    fn multi_output_backend() -> MockBackend {
        MockBackend::with_outputs(
            ModelKind::MultiOutput,
            RawOutputs::new()
                .with_scalar("ef", 0.652)
                .with_scalar("edv", 120.0)
                .with_scalar("esv", 42.0)
                .with_scalar("confidence", 0.8),
        )
    }

    #[derive(Default)]
    struct CollectSink {
        reports: Vec<CycleReport>,
        finished: bool,
    }

    impl ResultSink for CollectSink {
        fn on_report(&mut self, report: &CycleReport) -> Result<()> {
            self.reports.push(report.clone());
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    #[test]
    fn zero_capacity_window_is_rejected_at_construction() {
        let config = PipelineConfig {
            window_capacity: 0,
            ..PipelineConfig::default()
        };
        let err = CardiacPipeline::new(
            config,
            Arc::new(MockLoader::new()),
            CalibrationTable::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::ZeroCapacityWindow));
    }

    #[test]
    fn due_cycle_without_runtime_is_an_error_not_a_panic() {
        let p = pipeline(MockLoader::new(), PipelineConfig::default());
        let err = p.on_frame(echo_frame(0)).unwrap_err();
        assert!(matches!(err, EngineError::Pipeline(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlapping_trigger_is_dropped_not_queued() {
        let (backend, release) = multi_output_backend().gated();
        let calls = backend.calls();
        let p = pipeline(
            MockLoader::new().with(ModelKind::MultiOutput, Arc::new(backend)),
            PipelineConfig::default(),
        );

        let first = p.on_frame(echo_frame(0)).unwrap();
        assert_eq!(first.ai, AiTrigger::Started { cycle: 0 });
        let second = p.on_frame(echo_frame(1_000_000)).unwrap();
        assert_eq!(second.ai, AiTrigger::Dropped);
        assert!(p.is_cycle_in_flight());

        release.send(()).unwrap();
        p.wait_idle().await;

        assert_eq!(calls.load(SeqCst), 1);
        let m = p.metrics().snapshot();
        assert_eq!((m.ai_triggers, m.ai_dropped, m.cycles_completed), (2, 1, 1));
        assert!(p.metrics().validate());

        let report = p.take_results().unwrap().try_recv().unwrap();
        assert!((report.metrics.ejection_fraction.unwrap() - 65.2).abs() < 1e-3);
        assert_eq!(report.metrics.ef_source, Some(EfSource::MultiOutputHead));
    }

    #[tokio::test]
    async fn missing_models_degrade_to_unavailable() {
        let p = pipeline(MockLoader::new(), PipelineConfig::default());
        p.on_frame(echo_frame(0)).unwrap();
        p.wait_idle().await;

        let report = p.take_results().unwrap().try_recv().unwrap();
        assert!(report.metrics.is_empty());
        assert!(report.models_run.is_empty());
        assert!(report.failures.is_empty());
        for kind in ModelKind::ALL {
            assert!(report.unavailable.contains(&kind), "{kind}");
        }
        let status = p.availability().unwrap();
        assert!(status.iter().all(|s| !s.available && s.load_error.is_some()));
    }

    #[tokio::test]
    async fn gate_rejection_skips_models_but_scores_quality() {
        let backend = multi_output_backend();
        let calls = backend.calls();
        let p = pipeline(
            MockLoader::new().with(ModelKind::MultiOutput, Arc::new(backend)),
            PipelineConfig::default(),
        );
        p.on_frame(RawFrame::from_fn(32, 32, 0, |_, _| 128).unwrap())
            .unwrap();
        p.wait_idle().await;

        let report = p.take_results().unwrap().try_recv().unwrap();
        assert!(!report.gate.admitted());
        assert_eq!(calls.load(SeqCst), 0);
        assert!(report.metrics.is_empty());
        assert!((0.0..=1.0).contains(&report.quality.overall));
        assert_eq!(p.metrics().snapshot().gate_rejections, 1);
    }

    #[tokio::test]
    async fn repeated_failures_retire_the_model() {
        let config = PipelineConfig {
            ai_interval_ms: 1,
            model_failure_limit: 2,
            ..PipelineConfig::default()
        };
        let p = pipeline(
            MockLoader::new().with(
                ModelKind::MultiOutput,
                Arc::new(MockBackend::failing(ModelKind::MultiOutput)),
            ),
            config,
        );
        let mut results = p.take_results().unwrap();

        let mut reports = Vec::new();
        for i in 0..3 {
            p.on_frame(echo_frame(i * 1_000)).unwrap();
            p.wait_idle().await;
            reports.push(results.try_recv().unwrap());
        }

        assert_eq!(reports[0].failures.len(), 1);
        assert_eq!(reports[0].failures[0].error_code, 300);
        assert_eq!(reports[1].failures.len(), 1);
        assert!(reports[2].failures.is_empty());
        assert!(reports[2].unavailable.contains(&ModelKind::MultiOutput));
        assert_eq!(p.metrics().snapshot().inference_failures, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn result_of_stopped_session_is_discarded() {
        let (backend, release) = multi_output_backend().gated();
        let p = pipeline(
            MockLoader::new().with(ModelKind::MultiOutput, Arc::new(backend)),
            PipelineConfig::default(),
        );
        let mut results = p.take_results().unwrap();

        p.on_frame(echo_frame(0)).unwrap();
        p.stop_session();
        assert_eq!(
            p.on_frame(echo_frame(1_000_000)).unwrap().ai,
            AiTrigger::Inactive
        );
        release.send(()).unwrap();
        p.wait_idle().await;

        assert!(results.try_recv().is_err());
        let m = p.metrics().snapshot();
        assert_eq!((m.cycles_discarded, m.cycles_completed), (1, 0));
        assert!(p.metrics().validate());

        p.start_session();
        assert!(p.is_active());
        assert!(matches!(
            p.on_frame(echo_frame(2_000_000)).unwrap().ai,
            AiTrigger::Started { cycle: 0 }
        ));
        release.send(()).unwrap();
        p.wait_idle().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_drains_source_and_reports_every_cycle() {
        let seg = MockBackend::with_outputs(ModelKind::Segmentation, blob_mask());
        let ef = MockBackend::new(ModelKind::EjectionFraction, "ef", 0.55)
            .with_input_shape(vec![1, 3, 4, 112, 112]);
        let loader = MockLoader::new()
            .with(ModelKind::MultiOutput, Arc::new(multi_output_backend()))
            .with(ModelKind::Segmentation, Arc::new(seg))
            .with(ModelKind::EjectionFraction, Arc::new(ef));
        let p = pipeline(loader, PipelineConfig::default());
        p.warm_up().await;

        // 20 frames at 10 fps: AI due at 0, 0.5 s, 1.0 s, 1.5 s.
        let frames = (0..20).map(|i| echo_frame(i * 100_000)).collect();
        let mut sink = CollectSink::default();
        let snapshot = p.run(VecFrameSource::new(frames), &mut sink).await.unwrap();

        assert!(sink.finished);
        assert_eq!(snapshot.frames_received, 20);
        assert_eq!(snapshot.frames_displayed, 10);
        assert_eq!(snapshot.ai_triggers, 4);
        assert_eq!(
            snapshot.cycles_completed,
            sink.reports.len() as u64 + snapshot.results_dropped
        );
        assert!(p.metrics().validate());

        let first = sink.reports.iter().find(|r| r.cycle == 0).unwrap();
        assert_eq!(first.metrics.ef_source, Some(EfSource::TemporalModel));
        assert!((first.metrics.ejection_fraction.unwrap() - 55.0).abs() < 1e-3);
        assert!(first.mask.is_some());
        assert!((first.mask_coverage.unwrap() - 0.25).abs() < 1e-6);
        assert_eq!(first.consistency.derived_ef.map(|d| d.round()), Some(65.0));
    }

    /// Yields one frame, then blocks until released.
    struct StallingSource {
        first: Option<RawFrame>,
        release: std::sync::mpsc::Receiver<()>,
    }

    impl FrameSource for StallingSource {
        fn next_frame(&mut self) -> Result<Option<RawFrame>> {
            if let Some(frame) = self.first.take() {
                return Ok(Some(frame));
            }
            let _ = self.release.recv();
            Ok(None)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_returns_even_when_source_is_blocked() {
        let (release_tx, release) = std::sync::mpsc::channel();
        let source = StallingSource {
            first: Some(echo_frame(0)),
            release,
        };
        let p = pipeline(MockLoader::new(), PipelineConfig::default());
        let cancel = p.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let mut sink = CollectSink::default();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), p.run(source, &mut sink))
            .await
            .expect("run returns after cancel")
            .unwrap();
        assert_eq!(snapshot.frames_received, 1);
        assert!(sink.finished);

        drop(release_tx);
    }

    #[tokio::test]
    async fn broken_temporal_head_does_not_override_volumetric_ef() {
        let multi = MockBackend::with_outputs(
            ModelKind::MultiOutput,
            RawOutputs::new()
                .with_scalar("edv", 120.0)
                .with_scalar("esv", 42.0),
        );
        let ef = MockBackend::new(ModelKind::EjectionFraction, "ef", 0.02)
            .with_input_shape(vec![1, 3, 4, 112, 112]);
        let loader = MockLoader::new()
            .with(ModelKind::MultiOutput, Arc::new(multi))
            .with(ModelKind::EjectionFraction, Arc::new(ef));
        let p = pipeline(loader, PipelineConfig::default());
        let mut results = p.take_results().unwrap();

        p.on_frame(echo_frame(0)).unwrap();
        p.wait_idle().await;
        let report = results.try_recv().unwrap();

        assert!(report.models_run.contains(&ModelKind::EjectionFraction));
        assert!((report.metrics.ejection_fraction.unwrap() - 65.0).abs() < 1e-3);
        assert_eq!(report.metrics.ef_source, Some(EfSource::Volumetric));
        // No direct EF survived, so agreement cannot be checked.
        assert_eq!(report.consistency.ef_consistency, CheckOutcome::Unknown);
    }

    #[tokio::test]
    async fn calibration_updates_apply_to_the_next_cycle() {
        let config = PipelineConfig {
            ai_interval_ms: 1,
            ..PipelineConfig::default()
        };
        let p = pipeline(
            MockLoader::new().with(ModelKind::MultiOutput, Arc::new(multi_output_backend())),
            config,
        );
        let mut results = p.take_results().unwrap();

        p.on_frame(echo_frame(0)).unwrap();
        p.wait_idle().await;
        let before = results.try_recv().unwrap();

        p.calibration()
            .set(cardio_core::clinical::MetricId::EndDiastolicVolume, 1.5)
            .unwrap();
        p.on_frame(echo_frame(1_000)).unwrap();
        p.wait_idle().await;
        let after = results.try_recv().unwrap();

        assert_eq!(before.metrics.end_diastolic_volume, Some(120.0));
        assert_eq!(after.metrics.end_diastolic_volume, Some(180.0));
    }
}
