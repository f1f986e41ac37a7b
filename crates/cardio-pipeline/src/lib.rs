#![doc = include_str!("../README.md")]

pub mod calibrate;
pub mod config;
pub mod consistency;
pub mod inference;
pub mod mask;
pub mod metrics;
pub mod outputs;
pub mod pipeline;
pub mod runtime;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use calibrate::OutputCalibrator;
pub use config::{CalibrationHandle, CalibrationTable, PipelineConfig};
pub use consistency::ConsistencyValidator;
pub use inference::{InferenceEngine, ModelHandle, ModelSet, ModelStatus};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{AiTrigger, CardiacPipeline, CycleReport, FrameDisposition, ResultSink};
pub use scheduler::PipelineScheduler;
