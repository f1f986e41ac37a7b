#![doc = include_str!("../README.md")]

pub mod gate;
pub mod luma;
pub mod preprocess;
pub mod quality;
pub mod resample;

pub use gate::{CardiacContentGate, GateDecision, GateRejection, GateThresholds, SampleStats};
pub use luma::LumaPlane;
pub use preprocess::{Enhancement, ModelInputSpec, Preprocessor};
pub use quality::{QualityConfig, QualityScorer, overall_rating};
pub use resample::{DEFAULT_TARGET_FRAMES, TemporalResampler};
