#![doc = include_str!("../README.md")]

pub mod backend;
pub mod clinical;
pub mod error;
pub mod frame_window;
pub mod source;
pub mod tensor;
pub mod types;

pub use backend::{ModelBackend, ModelKind, ModelLoader, ModelMetadata, OutputValue, RawOutputs};
pub use error::{EngineError, Result};
pub use frame_window::{FrameWindow, WindowSnapshot};
pub use tensor::{Tensor, TensorShape};
pub use types::{PixelLayout, RawFrame};
