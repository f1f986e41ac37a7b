//! Frame source contract shared across crate boundaries.
//!
//! Probe connection management lives outside this workspace; whatever owns
//! the probe implements [`FrameSource`] (or pushes frames directly into the
//! pipeline) and the engine never assumes more than this trait promises.

use crate::error::Result;
use crate::types::RawFrame;

/// Delivers immutable frames at an unspecified, possibly irregular rate.
///
/// Implementations: probe SDK adapter, directory replay, synthetic generator.
///
/// `next_frame` runs on a blocking thread and cannot be interrupted.  A
/// cancelled pipeline stops waiting for it after a short grace period; a
/// source that can stall indefinitely should return on its own timeout
/// so the thread is released.
pub trait FrameSource: Send + 'static {
    /// Block until the next frame is available, or return `None` at end-of-stream.
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;
}

/// A finite, in-memory source.  Useful for replay and tests.
pub struct VecFrameSource {
    frames: std::vec::IntoIter<RawFrame>,
}

impl VecFrameSource {
    pub fn new(frames: Vec<RawFrame>) -> Self {
        Self {
            frames: frames.into_iter(),
        }
    }
}

impl FrameSource for VecFrameSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        Ok(self.frames.next())
    }
}
