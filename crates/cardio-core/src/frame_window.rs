//! Bounded, insertion-ordered window of recently displayed frames.
//!
//! The window supplies temporal context to the ejection-fraction model.
//! `push` evicts the oldest frame once `capacity` is reached, so the window
//! always holds the last `capacity` frames in arrival order.

use std::collections::VecDeque;

use crate::error::{EngineError, Result};
use crate::types::RawFrame;

/// Default window capacity (frames).
pub const DEFAULT_WINDOW_CAPACITY: usize = 16;

#[derive(Debug)]
pub struct FrameWindow {
    capacity: usize,
    frames: VecDeque<RawFrame>,
}

impl FrameWindow {
    /// Create an empty window.
    ///
    /// # Errors
    ///
    /// [`EngineError::ZeroCapacityWindow`] when `capacity == 0`.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(EngineError::ZeroCapacityWindow);
        }
        Ok(Self {
            capacity,
            frames: VecDeque::with_capacity(capacity),
        })
    }

    /// Append a frame, evicting the oldest when full.  Amortized O(1).
    pub fn push(&mut self, frame: RawFrame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Ordered (oldest first) view of the current contents.
    ///
    /// The returned frames share pixel storage with the window; nothing is
    /// copied.  Call [`RawFrame::detach`] on any frame that must outlive the
    /// current cycle.
    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            frames: self.frames.iter().cloned().collect(),
        }
    }

    /// Iterate oldest to newest without cloning.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &RawFrame> {
        self.frames.iter()
    }

    /// Most recently pushed frame.
    pub fn latest(&self) -> Option<&RawFrame> {
        self.frames.back()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Read-only, ordered copy of a [`FrameWindow`]'s frame handles, owned by
/// one AI cycle.
#[derive(Clone, Debug, Default)]
pub struct WindowSnapshot {
    frames: Vec<RawFrame>,
}

impl WindowSnapshot {
    pub fn frames(&self) -> &[RawFrame] {
        &self.frames
    }

    pub fn latest(&self) -> Option<&RawFrame> {
        self.frames.last()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl From<Vec<RawFrame>> for WindowSnapshot {
    fn from(frames: Vec<RawFrame>) -> Self {
        Self { frames }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: i64) -> RawFrame {
        RawFrame::from_fn(2, 2, ts, |_, _| 0).unwrap()
    }

    #[test]
    fn zero_capacity_is_a_configuration_error() {
        assert!(matches!(
            FrameWindow::new(0),
            Err(EngineError::ZeroCapacityWindow)
        ));
    }

    #[test]
    fn retains_last_capacity_frames_in_order() {
        for capacity in 1..=6usize {
            for pushes in 0..=(3 * capacity) {
                let mut window = FrameWindow::new(capacity).unwrap();
                for ts in 0..pushes as i64 {
                    window.push(frame(ts));
                }
                let kept: Vec<i64> = window.iter().map(RawFrame::timestamp_us).collect();
                let first = pushes.saturating_sub(capacity) as i64;
                let expected: Vec<i64> = (first..pushes as i64).collect();
                assert_eq!(kept, expected, "capacity={capacity} pushes={pushes}");
                assert!(window.len() <= capacity);
            }
        }
    }

    #[test]
    fn snapshot_shares_pixels_and_survives_clear() {
        let mut window = FrameWindow::new(4).unwrap();
        window.push(frame(1));
        window.push(frame(2));
        let snap = window.snapshot();
        window.clear();
        assert!(window.is_empty());
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.latest().map(RawFrame::timestamp_us), Some(2));
    }
}
