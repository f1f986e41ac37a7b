//! Temporal resampling of a frame window onto the fixed frame count the
//! ejection-fraction model expects.
//!
//! Slot `i` of `T` reads source frame
//! `trunc(i · (N − 1) / (T − 1)) mod N`, so a short window is stretched by
//! repetition and a long window is subsampled, and the selection is a pure
//! function of `(N, T)`.

use std::collections::HashMap;

use tracing::debug;

use cardio_core::error::{EngineError, Result};
use cardio_core::tensor::Tensor;
use cardio_core::types::RawFrame;

use crate::preprocess::{ModelInputSpec, Preprocessor};

/// Default number of frames the temporal model consumes.
pub const DEFAULT_TARGET_FRAMES: usize = 32;

/// Source frame index for output slot `output_index`.
///
/// `available` must be non-zero.  With `target <= 1` every slot maps to frame 0.
pub fn source_index(output_index: usize, available: usize, target: usize) -> usize {
    debug_assert!(available > 0);
    if target <= 1 || available <= 1 {
        return 0;
    }
    let mapped = (output_index as f64 * (available - 1) as f64 / (target - 1) as f64) as usize;
    mapped % available
}

#[derive(Clone, Debug)]
pub struct TemporalResampler {
    target_frames: usize,
    preprocessor: Preprocessor,
}

impl TemporalResampler {
    pub fn new(target_frames: usize) -> Result<Self> {
        if target_frames == 0 {
            return Err(EngineError::Config(
                "temporal target frame count must be at least 1".into(),
            ));
        }
        Ok(Self {
            target_frames,
            preprocessor: Preprocessor::new(),
        })
    }

    pub fn target_frames(&self) -> usize {
        self.target_frames
    }

    /// The ordered source indices this resampler would select from `available` frames.
    pub fn plan(&self, available: usize) -> Vec<usize> {
        (0..self.target_frames)
            .map(|i| source_index(i, available, self.target_frames))
            .collect()
    }

    /// Build a `[1, C, T, H, W]` tensor from `frames` (oldest first).
    ///
    /// # Errors
    ///
    /// [`EngineError::EmptyWindow`] when `frames` is empty; preprocessing
    /// errors of any selected frame abort the whole resample.
    pub fn resample(&self, frames: &[RawFrame], spec: &ModelInputSpec) -> Result<Tensor> {
        if frames.is_empty() {
            return Err(EngineError::EmptyWindow);
        }
        spec.validate()?;

        let plan = self.plan(frames.len());
        let (c, t, h, w) = (
            spec.channels,
            self.target_frames,
            spec.height as usize,
            spec.width as usize,
        );

        // Each distinct source frame is preprocessed once; repeated slots
        // reuse the identical plane.
        let mut planes: HashMap<usize, Vec<f32>> = HashMap::new();
        for &src in &plan {
            if !planes.contains_key(&src) {
                let plane = self.preprocessor.prepare_plane(&frames[src], spec)?;
                planes.insert(src, plane);
            }
        }

        let mut tensor = Tensor::zeros([1, c, t, h, w]);
        for (slot, src) in plan.iter().enumerate() {
            let plane = &planes[src];
            for ch in 0..c {
                tensor.write_run(&[0, ch, slot, 0, 0], plane)?;
            }
        }

        debug!(
            available = frames.len(),
            target = t,
            distinct = planes.len(),
            "Temporal window resampled"
        );
        Ok(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: u8) -> RawFrame {
        RawFrame::from_fn(8, 8, value as i64, move |_, _| value).unwrap()
    }

    fn spec() -> ModelInputSpec {
        ModelInputSpec {
            width: 4,
            height: 4,
            channels: 3,
            enhance: None,
        }
    }

    #[test]
    fn empty_window_is_an_error() {
        let r = TemporalResampler::new(32).unwrap();
        assert!(matches!(
            r.resample(&[], &spec()),
            Err(EngineError::EmptyWindow)
        ));
    }

    #[test]
    fn single_frame_fills_every_slot() {
        let r = TemporalResampler::new(32).unwrap();
        assert!(r.plan(1).iter().all(|&i| i == 0));

        let t = r.resample(&[frame(128)], &spec()).unwrap();
        assert_eq!(t.dims(), &[1, 3, 32, 4, 4]);
        let expected = 128.0 / 255.0;
        assert!(t.as_slice().iter().all(|&v| (v - expected).abs() < 1e-6));
    }

    #[test]
    fn short_window_is_stretched_in_order() {
        let r = TemporalResampler::new(8).unwrap();
        let plan = r.plan(4);
        assert_eq!(plan.first(), Some(&0));
        assert_eq!(plan.last(), Some(&3));
        assert!(plan.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn long_window_is_subsampled_deterministically() {
        let r = TemporalResampler::new(4).unwrap();
        assert_eq!(r.plan(16), vec![0, 5, 10, 15]);
        assert_eq!(r.plan(16), r.plan(16));
    }

    #[test]
    fn slots_hold_their_source_frames() {
        let r = TemporalResampler::new(3).unwrap();
        let frames = [frame(0), frame(100), frame(200)];
        let t = r.resample(&frames, &spec()).unwrap();
        for (slot, value) in [(0usize, 0.0f32), (1, 100.0), (2, 200.0)] {
            for ch in 0..3 {
                let v = t.get(&[0, ch, slot, 2, 2]).unwrap();
                assert!((v - value / 255.0).abs() < 1e-6, "slot {slot} ch {ch}");
            }
        }
    }

    #[test]
    fn zero_target_is_a_configuration_error() {
        assert!(matches!(
            TemporalResampler::new(0),
            Err(EngineError::Config(_))
        ));
    }
}
