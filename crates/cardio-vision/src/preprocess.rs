//! Frame preprocessing: luminance → bilinear resize → optional contrast
//! enhancement → `[0, 1]` normalisation → channel replication.
//!
//! # Transform chain
//!
//! ```text
//! RawFrame (Gray8 / Rgb8 / Rgba8 / Bgra8)
//!   └── LumaPlane::from_frame          BT.601 weights, [0, 255]
//!         └── resize_bilinear          target H × W, edge-clamped
//!               └── / 255              [0, 1]
//!                     └── Enhancement  gamma, then contrast stretch (segmentation only)
//!                           └── replicate × C  →  Tensor [1, C, H, W]
//! ```
//!
//! The same enhanced signal is copied into every requested channel; models
//! trained on RGB input see a grey image.

use serde::{Deserialize, Serialize};
use tracing::trace;

use cardio_core::backend::{ModelKind, ModelMetadata};
use cardio_core::error::{EngineError, Result};
use cardio_core::tensor::Tensor;
use cardio_core::types::RawFrame;

use crate::luma::LumaPlane;

/// Two-stage contrast enhancement applied to normalised samples.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Enhancement {
    /// Power-law exponent (`v' = v^gamma`).  Values below 1 lift dark tissue.
    pub gamma: f32,
    /// Linear stretch factor around the 0.5 midpoint.
    pub contrast: f32,
}

impl Default for Enhancement {
    fn default() -> Self {
        Self {
            gamma: 0.8,
            contrast: 1.2,
        }
    }
}

impl Enhancement {
    #[inline]
    pub fn apply(&self, v: f32) -> f32 {
        let g = v.clamp(0.0, 1.0).powf(self.gamma);
        ((g - 0.5) * self.contrast + 0.5).clamp(0.0, 1.0)
    }
}

/// Input geometry one model expects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelInputSpec {
    pub width: u32,
    pub height: u32,
    pub channels: usize,
    /// Contrast enhancement; `None` feeds the plain normalised signal.
    #[serde(default)]
    pub enhance: Option<Enhancement>,
}

impl ModelInputSpec {
    /// EchoNet-style temporal EF regressor: 112 × 112, 3 channels, no enhancement.
    pub fn ejection_fraction() -> Self {
        Self {
            width: 112,
            height: 112,
            channels: 3,
            enhance: None,
        }
    }

    /// Segmentation model: 112 × 112, 3 channels, enhanced.
    pub fn segmentation() -> Self {
        Self {
            width: 112,
            height: 112,
            channels: 3,
            enhance: Some(Enhancement::default()),
        }
    }

    /// Multi-output regressor: 224 × 224, 3 channels, no enhancement.
    pub fn multi_output() -> Self {
        Self {
            width: 224,
            height: 224,
            channels: 3,
            enhance: None,
        }
    }

    pub fn for_kind(kind: ModelKind) -> Self {
        match kind {
            ModelKind::EjectionFraction => Self::ejection_fraction(),
            ModelKind::Segmentation => Self::segmentation(),
            ModelKind::MultiOutput => Self::multi_output(),
        }
    }

    /// Override channels / height / width with whatever the model declares
    /// statically.  Dynamic axes keep the configured value.
    ///
    /// Spatial models declare `[N, C, H, W]`; the temporal model declares
    /// `[N, C, T, H, W]`.
    pub fn refined_by(mut self, meta: &ModelMetadata) -> Self {
        let rank = meta.input_shape.len();
        if rank < 4 {
            return self;
        }
        if let Some(c) = meta.static_input_dim(1) {
            self.channels = c;
        }
        if let Some(h) = meta.static_input_dim(rank - 2) {
            self.height = h as u32;
        }
        if let Some(w) = meta.static_input_dim(rank - 1) {
            self.width = w as u32;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.channels == 0 {
            return Err(EngineError::Config(format!(
                "model input spec must be non-zero, got {}x{}x{}",
                self.channels, self.height, self.width
            )));
        }
        Ok(())
    }
}

/// Converts raw frames into model-ready tensors.
#[derive(Clone, Copy, Debug, Default)]
pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Prepare one frame as a `[1, C, H, W]` tensor.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ZeroSizedFrame`] for a degenerate source frame.
    /// - [`EngineError::Config`] for a zero-sized spec.
    ///
    /// On error nothing is returned; a partially filled tensor never escapes.
    pub fn prepare(&self, frame: &RawFrame, spec: &ModelInputSpec) -> Result<Tensor> {
        let plane = self.prepare_plane(frame, spec)?;
        let (h, w) = (spec.height as usize, spec.width as usize);
        let mut data = Vec::with_capacity(spec.channels * h * w);
        for _ in 0..spec.channels {
            data.extend_from_slice(&plane);
        }
        Tensor::new([1, spec.channels, h, w], data)
    }

    /// Prepare one frame as a single normalised `H × W` plane.
    ///
    /// This is the per-channel content of [`prepare`](Self::prepare); the
    /// temporal resampler writes it into every channel of a frame slot.
    pub fn prepare_plane(&self, frame: &RawFrame, spec: &ModelInputSpec) -> Result<Vec<f32>> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(EngineError::ZeroSizedFrame {
                width: frame.width(),
                height: frame.height(),
            });
        }
        spec.validate()?;

        let luma = LumaPlane::from_frame(frame);
        let resized = luma.resize_bilinear(spec.width as usize, spec.height as usize)?;

        let mut samples = resized.into_vec();
        match spec.enhance {
            Some(enh) => {
                for v in &mut samples {
                    *v = enh.apply(*v / 255.0);
                }
            }
            None => {
                for v in &mut samples {
                    *v = (*v / 255.0).clamp(0.0, 1.0);
                }
            }
        }

        trace!(
            src_w = frame.width(),
            src_h = frame.height(),
            dst_w = spec.width,
            dst_h = spec.height,
            enhanced = spec.enhance.is_some(),
            "Frame preprocessed"
        );
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardio_core::types::PixelLayout;

    fn gradient_frame(w: u32, h: u32) -> RawFrame {
        RawFrame::from_fn(w, h, 0, |x, _| ((x * 255) / (w - 1).max(1)) as u8).unwrap()
    }

    #[test]
    fn output_shape_is_exact() {
        let frame = gradient_frame(64, 48);
        let spec = ModelInputSpec {
            width: 32,
            height: 16,
            channels: 3,
            enhance: None,
        };
        let t = Preprocessor::new().prepare(&frame, &spec).unwrap();
        assert_eq!(t.dims(), &[1, 3, 16, 32]);
    }

    #[test]
    fn samples_are_normalised() {
        let frame = gradient_frame(64, 48);
        for spec in [ModelInputSpec::multi_output(), ModelInputSpec::segmentation()] {
            let t = Preprocessor::new().prepare(&frame, &spec).unwrap();
            assert!(t.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn channels_carry_identical_signal() {
        let frame = gradient_frame(20, 10);
        let spec = ModelInputSpec {
            width: 8,
            height: 4,
            channels: 3,
            enhance: Some(Enhancement::default()),
        };
        let t = Preprocessor::new().prepare(&frame, &spec).unwrap();
        let plane = 8 * 4;
        let s = t.as_slice();
        assert_eq!(&s[..plane], &s[plane..2 * plane]);
        assert_eq!(&s[..plane], &s[2 * plane..]);
    }

    #[test]
    fn enhancement_keeps_midpoint_fixed_under_unit_gamma() {
        let enh = Enhancement {
            gamma: 1.0,
            contrast: 2.0,
        };
        assert!((enh.apply(0.5) - 0.5).abs() < 1e-6);
        assert_eq!(enh.apply(0.9), 1.0);
        assert_eq!(enh.apply(0.1), 0.0);
    }

    #[test]
    fn rgb_and_grey_frames_agree_for_grey_content() {
        let grey = RawFrame::new(2, 1, PixelLayout::Gray8, 0, vec![10u8, 200]).unwrap();
        let rgb = RawFrame::new(2, 1, PixelLayout::Rgb8, 0, vec![10u8, 10, 10, 200, 200, 200])
            .unwrap();
        let spec = ModelInputSpec {
            width: 2,
            height: 1,
            channels: 1,
            enhance: None,
        };
        let a = Preprocessor::new().prepare(&grey, &spec).unwrap();
        let b = Preprocessor::new().prepare(&rgb, &spec).unwrap();
        for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
            assert!((x - y).abs() < 1e-3);
        }
    }

    #[test]
    fn zero_sized_spec_is_rejected() {
        let frame = gradient_frame(8, 8);
        let spec = ModelInputSpec {
            width: 0,
            height: 8,
            channels: 1,
            enhance: None,
        };
        assert!(matches!(
            Preprocessor::new().prepare(&frame, &spec),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn static_metadata_refines_spec() {
        let meta = ModelMetadata {
            name: "ef".into(),
            input_name: "x".into(),
            input_shape: vec![1, 3, 32, 128, 96],
            outputs: vec![],
        };
        let spec = ModelInputSpec::ejection_fraction().refined_by(&meta);
        assert_eq!((spec.channels, spec.height, spec.width), (3, 128, 96));

        let dynamic = ModelMetadata {
            input_shape: vec![-1, 1, -1, -1],
            ..meta
        };
        let spec = ModelInputSpec::segmentation().refined_by(&dynamic);
        assert_eq!((spec.channels, spec.height, spec.width), (1, 112, 112));
    }
}
