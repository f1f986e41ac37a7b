//! Segmentation output → 8-bit foreground mask.

use cardio_core::backend::RawOutputs;
use cardio_core::clinical::SegmentationMask;
use cardio_core::error::{EngineError, Result};
use cardio_core::tensor::Tensor;

const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

/// Decode the first array-valued output of a segmentation model.
///
/// Accepted layouts: `[1, 1, H, W]`, `[1, H, W]`, `[H, W]` (probability or
/// logit per pixel) and `[1, K, H, W]` with `K > 1` (per-class scores,
/// class 0 is background).  Returns `Ok(None)` when the model produced no
/// array output at all.
pub fn decode_mask(outputs: &RawOutputs, threshold: f32) -> Result<Option<SegmentationMask>> {
    let Some(tensor) = outputs.iter().find_map(|(_, v)| v.as_tensor()) else {
        return Ok(None);
    };

    let dims = tensor.dims();
    match *dims {
        [1, 1, h, w] | [1, h, w] | [h, w] => Ok(Some(threshold_plane(tensor, h, w, threshold)?)),
        [1, k, h, w] if k > 1 => Ok(Some(argmax_classes(tensor, k, h, w)?)),
        _ => Err(EngineError::ShapeMismatch {
            expected: vec![1, 1, 0, 0],
            actual: dims.to_vec(),
        }),
    }
}

fn threshold_plane(tensor: &Tensor, h: usize, w: usize, threshold: f32) -> Result<SegmentationMask> {
    let values = tensor.as_slice();
    // Values outside [0, 1] can only be logits.
    let logits = values.iter().any(|v| !(0.0..=1.0).contains(v));
    let data = values
        .iter()
        .map(|&v| {
            let p = if logits { sigmoid(v) } else { v };
            if p >= threshold { FOREGROUND } else { BACKGROUND }
        })
        .collect();
    mask(w, h, data)
}

fn argmax_classes(tensor: &Tensor, k: usize, h: usize, w: usize) -> Result<SegmentationMask> {
    let values = tensor.as_slice();
    let plane = h * w;
    let data = (0..plane)
        .map(|px| {
            let best = (0..k)
                .max_by(|&a, &b| values[a * plane + px].total_cmp(&values[b * plane + px]))
                .unwrap_or(0);
            if best == 0 { BACKGROUND } else { FOREGROUND }
        })
        .collect();
    mask(w, h, data)
}

fn mask(w: usize, h: usize, data: Vec<u8>) -> Result<SegmentationMask> {
    if w == 0 || h == 0 {
        return Err(EngineError::ZeroSizedFrame {
            width: w as u32,
            height: h as u32,
        });
    }
    Ok(SegmentationMask {
        width: w as u32,
        height: h as u32,
        data,
    })
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardio_core::backend::OutputValue;

    fn outputs(dims: Vec<usize>, data: Vec<f32>) -> RawOutputs {
        let mut raw = RawOutputs::new();
        raw.insert("mask", OutputValue::Array(Tensor::new(dims, data).unwrap()));
        raw
    }

    #[test]
    fn probabilities_are_thresholded() {
        let raw = outputs(vec![1, 1, 2, 2], vec![0.1, 0.6, 0.5, 0.49]);
        let mask = decode_mask(&raw, 0.5).unwrap().unwrap();
        assert_eq!((mask.width, mask.height), (2, 2));
        assert_eq!(mask.data, vec![0, 255, 255, 0]);
    }

    #[test]
    fn logits_pass_through_sigmoid() {
        // sigmoid(-3) ≈ 0.05, sigmoid(0.2) ≈ 0.55, sigmoid(4) ≈ 0.98
        let raw = outputs(vec![1, 3], vec![-3.0, 0.2, 4.0]);
        let mask = decode_mask(&raw, 0.5).unwrap().unwrap();
        assert_eq!(mask.data, vec![0, 255, 255]);
    }

    #[test]
    fn multi_class_uses_argmax_with_background_class_zero() {
        // Two classes over a 1×3 plane: background, LV, background.
        let raw = outputs(vec![1, 2, 1, 3], vec![0.9, 0.2, 0.7, 0.1, 0.8, 0.3]);
        let mask = decode_mask(&raw, 0.5).unwrap().unwrap();
        assert_eq!(mask.data, vec![0, 255, 0]);
    }

    #[test]
    fn scalar_only_outputs_yield_no_mask() {
        let raw = RawOutputs::new().with_scalar("ef", 0.5);
        assert!(decode_mask(&raw, 0.5).unwrap().is_none());
    }

    #[test]
    fn unexpected_rank_is_a_shape_error() {
        let raw = outputs(vec![1, 1, 1, 2, 2], vec![0.0; 4]);
        assert!(matches!(
            decode_mask(&raw, 0.5),
            Err(EngineError::ShapeMismatch { .. })
        ));
    }
}
