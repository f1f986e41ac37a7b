//! Single-channel luminance planes and the 3×3 operators run on them.
//!
//! # Color space
//!
//! Multi-channel frames collapse to luminance with the BT.601 broadcast
//! weights (`0.299 R + 0.587 G + 0.114 B`).  Ultrasound B-mode is
//! effectively grey, so the weights only matter for colour overlays the
//! probe SDK may burn into the image.
//!
//! Samples stay in the `[0, 255]` domain here; normalisation to `[0, 1]`
//! happens at the end of preprocessing.

use cardio_core::error::{EngineError, Result};
use cardio_core::types::{PixelLayout, RawFrame};

/// BT.601 luminance weights `(r, g, b)`.
pub const LUMA_WEIGHTS: (f32, f32, f32) = (0.299, 0.587, 0.114);

/// Dense row-major luminance plane, samples in `[0, 255]`.
#[derive(Clone, Debug, PartialEq)]
pub struct LumaPlane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl LumaPlane {
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(EngineError::ZeroSizedFrame {
                width: width as u32,
                height: height as u32,
            });
        }
        if data.len() != width * height {
            return Err(EngineError::ShapeMismatch {
                expected: vec![height, width],
                actual: vec![data.len()],
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Collapse a frame to luminance.
    pub fn from_frame(frame: &RawFrame) -> Self {
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let layout = frame.layout();
        let bytes = frame.data();
        let ch = layout.channels();
        let (ro, go, bo) = layout.rgb_offsets();
        let (wr, wg, wb) = LUMA_WEIGHTS;

        let data = (0..width * height)
            .map(|i| {
                let px = &bytes[i * ch..i * ch + ch];
                match layout {
                    PixelLayout::Gray8 => px[0] as f32,
                    _ => wr * px[ro] as f32 + wg * px[go] as f32 + wb * px[bo] as f32,
                }
            })
            .collect();

        Self {
            width,
            height,
            data,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Sample with edge clamping.
    #[inline]
    pub fn clamped(&self, x: isize, y: isize) -> f32 {
        let cx = x.clamp(0, self.width as isize - 1) as usize;
        let cy = y.clamp(0, self.height as isize - 1) as usize;
        self.data[cy * self.width + cx]
    }

    /// Resample to `dst_w × dst_h` with bilinear interpolation.
    ///
    /// Pixel centres are aligned (`src = (dst + 0.5) · scale − 0.5`) and the
    /// four neighbours are clamped at the borders.
    pub fn resize_bilinear(&self, dst_w: usize, dst_h: usize) -> Result<LumaPlane> {
        if dst_w == 0 || dst_h == 0 {
            return Err(EngineError::Config(format!(
                "resize target must be non-zero, got {dst_w}x{dst_h}"
            )));
        }
        if dst_w == self.width && dst_h == self.height {
            return Ok(self.clone());
        }

        let sx = self.width as f32 / dst_w as f32;
        let sy = self.height as f32 / dst_h as f32;
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;

        let mut out = Vec::with_capacity(dst_w * dst_h);
        for y in 0..dst_h {
            let fy = ((y as f32 + 0.5) * sy - 0.5).clamp(0.0, max_y);
            let y0 = fy.floor() as usize;
            let y1 = (y0 + 1).min(self.height - 1);
            let wy = fy - y0 as f32;
            for x in 0..dst_w {
                let fx = ((x as f32 + 0.5) * sx - 0.5).clamp(0.0, max_x);
                let x0 = fx.floor() as usize;
                let x1 = (x0 + 1).min(self.width - 1);
                let wx = fx - x0 as f32;

                let p00 = self.data[y0 * self.width + x0];
                let p01 = self.data[y0 * self.width + x1];
                let p10 = self.data[y1 * self.width + x0];
                let p11 = self.data[y1 * self.width + x1];

                let top = p00 + (p01 - p00) * wx;
                let bottom = p10 + (p11 - p10) * wx;
                out.push(top + (bottom - top) * wy);
            }
        }

        Ok(LumaPlane {
            width: dst_w,
            height: dst_h,
            data: out,
        })
    }

    /// Sobel gradient magnitude per pixel (edge-clamped 3×3 neighbourhood).
    pub fn sobel_magnitude(&self) -> Vec<f32> {
        self.convolve3(|p, x, y| {
            let gx = (p(x + 1, y - 1) + 2.0 * p(x + 1, y) + p(x + 1, y + 1))
                - (p(x - 1, y - 1) + 2.0 * p(x - 1, y) + p(x - 1, y + 1));
            let gy = (p(x - 1, y + 1) + 2.0 * p(x, y + 1) + p(x + 1, y + 1))
                - (p(x - 1, y - 1) + 2.0 * p(x, y - 1) + p(x + 1, y - 1));
            (gx * gx + gy * gy).sqrt()
        })
    }

    /// 4-neighbour Laplacian response per pixel (edge-clamped).
    pub fn laplacian(&self) -> Vec<f32> {
        self.convolve3(|p, x, y| {
            p(x, y - 1) + p(x - 1, y) + p(x + 1, y) + p(x, y + 1) - 4.0 * p(x, y)
        })
    }

    fn convolve3<F>(&self, op: F) -> Vec<f32>
    where
        F: Fn(&dyn Fn(isize, isize) -> f32, isize, isize) -> f32,
    {
        let sample = |x: isize, y: isize| self.clamped(x, y);
        let mut out = Vec::with_capacity(self.data.len());
        for y in 0..self.height as isize {
            for x in 0..self.width as isize {
                out.push(op(&sample, x, y));
            }
        }
        out
    }
}

/// Population mean and standard deviation.  `(0, 0)` for an empty slice.
pub fn mean_and_std(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean as f32, var.sqrt() as f32)
}

/// Population variance.
pub fn variance(values: &[f32]) -> f32 {
    let (_, std) = mean_and_std(values);
    std * std
}
