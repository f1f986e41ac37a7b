//! Host-resident frame types and pixel layout contracts.
//!
//! # Ownership model
//!
//! [`RawFrame`] wraps its pixels in `Arc<[u8]>`.  This provides:
//!
//! - **Immutability**: nothing in the engine can mutate pixels after capture.
//! - **Cheap clone**: cloning a `RawFrame` increments a reference count, so
//!   [`FrameWindow`](crate::frame_window::FrameWindow) snapshots never copy
//!   pixel data.
//! - **Explicit retention**: a consumer that must keep a frame beyond the
//!   cycle that delivered it (photo capture alongside video) calls
//!   [`RawFrame::detach`], which copies the pixels into a fresh allocation
//!   not shared with the frame source.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ─── Pixel layout ────────────────────────────────────────────────────────────

/// Interleaved 8-bit pixel layout of a captured frame.
///
/// Every variant documents its channel order so the luminance conversion
/// applies each broadcast weight to the right byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelLayout {
    /// One byte per pixel, already luminance.
    Gray8,
    /// `[R G B]` per pixel.
    Rgb8,
    /// `[R G B A]` per pixel.  Alpha is ignored.
    Rgba8,
    /// `[B G R A]` per pixel (typical probe SDK surface format).  Alpha is ignored.
    Bgra8,
}

impl PixelLayout {
    /// Bytes per pixel.
    #[inline]
    pub const fn channels(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Rgb8 => 3,
            Self::Rgba8 | Self::Bgra8 => 4,
        }
    }

    /// Byte offsets of the red, green and blue samples within one pixel.
    ///
    /// `Gray8` reports offset 0 for all three.
    #[inline]
    pub const fn rgb_offsets(self) -> (usize, usize, usize) {
        match self {
            Self::Gray8 => (0, 0, 0),
            Self::Rgb8 | Self::Rgba8 => (0, 1, 2),
            Self::Bgra8 => (2, 1, 0),
        }
    }

    /// Minimum buffer size in bytes for a dense `width × height` frame.
    #[inline]
    pub const fn byte_size(self, width: u32, height: u32) -> usize {
        (width as usize) * (height as usize) * self.channels()
    }
}

// ─── RawFrame ────────────────────────────────────────────────────────────────

/// One captured ultrasound image plus its capture timestamp.
///
/// Row-major, densely packed (`stride == width × channels`).
#[derive(Clone, Debug)]
pub struct RawFrame {
    width: u32,
    height: u32,
    layout: PixelLayout,
    /// Capture timestamp in microseconds on the frame source's clock.
    timestamp_us: i64,
    data: Arc<[u8]>,
}

impl RawFrame {
    /// Wrap captured pixels.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ZeroSizedFrame`] if either dimension is zero.
    /// - [`EngineError::BufferTooSmall`] if `data` cannot hold the frame.
    pub fn new(
        width: u32,
        height: u32,
        layout: PixelLayout,
        timestamp_us: i64,
        data: impl Into<Arc<[u8]>>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(EngineError::ZeroSizedFrame { width, height });
        }
        let data = data.into();
        let need = layout.byte_size(width, height);
        if data.len() < need {
            return Err(EngineError::BufferTooSmall {
                need,
                have: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            layout,
            timestamp_us,
            data,
        })
    }

    /// Build a single-channel frame from a generator function `f(x, y) -> luma`.
    ///
    /// Used by synthetic sources and tests.
    pub fn from_fn(
        width: u32,
        height: u32,
        timestamp_us: i64,
        mut f: impl FnMut(u32, u32) -> u8,
    ) -> Result<Self> {
        let mut data = Vec::with_capacity(PixelLayout::Gray8.byte_size(width, height));
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self::new(width, height, PixelLayout::Gray8, timestamp_us, data)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    #[inline]
    pub fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }

    /// Raw interleaved pixel bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Interleaved samples of the pixel at `(x, y)`.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let ch = self.layout.channels();
        let start = ((y as usize) * (self.width as usize) + x as usize) * ch;
        &self.data[start..start + ch]
    }

    /// Copy the pixels into a new allocation that shares nothing with the
    /// frame source.
    pub fn detach(&self) -> Self {
        let need = self.layout.byte_size(self.width, self.height);
        Self {
            width: self.width,
            height: self.height,
            layout: self.layout,
            timestamp_us: self.timestamp_us,
            data: Arc::from(&self.data[..need]),
        }
    }

    /// `true` if both frames share the same pixel allocation.
    pub fn shares_pixels_with(&self, other: &RawFrame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}
