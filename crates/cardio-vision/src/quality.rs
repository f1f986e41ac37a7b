//! Image and result quality scoring.
//!
//! Three scores in `[0, 1]`:
//!
//! - **clarity**: `0.4·edge + 0.3·contrast + 0.3·sharpness`, where edge is
//!   the mean Sobel magnitude, contrast the intensity standard deviation and
//!   sharpness the variance of the Laplacian response, each normalised
//!   against a reference value.
//! - **signal-to-noise**: mean of bright (tissue) pixels over the standard
//!   deviation of dark (background) pixels, normalised against a maximum
//!   plausible ratio.
//! - **confidence**: the model's own confidence, re-weighted 70/30 against
//!   a segmentation-quality estimate when a mask is available, nudged by
//!   processing time.
//!
//! The overall rating buckets `0.4·clarity + 0.4·confidence + 0.2·snr`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use cardio_core::clinical::{QualityMetrics, QualityRating, SegmentationMask};
use cardio_core::types::RawFrame;

use crate::luma::{LumaPlane, mean_and_std, variance};

/// Reference values and thresholds for the pixel statistics.  All intensity
/// values are on the `[0, 255]` scale.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Mean Sobel magnitude that maps to an edge score of 1.
    pub edge_reference: f32,
    /// Intensity standard deviation that maps to a contrast score of 1.
    pub contrast_reference: f32,
    /// Laplacian variance that maps to a sharpness score of 1.
    pub sharpness_reference: f32,
    /// Pixels above this are tissue signal.
    pub bright_threshold: f32,
    /// Pixels below this are background noise.
    pub dark_threshold: f32,
    /// Signal-to-noise ratio that maps to a score of 1.
    pub max_snr: f32,
    /// Plausible foreground coverage band of a segmentation mask.
    pub coverage_band: (f32, f32),
    /// Processing faster than this (milliseconds) earns `time_adjustment`.
    pub fast_processing_ms: u64,
    /// Processing slower than this (milliseconds) loses `time_adjustment`.
    pub slow_processing_ms: u64,
    pub time_adjustment: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            edge_reference: 60.0,
            contrast_reference: 64.0,
            sharpness_reference: 1000.0,
            bright_threshold: 100.0,
            dark_threshold: 30.0,
            max_snr: 50.0,
            coverage_band: (0.05, 0.40),
            fast_processing_ms: 100,
            slow_processing_ms: 1000,
            time_adjustment: 0.05,
        }
    }
}

/// Combine the three component scores into the overall score and rating.
pub fn overall_rating(clarity: f32, confidence: f32, snr: f32) -> (f32, QualityRating) {
    let overall = (0.4 * clarity + 0.4 * confidence + 0.2 * snr).clamp(0.0, 1.0);
    (overall, QualityRating::from_score(overall))
}

#[derive(Clone, Copy, Debug, Default)]
pub struct QualityScorer {
    config: QualityConfig,
}

impl QualityScorer {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Score one frame and (optionally) the model results derived from it.
    pub fn score(
        &self,
        frame: &RawFrame,
        model_confidence: Option<f32>,
        mask: Option<&SegmentationMask>,
        processing_time: Option<Duration>,
    ) -> QualityMetrics {
        let luma = LumaPlane::from_frame(frame);
        let clarity = self.clarity(&luma);
        let signal_to_noise = self.signal_to_noise(&luma);
        let confidence = self.confidence(model_confidence, mask, processing_time);
        let (overall, rating) = overall_rating(clarity, confidence, signal_to_noise);
        QualityMetrics {
            clarity,
            confidence,
            signal_to_noise,
            overall,
            rating,
        }
    }

    pub fn clarity(&self, luma: &LumaPlane) -> f32 {
        let c = &self.config;
        let grad = luma.sobel_magnitude();
        let (edge_mean, _) = mean_and_std(&grad);
        let (_, intensity_std) = mean_and_std(luma.as_slice());
        let lap_var = variance(&luma.laplacian());

        let edge = normalise(edge_mean, c.edge_reference);
        let contrast = normalise(intensity_std, c.contrast_reference);
        let sharpness = normalise(lap_var, c.sharpness_reference);
        (0.4 * edge + 0.3 * contrast + 0.3 * sharpness).clamp(0.0, 1.0)
    }

    pub fn signal_to_noise(&self, luma: &LumaPlane) -> f32 {
        let c = &self.config;
        let bright: Vec<f32> = luma
            .as_slice()
            .iter()
            .copied()
            .filter(|&v| v > c.bright_threshold)
            .collect();
        if bright.is_empty() {
            return 0.0;
        }
        let dark: Vec<f32> = luma
            .as_slice()
            .iter()
            .copied()
            .filter(|&v| v < c.dark_threshold)
            .collect();
        let (signal, _) = mean_and_std(&bright);
        let (_, noise) = mean_and_std(&dark);
        // A perfectly clean (or absent) background would divide by zero;
        // one grey level is the floor.
        let ratio = signal / noise.max(1.0);
        normalise(ratio, c.max_snr)
    }

    pub fn confidence(
        &self,
        model_confidence: Option<f32>,
        mask: Option<&SegmentationMask>,
        processing_time: Option<Duration>,
    ) -> f32 {
        let c = &self.config;
        let mut confidence = model_confidence.unwrap_or(0.0).clamp(0.0, 1.0);
        if let Some(mask) = mask {
            confidence = 0.7 * confidence + 0.3 * self.segmentation_quality(mask);
        }
        if let Some(elapsed) = processing_time {
            if elapsed < Duration::from_millis(c.fast_processing_ms) {
                confidence += c.time_adjustment;
            } else if elapsed > Duration::from_millis(c.slow_processing_ms) {
                confidence -= c.time_adjustment;
            }
        }
        confidence.clamp(0.0, 1.0)
    }

    /// Mask plausibility: mean of a coverage score (1 inside the plausible
    /// band, falling off linearly outside) and a contiguity score (share of
    /// foreground pixels not on the foreground/background boundary).
    pub fn segmentation_quality(&self, mask: &SegmentationMask) -> f32 {
        let (lo, hi) = self.config.coverage_band;
        let coverage = mask.coverage();
        let coverage_score = if coverage < lo {
            coverage / lo
        } else if coverage > hi {
            (1.0 - (coverage - hi) / (1.0 - hi)).max(0.0)
        } else {
            1.0
        };
        0.5 * coverage_score + 0.5 * contiguity(mask)
    }
}

/// `1 − boundary / foreground`, where a boundary pixel is a foreground
/// pixel with at least one in-image background 4-neighbour.
fn contiguity(mask: &SegmentationMask) -> f32 {
    let (w, h) = (mask.width, mask.height);
    let mut foreground = 0usize;
    let mut boundary = 0usize;
    for y in 0..h {
        for x in 0..w {
            if !mask.is_foreground(x, y) {
                continue;
            }
            foreground += 1;
            let touches_background = (x > 0 && !mask.is_foreground(x - 1, y))
                || (x + 1 < w && !mask.is_foreground(x + 1, y))
                || (y > 0 && !mask.is_foreground(x, y - 1))
                || (y + 1 < h && !mask.is_foreground(x, y + 1));
            if touches_background {
                boundary += 1;
            }
        }
    }
    if foreground == 0 {
        return 0.0;
    }
    1.0 - boundary as f32 / foreground as f32
}

#[inline]
fn normalise(value: f32, reference: f32) -> f32 {
    if reference <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    (value / reference).clamp(0.0, 1.0)
}
