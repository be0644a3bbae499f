//! Per-frame quality analysis
//!
//! Brightness, a 1-D sharpness proxy and a centered-framing check computed
//! over a downscaled RGB raster. All functions here are pure.

use image::{Rgb, RgbImage};
use serde::Serialize;

use crate::config::QualityThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Good,
    Warning,
    Error,
}

/// Metric values and their classification for one raster
#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    /// Mean luma, 0..=255
    pub brightness: f32,
    /// Mean absolute luma step between consecutive pixels in raster order
    pub sharpness: f32,
    /// |mean luma inside framing circle - global mean luma|
    pub framing_deviation: f32,
    pub brightness_status: Status,
    pub sharpness_status: Status,
    pub framing_status: Status,
}

/// Rec.601 luma. Integer weights keep gray pixels exact (luma(v,v,v) == v).
#[inline]
pub fn luma(px: &Rgb<u8>) -> f32 {
    let weighted = 299 * px[0] as u32 + 587 * px[1] as u32 + 114 * px[2] as u32;
    weighted as f32 / 1000.0
}

pub fn classify_brightness(brightness: f32, t: &QualityThresholds) -> Status {
    if brightness < t.brightness_error_below {
        Status::Error
    } else if brightness < t.brightness_good_from {
        Status::Warning
    } else if brightness >= t.brightness_error_from {
        Status::Error
    } else if brightness > t.brightness_good_until {
        Status::Warning
    } else {
        Status::Good
    }
}

pub fn classify_sharpness(sharpness: f32, t: &QualityThresholds) -> Status {
    if sharpness < t.sharpness_error_below {
        Status::Error
    } else if sharpness > t.sharpness_good_above {
        Status::Good
    } else {
        Status::Warning
    }
}

pub fn classify_framing(deviation: f32, t: &QualityThresholds) -> Status {
    if deviation > t.framing_max_deviation {
        Status::Warning
    } else {
        Status::Good
    }
}

/// Analyze a raster. Single pass over the pixels.
pub fn analyze(raster: &RgbImage, t: &QualityThresholds) -> QualityReport {
    let (width, height) = raster.dimensions();
    let pixel_count = width as u64 * height as u64;

    let (brightness, sharpness, framing_deviation) = if pixel_count == 0 {
        (0.0, 0.0, 0.0)
    } else {
        let cx = width as f32 / 2.0;
        let cy = height as f32 / 2.0;
        let radius = width.min(height) as f32 * t.framing_radius_ratio;
        let radius_sq = radius * radius;

        let mut total = 0.0f64;
        let mut step_total = 0.0f64;
        let mut center_total = 0.0f64;
        let mut center_count = 0u64;
        let mut prev: Option<f32> = None;

        for (x, y, px) in raster.enumerate_pixels() {
            let l = luma(px);
            total += l as f64;

            if let Some(p) = prev {
                step_total += (l - p).abs() as f64;
            }
            prev = Some(l);

            let dx = x as f32 + 0.5 - cx;
            let dy = y as f32 + 0.5 - cy;
            if dx * dx + dy * dy <= radius_sq {
                center_total += l as f64;
                center_count += 1;
            }
        }

        let mean = total / pixel_count as f64;
        let sharpness = if pixel_count > 1 {
            step_total / (pixel_count - 1) as f64
        } else {
            0.0
        };
        let deviation = if center_count > 0 {
            (center_total / center_count as f64 - mean).abs()
        } else {
            0.0
        };
        (mean as f32, sharpness as f32, deviation as f32)
    };

    QualityReport {
        brightness,
        sharpness,
        framing_deviation,
        brightness_status: classify_brightness(brightness, t),
        sharpness_status: classify_sharpness(sharpness, t),
        framing_status: classify_framing(framing_deviation, t),
    }
}
