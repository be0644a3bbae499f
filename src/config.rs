//! Tunable thresholds and defaults for the capture engine
//!
//! Every heuristic constant lives here so scoring behavior can be retuned
//! without touching the analysis code. `EngineConfig` can be loaded from TOML;
//! missing keys fall back to the constants below.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// Frame sampler
pub const SAMPLE_INTERVAL_MS: u64 = 500;
pub const SAMPLE_DOWNSCALE: f32 = 0.25;
pub const SAMPLE_MAX_LONG_SIDE: u32 = 320;
pub const SAMPLE_MAX_SHORT_SIDE: u32 = 240;

// Brightness bands (mean luma)
pub const BRIGHTNESS_ERROR_BELOW: f32 = 50.0;
pub const BRIGHTNESS_GOOD_FROM: f32 = 80.0;
pub const BRIGHTNESS_GOOD_UNTIL: f32 = 190.0;
pub const BRIGHTNESS_ERROR_FROM: f32 = 220.0;

// Sharpness proxy bands (mean absolute luma step)
pub const SHARPNESS_ERROR_BELOW: f32 = 5.0;
pub const SHARPNESS_GOOD_ABOVE: f32 = 10.0;

// Framing
pub const FRAMING_RADIUS_RATIO: f32 = 0.35;
pub const FRAMING_MAX_DEVIATION: f32 = 50.0;

// Subject presence
pub const PRESENCE_CENTER_Y_RATIO: f32 = 0.40;
pub const PRESENCE_RADIUS_RATIO: f32 = 0.25;
pub const PRESENCE_SAMPLE_STRIDE: u32 = 2;
pub const PRESENCE_MIN_FRACTION: f32 = 0.20;
pub const SKIN_MIN_RED_BLUE_SPREAD: i32 = 15;
pub const SKIN_MIN_RED_GREEN_SPREAD: i32 = 10;
pub const SKIN_MIN_R: u8 = 60;
pub const SKIN_MIN_G: u8 = 30;
pub const SKIN_MIN_B: u8 = 15;

// Readiness score weights
pub const BRIGHTNESS_POINTS: ScorePoints = ScorePoints { good: 30, warning: 15 };
pub const SHARPNESS_POINTS: ScorePoints = ScorePoints { good: 30, warning: 15 };
pub const FRAMING_POINTS: ScorePoints = ScorePoints { good: 20, warning: 10 };
pub const PRESENCE_POINTS: u8 = 20;
pub const CAPTURE_THRESHOLD: u8 = 50;

// Hardware defaults used when the device reports no range
pub const ZOOM_MIN: f32 = 1.0;
pub const ZOOM_MAX: f32 = 3.0;
pub const EXPOSURE_MIN: f32 = -2.0;
pub const EXPOSURE_MAX: f32 = 2.0;

// Still capture
pub const EXPOSURE_GAIN_PER_STOP: f32 = 0.3;
pub const JPEG_QUALITY: u8 = 92;
pub const IDEAL_WIDTH: u32 = 1080;
pub const IDEAL_HEIGHT: u32 = 1440;

/// Points awarded for a Good / Warning status. Error is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScorePoints {
    pub good: u8,
    pub warning: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub interval_ms: u64,
    pub downscale: f32,
    pub max_long_side: u32,
    pub max_short_side: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: SAMPLE_INTERVAL_MS,
            downscale: SAMPLE_DOWNSCALE,
            max_long_side: SAMPLE_MAX_LONG_SIDE,
            max_short_side: SAMPLE_MAX_SHORT_SIDE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub brightness_error_below: f32,
    pub brightness_good_from: f32,
    pub brightness_good_until: f32,
    pub brightness_error_from: f32,
    pub sharpness_error_below: f32,
    pub sharpness_good_above: f32,
    /// Radius of the centered framing circle as a fraction of min(width, height)
    pub framing_radius_ratio: f32,
    pub framing_max_deviation: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            brightness_error_below: BRIGHTNESS_ERROR_BELOW,
            brightness_good_from: BRIGHTNESS_GOOD_FROM,
            brightness_good_until: BRIGHTNESS_GOOD_UNTIL,
            brightness_error_from: BRIGHTNESS_ERROR_FROM,
            sharpness_error_below: SHARPNESS_ERROR_BELOW,
            sharpness_good_above: SHARPNESS_GOOD_ABOVE,
            framing_radius_ratio: FRAMING_RADIUS_RATIO,
            framing_max_deviation: FRAMING_MAX_DEVIATION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub center_y_ratio: f32,
    pub radius_ratio: f32,
    pub stride: u32,
    pub min_fraction: f32,
    pub min_red_blue_spread: i32,
    pub min_red_green_spread: i32,
    pub min_rgb: [u8; 3],
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            center_y_ratio: PRESENCE_CENTER_Y_RATIO,
            radius_ratio: PRESENCE_RADIUS_RATIO,
            stride: PRESENCE_SAMPLE_STRIDE,
            min_fraction: PRESENCE_MIN_FRACTION,
            min_red_blue_spread: SKIN_MIN_RED_BLUE_SPREAD,
            min_red_green_spread: SKIN_MIN_RED_GREEN_SPREAD,
            min_rgb: [SKIN_MIN_R, SKIN_MIN_G, SKIN_MIN_B],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub brightness: ScorePoints,
    pub sharpness: ScorePoints,
    pub framing: ScorePoints,
    pub presence: u8,
    pub capture_threshold: u8,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            brightness: BRIGHTNESS_POINTS,
            sharpness: SHARPNESS_POINTS,
            framing: FRAMING_POINTS,
            presence: PRESENCE_POINTS,
            capture_threshold: CAPTURE_THRESHOLD,
        }
    }
}

/// Parameter ranges assumed when a device does not report its own
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareDefaults {
    pub zoom_min: f32,
    pub zoom_max: f32,
    pub exposure_min: f32,
    pub exposure_max: f32,
}

impl Default for HardwareDefaults {
    fn default() -> Self {
        Self {
            zoom_min: ZOOM_MIN,
            zoom_max: ZOOM_MAX,
            exposure_min: EXPOSURE_MIN,
            exposure_max: EXPOSURE_MAX,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub ideal_width: u32,
    pub ideal_height: u32,
    /// Output size of the still; `None` keeps the source frame size
    pub output_size: Option<(u32, u32)>,
    pub exposure_gain_per_stop: f32,
    pub jpeg_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ideal_width: IDEAL_WIDTH,
            ideal_height: IDEAL_HEIGHT,
            output_size: None,
            exposure_gain_per_stop: EXPOSURE_GAIN_PER_STOP,
            jpeg_quality: JPEG_QUALITY,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sampler: SamplerConfig,
    pub quality: QualityThresholds,
    pub presence: PresenceConfig,
    pub scoring: ScoreWeights,
    pub hardware: HardwareDefaults,
    pub capture: CaptureConfig,
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse engine config")
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [sampler]
            interval_ms = 250

            [scoring]
            capture_threshold = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.sampler.interval_ms, 250);
        assert_eq!(config.sampler.downscale, SAMPLE_DOWNSCALE);
        assert_eq!(config.scoring.capture_threshold, 60);
        assert_eq!(config.scoring.brightness, BRIGHTNESS_POINTS);
        assert_eq!(config.capture.jpeg_quality, JPEG_QUALITY);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.quality.brightness_error_from, BRIGHTNESS_ERROR_FROM);
        assert_eq!(config.hardware.zoom_max, ZOOM_MAX);
        assert!(config.capture.output_size.is_none());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(EngineConfig::from_toml_str("sampler = 3").is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = EngineConfig::from_toml_file("/nonexistent/guided_capture.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
