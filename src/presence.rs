//! Subject-presence heuristic
//!
//! Counts skin-like pixels on a sparse grid inside an upper-center circle,
//! roughly where a face sits when the operator follows the guide. This is a
//! fraction-of-region threshold test, not a detector.

use image::{Rgb, RgbImage};

use crate::config::PresenceConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresenceReport {
    pub sampled: u32,
    pub skin_like: u32,
    pub present: bool,
}

impl PresenceReport {
    pub fn fraction(&self) -> f32 {
        if self.sampled == 0 {
            0.0
        } else {
            self.skin_like as f32 / self.sampled as f32
        }
    }
}

pub fn is_skin_like(px: &Rgb<u8>, config: &PresenceConfig) -> bool {
    let [r, g, b] = px.0;
    let [min_r, min_g, min_b] = config.min_rgb;
    if r <= min_r || g <= min_g || b <= min_b {
        return false;
    }
    let (r, g, b) = (r as i32, g as i32, b as i32);
    r > g && g > b && r - b > config.min_red_blue_spread && (r - g).abs() > config.min_red_green_spread
}

/// Center and radius of the region of interest for a raster of this size
pub fn region_of_interest(width: u32, height: u32, config: &PresenceConfig) -> (f32, f32, f32) {
    let cx = width as f32 / 2.0;
    let cy = height as f32 * config.center_y_ratio;
    let radius = width.min(height) as f32 * config.radius_ratio;
    (cx, cy, radius)
}

pub fn detect(raster: &RgbImage, config: &PresenceConfig) -> PresenceReport {
    let (width, height) = raster.dimensions();
    let (cx, cy, radius) = region_of_interest(width, height, config);
    let radius_sq = radius * radius;
    let stride = config.stride.max(1) as usize;

    let y_start = (cy - radius).floor().max(0.0) as u32;
    let y_end = ((cy + radius).ceil() as u32).min(height);
    let x_start = (cx - radius).floor().max(0.0) as u32;
    let x_end = ((cx + radius).ceil() as u32).min(width);

    let mut sampled = 0u32;
    let mut skin_like = 0u32;

    for y in (y_start..y_end).step_by(stride) {
        for x in (x_start..x_end).step_by(stride) {
            let dx = x as f32 + 0.5 - cx;
            let dy = y as f32 + 0.5 - cy;
            if dx * dx + dy * dy > radius_sq {
                continue;
            }
            sampled += 1;
            if is_skin_like(raster.get_pixel(x, y), config) {
                skin_like += 1;
            }
        }
    }

    let mut report = PresenceReport {
        sampled,
        skin_like,
        present: false,
    };
    report.present = sampled > 0 && report.fraction() > config.min_fraction;
    report
}
