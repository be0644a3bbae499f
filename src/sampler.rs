//! Frame sampler
//!
//! Downscales the latest live frame into a reused analysis buffer, and runs
//! the periodic sampling task for a live session.

use image::RgbImage;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SamplerConfig;

/// Analysis raster size for a source frame: `downscale` applied, then fitted
/// inside max_long_side x max_short_side with aspect preserved
pub fn sample_size(width: u32, height: u32, config: &SamplerConfig) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (0, 0);
    }
    let w = (width as f32 * config.downscale).round().max(1.0);
    let h = (height as f32 * config.downscale).round().max(1.0);

    let landscape = w >= h;
    let (long, short) = if landscape { (w, h) } else { (h, w) };
    let max_long = config.max_long_side as f32;
    let max_short = config.max_short_side as f32;
    let fit = (max_long / long).min(max_short / short).min(1.0);

    let long = (long * fit).round().clamp(1.0, max_long.max(1.0)) as u32;
    let short = (short * fit).round().clamp(1.0, max_short.max(1.0)) as u32;
    if landscape {
        (long, short)
    } else {
        (short, long)
    }
}

pub struct FrameSampler {
    config: SamplerConfig,
    buffer: RgbImage,
}

impl FrameSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            buffer: RgbImage::new(0, 0),
        }
    }

    /// Nearest-neighbour downscale of `frame` into the reused buffer
    pub fn sample(&mut self, frame: &RgbImage) -> &RgbImage {
        let (src_w, src_h) = frame.dimensions();
        let (dst_w, dst_h) = sample_size(src_w, src_h, &self.config);

        if self.buffer.dimensions() != (dst_w, dst_h) {
            self.buffer = RgbImage::new(dst_w, dst_h);
        }

        for y in 0..dst_h {
            let src_y = (y as u64 * src_h as u64 / dst_h as u64) as u32;
            for x in 0..dst_w {
                let src_x = (x as u64 * src_w as u64 / dst_w as u64) as u32;
                self.buffer.put_pixel(x, y, *frame.get_pixel(src_x, src_y));
            }
        }
        &self.buffer
    }
}

/// Run `tick` every `interval` until cancelled. Ticks missed because a
/// pass overran are dropped rather than queued.
pub async fn sampling_loop<F>(interval: Duration, cancel: CancellationToken, mut tick: F)
where
    F: FnMut() + Send,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => tick(),
            _ = cancel.cancelled() => {
                tracing::debug!("Sampling loop stopped");
                break;
            }
        }
    }
}
