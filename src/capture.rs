//! Still capture pipeline
//!
//! Digital zoom as a centered crop, fixed-point bilinear rescale back to the
//! output size, multiplicative exposure gain, JPEG encode. Deterministic: the
//! same frame and settings always produce the same bytes.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageResult, RgbImage};

use crate::config::CaptureConfig;

pub const JPEG_MIME: &str = "image/jpeg";

/// Finished still handed back to the caller
#[derive(Debug, Clone)]
pub struct CaptureArtifact {
    pub image_bytes: Bytes,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub pose_id: String,
    pub captured_at: DateTime<Utc>,
    pub zoom: f32,
    pub exposure_bias: f32,
    /// Readiness score when the still was taken
    pub score: u8,
}

impl CaptureArtifact {
    pub fn extension(&self) -> &'static str {
        "jpg"
    }

    /// `{pose_id}-{unix_millis}.jpg`
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}.{}",
            self.pose_id,
            self.captured_at.timestamp_millis(),
            self.extension()
        )
    }
}

/// Multiplier applied per channel for an exposure bias
pub fn exposure_gain(bias: f32, gain_per_stop: f32) -> f32 {
    1.0 + bias * gain_per_stop
}

/// Centered crop covering `1/zoom` of each dimension. Zoom <= 1 copies the frame.
pub fn center_crop(frame: &RgbImage, zoom: f32) -> RgbImage {
    let (width, height) = frame.dimensions();
    if zoom <= 1.0 || width == 0 || height == 0 {
        return frame.clone();
    }
    let crop_w = ((width as f32 / zoom).round() as u32).clamp(1, width);
    let crop_h = ((height as f32 / zoom).round() as u32).clamp(1, height);
    let x0 = (width - crop_w) / 2;
    let y0 = (height - crop_h) / 2;
    image::imageops::crop_imm(frame, x0, y0, crop_w, crop_h).to_image()
}

/// Bilinear resize with 16-bit fixed-point weights
pub fn scale_bilinear(src: &RgbImage, dst_w: u32, dst_h: u32) -> RgbImage {
    let (src_w, src_h) = (src.width() as u64, src.height() as u64);
    let mut out = RgbImage::new(dst_w, dst_h);
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return out;
    }

    let x_ratio = if dst_w > 1 { ((src_w - 1) << 16) / (dst_w as u64 - 1) } else { 0 };
    let y_ratio = if dst_h > 1 { ((src_h - 1) << 16) / (dst_h as u64 - 1) } else { 0 };

    for dst_y in 0..dst_h {
        let src_y_fp = dst_y as u64 * y_ratio;
        let src_y0 = (src_y_fp >> 16) as u32;
        let src_y1 = (src_y0 + 1).min(src_h as u32 - 1);
        let y_frac = src_y_fp & 0xFFFF;
        let y_inv = 0x10000 - y_frac;

        for dst_x in 0..dst_w {
            let src_x_fp = dst_x as u64 * x_ratio;
            let src_x0 = (src_x_fp >> 16) as u32;
            let src_x1 = (src_x0 + 1).min(src_w as u32 - 1);
            let x_frac = src_x_fp & 0xFFFF;
            let x_inv = 0x10000 - x_frac;

            let p00 = src.get_pixel(src_x0, src_y0);
            let p01 = src.get_pixel(src_x1, src_y0);
            let p10 = src.get_pixel(src_x0, src_y1);
            let p11 = src.get_pixel(src_x1, src_y1);

            let px = out.get_pixel_mut(dst_x, dst_y);
            for c in 0..3 {
                let top = (p00[c] as u64 * x_inv + p01[c] as u64 * x_frac) >> 16;
                let bot = (p10[c] as u64 * x_inv + p11[c] as u64 * x_frac) >> 16;
                px[c] = ((top * y_inv + bot * y_frac) >> 16) as u8;
            }
        }
    }
    out
}

/// Multiply every channel by `gain`, clamped to 0..=255
pub fn apply_gain(img: &mut RgbImage, gain: f32) {
    if gain == 1.0 {
        return;
    }
    for value in img.iter_mut() {
        *value = (*value as f32 * gain).round().clamp(0.0, 255.0) as u8;
    }
}

/// Apply zoom and exposure to a full-resolution frame
pub fn render_still(frame: &RgbImage, zoom: f32, exposure_bias: f32, config: &CaptureConfig) -> RgbImage {
    let (out_w, out_h) = config.output_size.unwrap_or_else(|| frame.dimensions());

    let mut still = if zoom > 1.0 {
        scale_bilinear(&center_crop(frame, zoom), out_w, out_h)
    } else if (out_w, out_h) != frame.dimensions() {
        scale_bilinear(frame, out_w, out_h)
    } else {
        frame.clone()
    };

    if exposure_bias != 0.0 {
        apply_gain(&mut still, exposure_gain(exposure_bias, config.exposure_gain_per_stop));
    }
    still
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut buffer = Vec::with_capacity(img.len() / 4);
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder.encode(
        img.as_raw(),
        img.width(),
        img.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn test_zoom_is_center_crop_then_scale() {
        let frame = gradient(120, 90);
        let config = CaptureConfig::default();

        let still = render_still(&frame, 1.5, 0.0, &config);
        let manual = scale_bilinear(
            &image::imageops::crop_imm(&frame, 20, 15, 80, 60).to_image(),
            120,
            90,
        );
        assert_eq!(still.dimensions(), (120, 90));
        assert_eq!(still.as_raw(), manual.as_raw());

        let a = encode_jpeg(&still, config.jpeg_quality).unwrap();
        let b = encode_jpeg(&render_still(&frame, 1.5, 0.0, &config), config.jpeg_quality).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_center_crop_geometry() {
        let frame = gradient(100, 80);
        let crop = center_crop(&frame, 2.0);
        assert_eq!(crop.dimensions(), (50, 40));
        assert_eq!(crop.get_pixel(0, 0), frame.get_pixel(25, 20));
        assert_eq!(center_crop(&frame, 1.0).as_raw(), frame.as_raw());
    }

    #[test]
    fn test_scale_identity_and_corners() {
        let frame = gradient(33, 17);
        assert_eq!(scale_bilinear(&frame, 33, 17).as_raw(), frame.as_raw());

        let up = scale_bilinear(&frame, 66, 34);
        assert_eq!(up.dimensions(), (66, 34));
        assert_eq!(up.get_pixel(0, 0), frame.get_pixel(0, 0));
    }

    #[test]
    fn test_exposure_gain_clamps() {
        let frame = RgbImage::from_pixel(4, 4, Rgb([100, 200, 10]));
        let brighter = render_still(&frame, 1.0, 1.0, &CaptureConfig::default());
        assert_eq!(*brighter.get_pixel(0, 0), Rgb([130, 255, 13]));

        let darker = render_still(&frame, 1.0, -2.0, &CaptureConfig::default());
        assert_eq!(*darker.get_pixel(0, 0), Rgb([40, 80, 4]));
    }

    #[test]
    fn test_output_size_override() {
        let config = CaptureConfig {
            output_size: Some((30, 40)),
            ..CaptureConfig::default()
        };
        let still = render_still(&gradient(60, 80), 1.0, 0.0, &config);
        assert_eq!(still.dimensions(), (30, 40));
    }

    #[test]
    fn test_encoded_jpeg_decodes() {
        let bytes = encode_jpeg(&gradient(64, 48), 92).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_file_name() {
        let artifact = CaptureArtifact {
            image_bytes: Bytes::new(),
            mime_type: JPEG_MIME,
            width: 1,
            height: 1,
            pose_id: "glabellar".into(),
            captured_at: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
            zoom: 1.0,
            exposure_bias: 0.0,
            score: 0,
        };
        assert_eq!(artifact.file_name(), "glabellar-1700000000123.jpg");
    }
}
