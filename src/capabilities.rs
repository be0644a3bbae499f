//! Hardware capability negotiation
//!
//! Picks, per device, how zoom and exposure requests are honored: natively
//! when the device exposes the control, otherwise through a fallback. Control
//! writes are best-effort; failures are logged and the clamped value stands.

use crate::config::HardwareDefaults;
use crate::device::{CameraDevice, CapabilityRange, Control, DeviceCapabilities};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoomStrategy {
    /// Device zoom control, clamped to its range
    Native(CapabilityRange),
    /// No zoom control; applied as a center crop at capture time
    Digital(CapabilityRange),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExposureStrategy {
    /// Device exposure compensation, clamped to its range
    Native(CapabilityRange),
    /// Bias remapped onto the device brightness control
    BrightnessFilter {
        bias: CapabilityRange,
        brightness: CapabilityRange,
    },
    /// Nothing to drive; only the preview hint and capture gain apply
    PreviewOnly(CapabilityRange),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Negotiator {
    pub zoom: ZoomStrategy,
    pub exposure: ExposureStrategy,
}

impl Negotiator {
    pub fn from_capabilities(caps: &DeviceCapabilities, defaults: &HardwareDefaults) -> Self {
        let default_zoom = CapabilityRange::new(defaults.zoom_min, defaults.zoom_max);
        let default_bias = CapabilityRange::new(defaults.exposure_min, defaults.exposure_max);

        let zoom = match caps.zoom {
            Some(range) => ZoomStrategy::Native(range),
            None => ZoomStrategy::Digital(default_zoom),
        };
        let exposure = match (caps.exposure_compensation, caps.brightness) {
            (Some(range), _) => ExposureStrategy::Native(range),
            (None, Some(brightness)) => ExposureStrategy::BrightnessFilter {
                bias: default_bias,
                brightness,
            },
            (None, None) => ExposureStrategy::PreviewOnly(default_bias),
        };
        Self { zoom, exposure }
    }

    /// Query the device and pick strategies. A failed query falls back to
    /// the all-software strategies.
    pub fn negotiate(device: &mut dyn CameraDevice, defaults: &HardwareDefaults) -> Self {
        let caps = match device.capabilities() {
            Ok(caps) => caps,
            Err(e) => {
                tracing::warn!("Capability query failed, using software fallbacks: {}", e);
                DeviceCapabilities::default()
            }
        };
        Self::from_capabilities(&caps, defaults)
    }

    pub fn zoom_range(&self) -> CapabilityRange {
        match self.zoom {
            ZoomStrategy::Native(range) | ZoomStrategy::Digital(range) => range,
        }
    }

    pub fn exposure_range(&self) -> CapabilityRange {
        match self.exposure {
            ExposureStrategy::Native(range) | ExposureStrategy::PreviewOnly(range) => range,
            ExposureStrategy::BrightnessFilter { bias, .. } => bias,
        }
    }

    /// Clamp and apply a zoom request, returning the effective zoom. A
    /// non-finite request resets to no magnification.
    pub fn apply_zoom(&self, device: &mut dyn CameraDevice, requested: f32) -> f32 {
        let effective = if requested.is_finite() {
            self.zoom_range().clamp(requested)
        } else {
            tracing::warn!("Ignoring non-finite zoom request {}", requested);
            self.zoom_range().clamp(1.0)
        };
        if requested.is_finite() && effective != requested {
            tracing::debug!("Zoom {} clamped to {}", requested, effective);
        }
        if let ZoomStrategy::Native(_) = self.zoom {
            if let Err(e) = device.set_control(Control::Zoom, effective) {
                tracing::warn!("Failed to apply zoom {}: {}", effective, e);
            }
        }
        effective
    }

    /// Clamp and apply an exposure bias, returning the effective bias. A
    /// non-finite request resets to a neutral bias.
    pub fn apply_exposure(&self, device: &mut dyn CameraDevice, requested: f32) -> f32 {
        let effective = if requested.is_finite() {
            self.exposure_range().clamp(requested)
        } else {
            tracing::warn!("Ignoring non-finite exposure request {}", requested);
            self.exposure_range().clamp(0.0)
        };
        let result = match self.exposure {
            ExposureStrategy::Native(_) => {
                device.set_control(Control::ExposureCompensation, effective)
            }
            ExposureStrategy::BrightnessFilter { bias, brightness } => device.set_control(
                Control::Brightness,
                remap_to_brightness(effective, bias, brightness),
            ),
            ExposureStrategy::PreviewOnly(_) => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!("Failed to apply exposure {}: {}", effective, e);
        }
        effective
    }

    /// Zoom left for the capture transform: the full request when zoom is
    /// digital, none when the device already magnified optically
    pub fn software_zoom(&self, zoom: f32) -> f32 {
        match self.zoom {
            ZoomStrategy::Digital(_) => zoom,
            ZoomStrategy::Native(_) => 1.0,
        }
    }

    /// Exposure bias left for the capture gain. Devices that took the bias
    /// through a control already deliver the adjusted frame.
    pub fn software_exposure(&self, bias: f32) -> f32 {
        match self.exposure {
            ExposureStrategy::PreviewOnly(_) => bias,
            ExposureStrategy::Native(_) | ExposureStrategy::BrightnessFilter { .. } => 0.0,
        }
    }
}

/// Linear map of an exposure bias onto a brightness range
pub fn remap_to_brightness(bias: f32, bias_range: CapabilityRange, brightness: CapabilityRange) -> f32 {
    let span = bias_range.max - bias_range.min;
    let t = if span > 0.0 {
        ((bias - bias_range.min) / span).clamp(0.0, 1.0)
    } else {
        0.5
    };
    brightness.min + t * (brightness.max - brightness.min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::synthetic::SyntheticProvider;
    use crate::device::{DeviceProvider, DeviceRequest, Facing};

    fn request() -> DeviceRequest {
        DeviceRequest {
            facing: Facing::Back,
            ideal_width: 1080,
            ideal_height: 1440,
        }
    }

    #[test]
    fn test_software_fallbacks_without_capabilities() {
        let negotiator =
            Negotiator::from_capabilities(&DeviceCapabilities::default(), &HardwareDefaults::default());
        assert_eq!(negotiator.zoom, ZoomStrategy::Digital(CapabilityRange::new(1.0, 3.0)));
        assert_eq!(
            negotiator.exposure,
            ExposureStrategy::PreviewOnly(CapabilityRange::new(-2.0, 2.0))
        );
    }

    #[test]
    fn test_zoom_clamps_to_default_max() {
        let provider = SyntheticProvider::new();
        let mut device = provider.acquire(&request()).unwrap();
        let negotiator = Negotiator::negotiate(device.as_mut(), &HardwareDefaults::default());
        assert_eq!(negotiator.apply_zoom(device.as_mut(), 10.0), 3.0);
        assert_eq!(negotiator.apply_zoom(device.as_mut(), 0.5), 1.0);
        assert!(provider.stats().controls().is_empty());
    }

    #[test]
    fn test_zoom_clamps_to_device_max() {
        let provider = SyntheticProvider::new().with_capabilities(DeviceCapabilities {
            zoom: Some(CapabilityRange::new(1.0, 5.0)),
            ..Default::default()
        });
        let mut device = provider.acquire(&request()).unwrap();
        let negotiator = Negotiator::negotiate(device.as_mut(), &HardwareDefaults::default());
        assert_eq!(negotiator.apply_zoom(device.as_mut(), 10.0), 5.0);
        assert_eq!(provider.stats().controls(), vec![(Control::Zoom, 5.0)]);
    }

    #[test]
    fn test_exposure_falls_back_to_brightness() {
        let provider = SyntheticProvider::new().with_capabilities(DeviceCapabilities {
            brightness: Some(CapabilityRange::new(-64.0, 64.0)),
            ..Default::default()
        });
        let mut device = provider.acquire(&request()).unwrap();
        let negotiator = Negotiator::negotiate(device.as_mut(), &HardwareDefaults::default());
        assert!(matches!(negotiator.exposure, ExposureStrategy::BrightnessFilter { .. }));

        assert_eq!(negotiator.apply_exposure(device.as_mut(), 1.0), 1.0);
        assert_eq!(negotiator.apply_exposure(device.as_mut(), -5.0), -2.0);
        assert_eq!(
            provider.stats().controls(),
            vec![(Control::Brightness, 32.0), (Control::Brightness, -64.0)]
        );
    }

    #[test]
    fn test_native_exposure_preferred_over_brightness() {
        let caps = DeviceCapabilities {
            exposure_compensation: Some(CapabilityRange::new(-1.0, 1.0)),
            brightness: Some(CapabilityRange::new(0.0, 255.0)),
            ..Default::default()
        };
        let negotiator = Negotiator::from_capabilities(&caps, &HardwareDefaults::default());
        assert_eq!(negotiator.exposure, ExposureStrategy::Native(CapabilityRange::new(-1.0, 1.0)));
        assert_eq!(negotiator.exposure_range().clamp(2.0), 1.0);
    }

    #[test]
    fn test_rejected_controls_are_not_fatal() {
        let provider = SyntheticProvider::new()
            .with_capabilities(DeviceCapabilities {
                zoom: Some(CapabilityRange::new(1.0, 2.0)),
                exposure_compensation: Some(CapabilityRange::new(-2.0, 2.0)),
                ..Default::default()
            })
            .with_failing_controls();
        let mut device = provider.acquire(&request()).unwrap();
        let negotiator = Negotiator::negotiate(device.as_mut(), &HardwareDefaults::default());
        assert_eq!(negotiator.apply_zoom(device.as_mut(), 1.5), 1.5);
        assert_eq!(negotiator.apply_exposure(device.as_mut(), -1.0), -1.0);
    }

    #[test]
    fn test_non_finite_requests_fall_back() {
        let provider = SyntheticProvider::new().with_capabilities(DeviceCapabilities {
            zoom: Some(CapabilityRange::new(1.0, 4.0)),
            exposure_compensation: Some(CapabilityRange::new(-3.0, 3.0)),
            ..Default::default()
        });
        let mut device = provider.acquire(&request()).unwrap();
        let negotiator = Negotiator::negotiate(device.as_mut(), &HardwareDefaults::default());

        assert_eq!(negotiator.apply_zoom(device.as_mut(), f32::NAN), 1.0);
        assert_eq!(negotiator.apply_zoom(device.as_mut(), f32::INFINITY), 1.0);
        assert_eq!(negotiator.apply_exposure(device.as_mut(), f32::NAN), 0.0);
        assert_eq!(negotiator.apply_exposure(device.as_mut(), f32::NEG_INFINITY), 0.0);
        assert!(provider.stats().controls().iter().all(|(_, v)| v.is_finite()));
    }

    #[test]
    fn test_software_share_follows_strategy() {
        let digital =
            Negotiator::from_capabilities(&DeviceCapabilities::default(), &HardwareDefaults::default());
        assert_eq!(digital.software_zoom(2.0), 2.0);
        assert_eq!(digital.software_exposure(-1.0), -1.0);

        let native = Negotiator::from_capabilities(
            &DeviceCapabilities {
                zoom: Some(CapabilityRange::new(1.0, 3.0)),
                brightness: Some(CapabilityRange::new(0.0, 255.0)),
                ..Default::default()
            },
            &HardwareDefaults::default(),
        );
        assert_eq!(native.software_zoom(2.0), 1.0);
        assert_eq!(native.software_exposure(-1.0), 0.0);
    }

    #[test]
    fn test_remap_midpoint() {
        let bias = CapabilityRange::new(-2.0, 2.0);
        let brightness = CapabilityRange::new(0.0, 255.0);
        assert_eq!(remap_to_brightness(0.0, bias, brightness), 127.5);
        assert_eq!(remap_to_brightness(2.0, bias, brightness), 255.0);
    }
}
