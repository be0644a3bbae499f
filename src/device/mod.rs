//! Camera device abstraction
//!
//! A `DeviceProvider` hands out at most one live `CameraDevice` per request.
//! Backends report the controls they support; the capability negotiator
//! decides how requested zoom/exposure values reach the hardware.

pub mod synthetic;
pub mod v4l2;

use image::RgbImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
}

impl Facing {
    pub fn opposite(self) -> Self {
        match self {
            Facing::Front => Facing::Back,
            Facing::Back => Facing::Front,
        }
    }
}

/// Latest-frame slot shared between a frame producer and the device that
/// serves it
#[derive(Clone, Default)]
pub struct FrameSlot(Arc<Mutex<Option<RgbImage>>>);

impl FrameSlot {
    pub fn feed(&self, frame: RgbImage) {
        *self.0.lock() = Some(frame);
    }

    pub fn clear(&self) {
        *self.0.lock() = None;
    }

    pub(crate) fn latest(&self) -> Option<RgbImage> {
        self.0.lock().clone()
    }
}

/// Supported value range of a device control
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapabilityRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl CapabilityRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max, step: 0.0 }
    }

    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min.min(self.max), self.max.max(self.min))
    }
}

/// Controls a device reports. `None` means the control is absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceCapabilities {
    /// Optical/sensor zoom as a magnification factor
    pub zoom: Option<CapabilityRange>,
    /// Exposure compensation in stops
    pub exposure_compensation: Option<CapabilityRange>,
    /// Image brightness in device units
    pub brightness: Option<CapabilityRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Zoom,
    ExposureCompensation,
    Brightness,
}

/// What the session asks a provider for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRequest {
    pub facing: Facing,
    pub ideal_width: u32,
    pub ideal_height: u32,
}

/// A live video source
pub trait CameraDevice: Send {
    fn facing(&self) -> Facing;

    /// Query the supported control ranges
    fn capabilities(&mut self) -> Result<DeviceCapabilities, DeviceError>;

    fn set_control(&mut self, control: Control, value: f32) -> Result<(), DeviceError>;

    /// Most recent full-resolution frame. `Ok(None)` while the sensor warms up.
    fn latest_frame(&mut self) -> Result<Option<RgbImage>, DeviceError>;

    /// Release the hardware. Calling more than once is a no-op.
    fn stop(&mut self);
}

pub trait DeviceProvider: Send + Sync {
    fn acquire(&self, request: &DeviceRequest) -> Result<Box<dyn CameraDevice>, DeviceError>;
}
