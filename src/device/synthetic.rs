//! In-process camera backed by a caller-fed frame slot
//!
//! Used by the test suite and by the preview server's `--synthetic` mode.
//! Tracks acquisitions and releases so handle leaks are observable.

use image::RgbImage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{
    CameraDevice, Control, DeviceCapabilities, DeviceProvider, DeviceRequest, Facing, FrameSlot,
};
use crate::error::DeviceError;

#[derive(Default)]
pub struct DeviceStats {
    acquired: AtomicUsize,
    released: AtomicUsize,
    facings: Mutex<Vec<Facing>>,
    controls: Mutex<Vec<(Control, f32)>>,
}

impl DeviceStats {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Devices currently held open
    pub fn open(&self) -> usize {
        self.acquired() - self.released()
    }

    pub fn facings(&self) -> Vec<Facing> {
        self.facings.lock().clone()
    }

    /// Every control write that reached the device, in order
    pub fn controls(&self) -> Vec<(Control, f32)> {
        self.controls.lock().clone()
    }
}

pub struct SyntheticProvider {
    slot: FrameSlot,
    capabilities: DeviceCapabilities,
    failing_controls: bool,
    pending_failures: Mutex<VecDeque<DeviceError>>,
    stats: Arc<DeviceStats>,
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self {
            slot: FrameSlot::default(),
            capabilities: DeviceCapabilities::default(),
            failing_controls: false,
            pending_failures: Mutex::new(VecDeque::new()),
            stats: Arc::new(DeviceStats::default()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Every `set_control` call fails, as on a driver that rejects constraints
    pub fn with_failing_controls(mut self) -> Self {
        self.failing_controls = true;
        self
    }

    /// Queue an error for the next `acquire` call
    pub fn fail_next_acquire(&self, err: DeviceError) {
        self.pending_failures.lock().push_back(err);
    }

    pub fn frame_slot(&self) -> FrameSlot {
        self.slot.clone()
    }

    pub fn stats(&self) -> Arc<DeviceStats> {
        self.stats.clone()
    }
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for SyntheticProvider {
    fn acquire(&self, request: &DeviceRequest) -> Result<Box<dyn CameraDevice>, DeviceError> {
        if let Some(err) = self.pending_failures.lock().pop_front() {
            return Err(err);
        }

        self.stats.acquired.fetch_add(1, Ordering::SeqCst);
        self.stats.facings.lock().push(request.facing);
        tracing::debug!(
            "Synthetic camera acquired ({:?}, {}x{} hint)",
            request.facing,
            request.ideal_width,
            request.ideal_height
        );

        Ok(Box::new(SyntheticDevice {
            facing: request.facing,
            slot: self.slot.clone(),
            capabilities: self.capabilities.clone(),
            failing_controls: self.failing_controls,
            stats: self.stats.clone(),
            stopped: false,
        }))
    }
}

pub struct SyntheticDevice {
    facing: Facing,
    slot: FrameSlot,
    capabilities: DeviceCapabilities,
    failing_controls: bool,
    stats: Arc<DeviceStats>,
    stopped: bool,
}

impl CameraDevice for SyntheticDevice {
    fn facing(&self) -> Facing {
        self.facing
    }

    fn capabilities(&mut self) -> Result<DeviceCapabilities, DeviceError> {
        Ok(self.capabilities.clone())
    }

    fn set_control(&mut self, control: Control, value: f32) -> Result<(), DeviceError> {
        if self.failing_controls {
            return Err(DeviceError::Other(format!("{control:?} rejected by driver")));
        }
        let supported = match control {
            Control::Zoom => self.capabilities.zoom.is_some(),
            Control::ExposureCompensation => self.capabilities.exposure_compensation.is_some(),
            Control::Brightness => self.capabilities.brightness.is_some(),
        };
        if !supported {
            return Err(DeviceError::Unsupported("synthetic control"));
        }
        self.stats.controls.lock().push((control, value));
        Ok(())
    }

    fn latest_frame(&mut self) -> Result<Option<RgbImage>, DeviceError> {
        if self.stopped {
            return Err(DeviceError::Other("device stopped".into()));
        }
        Ok(self.slot.latest())
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.stats.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
