//! V4L2 camera backend
//!
//! Drives a Linux video node through `v4l2-ctl`: MJPEG format selection,
//! control discovery via `--list-ctrls`, `--set-ctrl` for constraints and
//! single-frame grabs decoded with the `image` crate.

use image::{ImageFormat, RgbImage};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{
    CameraDevice, CapabilityRange, Control, DeviceCapabilities, DeviceProvider, DeviceRequest,
    Facing, FrameSlot,
};
use crate::config::{EXPOSURE_MAX, EXPOSURE_MIN};
use crate::error::DeviceError;

const ZOOM_CTRL: &str = "zoom_absolute";
const EXPOSURE_BIAS_CTRL: &str = "auto_exposure_bias";
const BRIGHTNESS_CTRL: &str = "brightness";

const GRAB_INTERVAL: Duration = Duration::from_millis(33);
const GRAB_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct V4l2Config {
    pub front_device: String,
    pub back_device: String,
    pub pixel_format: String,
    pub temp_dir: PathBuf,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            front_device: "/dev/video0".to_string(),
            back_device: "/dev/video2".to_string(),
            pixel_format: "MJPG".to_string(),
            temp_dir: PathBuf::from("/tmp/guided_capture"),
        }
    }
}

pub struct V4l2Provider {
    config: V4l2Config,
}

impl V4l2Provider {
    pub fn new(config: V4l2Config) -> Self {
        Self { config }
    }

    fn device_path(&self, facing: Facing) -> &str {
        match facing {
            Facing::Front => &self.config.front_device,
            Facing::Back => &self.config.back_device,
        }
    }
}

impl DeviceProvider for V4l2Provider {
    fn acquire(&self, request: &DeviceRequest) -> Result<Box<dyn CameraDevice>, DeviceError> {
        let path = self.device_path(request.facing).to_string();

        // Surface permission/not-found before v4l2-ctl hides them in stderr
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::PermissionDenied => DeviceError::PermissionDenied(path.clone()),
                ErrorKind::NotFound => DeviceError::NotFound(path.clone()),
                _ => DeviceError::Io(e),
            })?;

        let temp_dir = self.config.temp_dir.join(device_tag(&path));
        fs::create_dir_all(&temp_dir)?;

        run_ctl(&[
            "-d",
            &path,
            &format!(
                "--set-fmt-video=width={},height={},pixelformat={}",
                request.ideal_width, request.ideal_height, self.config.pixel_format
            ),
        ])?;

        tracing::info!(
            "Camera {} opened ({:?}, {}x{} requested)",
            path,
            request.facing,
            request.ideal_width,
            request.ideal_height
        );

        Ok(Box::new(V4l2Device::start(path, request.facing, temp_dir)?))
    }
}

fn device_tag(path: &str) -> String {
    path.rsplit('/').next().unwrap_or("video").to_string()
}

/// Run v4l2-ctl and classify failures from its stderr
fn run_ctl(args: &[&str]) -> Result<String, DeviceError> {
    let output = Command::new("v4l2-ctl")
        .args(args)
        .output()
        .map_err(|e| DeviceError::Other(format!("Failed to run v4l2-ctl: {e}")))?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if stderr.contains("Permission denied") {
        Err(DeviceError::PermissionDenied(stderr))
    } else if stderr.contains("No such file") || stderr.contains("Cannot open device") {
        Err(DeviceError::NotFound(stderr))
    } else {
        Err(DeviceError::Other(format!("v4l2-ctl failed: {}", stderr.trim())))
    }
}

/// One line of `v4l2-ctl --list-ctrls`
#[derive(Debug, Clone, PartialEq)]
pub struct CtrlInfo {
    pub name: String,
    pub min: i64,
    pub max: i64,
    pub step: i64,
    pub default: i64,
}

/// Parse `--list-ctrls` output, e.g.
/// `zoom_absolute 0x009a090d (int)    : min=100 max=500 step=1 default=100 value=100`
pub fn parse_ctrls(listing: &str) -> Vec<CtrlInfo> {
    listing
        .lines()
        .filter_map(|line| {
            let (head, tail) = line.split_once(':')?;
            let name = head.split_whitespace().next()?.to_string();
            let mut min = None;
            let mut max = None;
            let mut step = 1;
            let mut default = 0;
            for pair in tail.split_whitespace() {
                let Some((key, value)) = pair.split_once('=') else {
                    continue;
                };
                let Ok(value) = value.parse::<i64>() else {
                    continue;
                };
                match key {
                    "min" => min = Some(value),
                    "max" => max = Some(value),
                    "step" => step = value,
                    "default" => default = value,
                    _ => {}
                }
            }
            Some(CtrlInfo {
                name,
                min: min?,
                max: max?,
                step,
                default,
            })
        })
        .collect()
}

/// Magnification range implied by a raw zoom control
fn zoom_ratio(ctrl: &CtrlInfo) -> f32 {
    if ctrl.min > 0 {
        ctrl.max as f32 / ctrl.min as f32
    } else {
        1.0 + (ctrl.max - ctrl.min) as f32 / 100.0
    }
}

/// Linear map of `value` in [from_min, from_max] onto the control's raw range
fn to_raw(ctrl: &CtrlInfo, value: f32, from_min: f32, from_max: f32) -> i64 {
    let span = from_max - from_min;
    let t = if span > 0.0 {
        ((value - from_min) / span).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let raw = ctrl.min as f32 + t * (ctrl.max - ctrl.min) as f32;
    let step = ctrl.step.max(1) as f32;
    let snapped = ctrl.min as f32 + ((raw - ctrl.min as f32) / step).round() * step;
    snapped as i64
}

pub struct V4l2Device {
    device_path: String,
    facing: Facing,
    temp_dir: PathBuf,
    ctrls: Vec<CtrlInfo>,
    slot: FrameSlot,
    running: Arc<AtomicBool>,
    capture_thread: Option<JoinHandle<()>>,
}

impl V4l2Device {
    /// Start the capture thread; frames land in the device's slot
    fn start(device_path: String, facing: Facing, temp_dir: PathBuf) -> Result<Self, DeviceError> {
        let slot = FrameSlot::default();
        let running = Arc::new(AtomicBool::new(true));

        let capture_thread = thread::Builder::new()
            .name(format!("capture-{}", device_tag(&device_path)))
            .spawn({
                let device_path = device_path.clone();
                let temp_dir = temp_dir.clone();
                let slot = slot.clone();
                let running = running.clone();
                move || capture_loop(&device_path, &temp_dir, &slot, &running)
            })
            .map_err(|e| DeviceError::Other(format!("Failed to start capture thread: {e}")))?;

        Ok(Self {
            device_path,
            facing,
            temp_dir,
            ctrls: Vec::new(),
            slot,
            running,
            capture_thread: Some(capture_thread),
        })
    }

    fn ctrl(&self, name: &str) -> Option<&CtrlInfo> {
        self.ctrls.iter().find(|c| c.name == name)
    }

    fn set_raw(&self, name: &str, value: i64) -> Result<(), DeviceError> {
        run_ctl(&[
            "-d",
            &self.device_path,
            "--set-ctrl",
            &format!("{name}={value}"),
        ])?;
        Ok(())
    }
}

/// Grab frames until `running` is cleared. Blocking `v4l2-ctl` calls stay on
/// this thread; readers only touch the slot.
fn capture_loop(device_path: &str, temp_dir: &Path, slot: &FrameSlot, running: &AtomicBool) {
    let mut frame_counter: u64 = 0;
    let mut failures: u32 = 0;

    while running.load(Ordering::SeqCst) {
        frame_counter += 1;
        let raw_path = temp_dir.join(format!("frame_{}.jpg", frame_counter % 4));

        let delay = match grab_frame(device_path, &raw_path) {
            Ok(Some(frame)) => {
                failures = 0;
                slot.feed(frame);
                GRAB_INTERVAL
            }
            Ok(None) => GRAB_INTERVAL,
            Err(e) => {
                failures += 1;
                if failures == 1 || failures % 20 == 0 {
                    tracing::warn!("Capture error on {} ({} in a row): {}", device_path, failures, e);
                }
                GRAB_RETRY_DELAY
            }
        };
        // Woken early by stop()
        thread::park_timeout(delay);
    }
    tracing::debug!("Capture thread for {} stopped", device_path);
}

fn grab_frame(device_path: &str, raw_path: &Path) -> Result<Option<RgbImage>, DeviceError> {
    let output = Command::new("v4l2-ctl")
        .args([
            "-d",
            device_path,
            "--stream-mmap=4",
            "--stream-skip=1",
            "--stream-count=1",
            &format!("--stream-to={}", raw_path.display()),
        ])
        .stderr(Stdio::null())
        .output()
        .map_err(|e| DeviceError::Other(format!("Failed to run v4l2-ctl: {e}")))?;

    if !output.status.success() {
        return Err(DeviceError::Other("v4l2-ctl capture failed".into()));
    }
    read_frame_file(raw_path)
}

/// Decode and remove a grabbed frame. A missing or unreadable file is a
/// failed grab, not a missing camera.
fn read_frame_file(raw_path: &Path) -> Result<Option<RgbImage>, DeviceError> {
    let data = fs::read(raw_path)
        .map_err(|e| DeviceError::Other(format!("Frame file {}: {e}", raw_path.display())))?;
    let _ = fs::remove_file(raw_path);
    if data.is_empty() {
        return Ok(None);
    }

    let frame = image::load_from_memory_with_format(&data, ImageFormat::Jpeg)
        .map_err(|e| DeviceError::Decode(e.to_string()))?;
    Ok(Some(frame.to_rgb8()))
}

impl CameraDevice for V4l2Device {
    fn facing(&self) -> Facing {
        self.facing
    }

    fn capabilities(&mut self) -> Result<DeviceCapabilities, DeviceError> {
        let listing = run_ctl(&["-d", &self.device_path, "--list-ctrls"])?;
        self.ctrls = parse_ctrls(&listing);

        // Exposure bias is exposed in stops; the raw control is mapped linearly
        Ok(DeviceCapabilities {
            zoom: self
                .ctrl(ZOOM_CTRL)
                .map(|c| CapabilityRange::new(1.0, zoom_ratio(c))),
            exposure_compensation: self
                .ctrl(EXPOSURE_BIAS_CTRL)
                .map(|_| CapabilityRange::new(EXPOSURE_MIN, EXPOSURE_MAX)),
            brightness: self.ctrl(BRIGHTNESS_CTRL).map(|c| CapabilityRange {
                min: c.min as f32,
                max: c.max as f32,
                step: c.step as f32,
            }),
        })
    }

    fn set_control(&mut self, control: Control, value: f32) -> Result<(), DeviceError> {
        let (name, raw) = match control {
            Control::Zoom => {
                let ctrl = self.ctrl(ZOOM_CTRL).ok_or(DeviceError::Unsupported(ZOOM_CTRL))?;
                (ZOOM_CTRL, to_raw(ctrl, value, 1.0, zoom_ratio(ctrl)))
            }
            Control::ExposureCompensation => {
                let ctrl = self
                    .ctrl(EXPOSURE_BIAS_CTRL)
                    .ok_or(DeviceError::Unsupported(EXPOSURE_BIAS_CTRL))?;
                (EXPOSURE_BIAS_CTRL, to_raw(ctrl, value, EXPOSURE_MIN, EXPOSURE_MAX))
            }
            Control::Brightness => {
                self.ctrl(BRIGHTNESS_CTRL)
                    .ok_or(DeviceError::Unsupported(BRIGHTNESS_CTRL))?;
                (BRIGHTNESS_CTRL, value.round() as i64)
            }
        };
        self.set_raw(name, raw)
    }

    fn latest_frame(&mut self) -> Result<Option<RgbImage>, DeviceError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(DeviceError::Other("device stopped".into()));
        }
        Ok(self.slot.latest())
    }

    fn stop(&mut self) {
        let Some(capture_thread) = self.capture_thread.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        capture_thread.thread().unpark();
        if capture_thread.join().is_err() {
            tracing::error!("Capture thread for {} panicked", self.device_path);
        }
        self.slot.clear();
        let _ = fs::remove_dir_all(&self.temp_dir);
        tracing::info!("Camera {} released", self.device_path);
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        self.stop();
    }
}
