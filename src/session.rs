//! Capture session controller
//!
//! Owns the live device, the sampling task and the cached readiness state of
//! one session. `CaptureEngine` enforces a single open session per engine;
//! `SessionHandle` is the caller's only way to reach the hardware and closes
//! the session when dropped.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capabilities::Negotiator;
use crate::capture::{self, CaptureArtifact, JPEG_MIME};
use crate::config::EngineConfig;
use crate::device::{CameraDevice, DeviceProvider, DeviceRequest, Facing};
use crate::error::CameraError;
use crate::pose::{self, PoseSpec};
use crate::readiness::{self, ReadinessState};
use crate::sampler::{sampling_loop, FrameSampler};
use crate::{presence, quality};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Live,
    Capturing,
    Closed,
}

/// Effective camera parameters after negotiation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraSettings {
    pub facing: Facing,
    pub zoom: f32,
    pub exposure_bias: f32,
}

struct LiveDevice {
    device: Box<dyn CameraDevice>,
    negotiator: Negotiator,
}

// Lock order: device, then settings, then state or readiness
struct SessionInner {
    id: Uuid,
    pose: &'static PoseSpec,
    config: Arc<EngineConfig>,
    provider: Arc<dyn DeviceProvider>,
    state: RwLock<SessionState>,
    settings: Mutex<CameraSettings>,
    device: Mutex<Option<LiveDevice>>,
    readiness: RwLock<ReadinessState>,
    /// Bumped on every device change; samples from an older device are dropped
    generation: AtomicU64,
    sampler: Mutex<FrameSampler>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionInner {
    fn request(&self, facing: Facing) -> DeviceRequest {
        DeviceRequest {
            facing,
            ideal_width: self.config.capture.ideal_width,
            ideal_height: self.config.capture.ideal_height,
        }
    }

    /// Negotiate capabilities and push the current settings to a fresh device
    fn bring_up(&self, mut device: Box<dyn CameraDevice>) -> LiveDevice {
        let negotiator = Negotiator::negotiate(device.as_mut(), &self.config.hardware);
        let mut settings = self.settings.lock();
        settings.zoom = negotiator.apply_zoom(device.as_mut(), settings.zoom);
        settings.exposure_bias = negotiator.apply_exposure(device.as_mut(), settings.exposure_bias);
        LiveDevice { device, negotiator }
    }

    fn start(self: &Arc<Self>) -> Result<(), CameraError> {
        *self.state.write() = SessionState::Starting;

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                *self.state.write() = SessionState::Closed;
                return Err(CameraError::Unknown(format!("no async runtime: {e}")));
            }
        };

        let facing = self.settings.lock().facing;
        let device = match self.provider.acquire(&self.request(facing)) {
            Ok(device) => device,
            Err(e) => {
                tracing::warn!("Session {} failed to acquire {:?} camera: {}", self.id, facing, e);
                *self.state.write() = SessionState::Closed;
                return Err(e.into());
            }
        };
        let live = self.bring_up(device);
        *self.device.lock() = Some(live);

        let token = CancellationToken::new();
        let weak: Weak<SessionInner> = Arc::downgrade(self);
        let interval = Duration::from_millis(self.config.sampler.interval_ms.max(1));
        let task = runtime.spawn(sampling_loop(interval, token.clone(), move || {
            if let Some(inner) = weak.upgrade() {
                inner.sample_once();
            }
        }));
        *self.cancel.lock() = Some(token);
        *self.task.lock() = Some(task);

        *self.state.write() = SessionState::Live;
        tracing::info!(
            "Session {} live: pose={} facing={:?}",
            self.id,
            self.pose.pose_id,
            facing
        );
        Ok(())
    }

    /// Take one sample and fold it into the readiness cache. Returns false
    /// when the sample was skipped.
    fn sample_once(&self) -> bool {
        if *self.state.read() != SessionState::Live {
            return false;
        }

        let (generation, frame) = {
            let mut guard = self.device.lock();
            let Some(live) = guard.as_mut() else {
                return false;
            };
            let generation = self.generation.load(Ordering::SeqCst);
            match live.device.latest_frame() {
                Ok(Some(frame)) => (generation, frame),
                Ok(None) => {
                    tracing::debug!("Sample skipped: camera warming up");
                    return false;
                }
                Err(e) => {
                    tracing::debug!("Sample skipped: {}", e);
                    return false;
                }
            }
        };

        let next = {
            let mut sampler = self.sampler.lock();
            let raster = sampler.sample(&frame);
            let quality = quality::analyze(raster, &self.config.quality);
            let presence = presence::detect(raster, &self.config.presence);
            readiness::evaluate(&quality, &presence, &self.config.scoring)
        };

        let mut readiness = self.readiness.write();
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        *readiness = next;
        true
    }

    fn with_live_device<F>(&self, op: &str, f: F)
    where
        F: FnOnce(&mut LiveDevice, &mut CameraSettings),
    {
        let mut guard = self.device.lock();
        let Some(live) = guard.as_mut() else {
            tracing::debug!("Session {} not live, ignoring {}", self.id, op);
            return;
        };
        live.negotiator = Negotiator::negotiate(live.device.as_mut(), &self.config.hardware);
        let mut settings = self.settings.lock();
        f(live, &mut settings);
    }

    fn set_zoom(&self, value: f32) {
        self.with_live_device("zoom", |live, settings| {
            settings.zoom = live.negotiator.apply_zoom(live.device.as_mut(), value);
        });
    }

    fn set_exposure(&self, value: f32) {
        self.with_live_device("exposure", |live, settings| {
            settings.exposure_bias = live.negotiator.apply_exposure(live.device.as_mut(), value);
        });
    }

    fn switch_facing(&self) -> Result<(), CameraError> {
        {
            let mut state = self.state.write();
            if *state != SessionState::Live {
                return Err(CameraError::SessionNotLive);
            }
            *state = SessionState::Starting;
        }

        let result = {
            let mut guard = self.device.lock();
            if let Some(mut old) = guard.take() {
                old.device.stop();
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
            *self.readiness.write() = ReadinessState::analyzing();

            let facing = {
                let mut settings = self.settings.lock();
                settings.facing = settings.facing.opposite();
                settings.facing
            };
            match self.provider.acquire(&self.request(facing)) {
                Ok(device) => {
                    let mut live = self.bring_up(device);
                    let mut state = self.state.write();
                    if *state == SessionState::Starting {
                        *guard = Some(live);
                        *state = SessionState::Live;
                        Ok(Some(facing))
                    } else {
                        // Closed while the new camera was coming up
                        live.device.stop();
                        Ok(None)
                    }
                }
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(Some(facing)) => {
                tracing::info!("Session {} switched to {:?} camera", self.id, facing);
                Ok(())
            }
            Ok(None) => Err(CameraError::SessionNotLive),
            Err(e) => {
                tracing::warn!("Session {} failed to switch camera: {}", self.id, e);
                {
                    // Report the camera that was last live
                    let mut settings = self.settings.lock();
                    settings.facing = settings.facing.opposite();
                }
                self.close();
                Err(e.into())
            }
        }
    }

    fn capture(&self, force: bool) -> Result<CaptureArtifact, CameraError> {
        {
            let mut state = self.state.write();
            if *state != SessionState::Live {
                return Err(CameraError::SessionNotLive);
            }
            *state = SessionState::Capturing;
        }

        let result = self.take_still(force);

        let mut state = self.state.write();
        if *state == SessionState::Capturing {
            *state = SessionState::Live;
        }
        result
    }

    fn take_still(&self, force: bool) -> Result<CaptureArtifact, CameraError> {
        let readiness = self.readiness.read().clone();
        if !readiness.may_capture {
            // Quality gating is advisory; the operator decides
            if force {
                tracing::warn!(
                    "Forced capture below readiness threshold (score {}, subject {})",
                    readiness.score,
                    readiness.subject_present
                );
            } else {
                tracing::info!("Capturing below readiness threshold (score {})", readiness.score);
            }
        }

        let (frame, settings, negotiator) = {
            let mut guard = self.device.lock();
            let live = guard.as_mut().ok_or(CameraError::SessionNotLive)?;
            let frame = live
                .device
                .latest_frame()
                .map_err(CameraError::from)?
                .ok_or(CameraError::FrameUnavailable)?;
            (frame, *self.settings.lock(), live.negotiator)
        };

        // Only the share the hardware did not already apply
        let capture_config = &self.config.capture;
        let still = capture::render_still(
            &frame,
            negotiator.software_zoom(settings.zoom),
            negotiator.software_exposure(settings.exposure_bias),
            capture_config,
        );
        let image_bytes = capture::encode_jpeg(&still, capture_config.jpeg_quality)
            .map_err(|e| CameraError::Unknown(format!("Failed to encode JPEG: {e}")))?;

        let artifact = CaptureArtifact {
            image_bytes: image_bytes.into(),
            mime_type: JPEG_MIME,
            width: still.width(),
            height: still.height(),
            pose_id: self.pose.pose_id.to_string(),
            captured_at: chrono::Utc::now(),
            zoom: settings.zoom,
            exposure_bias: settings.exposure_bias,
            score: readiness.score,
        };
        tracing::info!(
            "Captured {} ({}x{}, {} bytes)",
            artifact.file_name(),
            artifact.width,
            artifact.height,
            artifact.image_bytes.len()
        );
        Ok(artifact)
    }

    fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), SessionState::Closed);
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        if let Some(mut live) = self.device.lock().take() {
            live.device.stop();
        }
        if previous != SessionState::Closed {
            tracing::info!("Session {} closed", self.id);
        }
    }
}

/// Caller-side handle to an open session. Dropping it closes the session.
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn pose(&self) -> &'static PoseSpec {
        self.inner.pose
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    pub fn settings(&self) -> CameraSettings {
        *self.inner.settings.lock()
    }

    /// Latest cached assessment; never waits for a sample
    pub fn readiness(&self) -> ReadinessState {
        self.inner.readiness.read().clone()
    }

    /// Request a zoom factor; the effective value is clamped to what the
    /// device (or the digital fallback) supports
    pub fn set_zoom(&self, value: f32) {
        self.inner.set_zoom(value);
    }

    /// Request an exposure bias in stops
    pub fn set_exposure(&self, value: f32) {
        self.inner.set_exposure(value);
    }

    /// Brightness multiplier for the live preview, applied whether or not
    /// the hardware honors the exposure bias
    pub fn preview_gain(&self) -> f32 {
        capture::exposure_gain(
            self.inner.settings.lock().exposure_bias,
            self.inner.config.capture.exposure_gain_per_stop,
        )
    }

    /// Latest frame downscaled for display with the preview gain applied
    pub fn preview_frame(&self) -> Option<image::RgbImage> {
        if self.state() != SessionState::Live {
            return None;
        }
        let frame = {
            let mut guard = self.inner.device.lock();
            let live = guard.as_mut()?;
            let frame = live.device.latest_frame().ok()??;
            frame
        };
        let mut preview = FrameSampler::new(self.inner.config.sampler.clone())
            .sample(&frame)
            .clone();
        capture::apply_gain(&mut preview, self.preview_gain());
        Some(preview)
    }

    pub fn switch_facing(&self) -> Result<(), CameraError> {
        self.inner.switch_facing()
    }

    /// Run one sampling pass immediately instead of waiting for the timer
    pub fn sample_now(&self) -> bool {
        self.inner.sample_once()
    }

    /// Take a still. Low readiness never blocks; `force` marks an explicit
    /// operator override in the log.
    pub fn capture(&self, force: bool) -> Result<CaptureArtifact, CameraError> {
        self.inner.capture(force)
    }

    /// Stop sampling and release the camera. Safe to call repeatedly.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.inner.close();
    }
}

/// Entry point: opens sessions against a device provider, one at a time
pub struct CaptureEngine {
    provider: Arc<dyn DeviceProvider>,
    config: Arc<EngineConfig>,
    active: Mutex<Weak<SessionInner>>,
}

impl CaptureEngine {
    pub fn new(provider: Arc<dyn DeviceProvider>, config: EngineConfig) -> Self {
        Self {
            provider,
            config: Arc::new(config),
            active: Mutex::new(Weak::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn poses(&self) -> &'static [PoseSpec] {
        pose::all()
    }

    /// Open a session for `pose_id`. An already open session is closed
    /// first so the device is never held twice. Must run inside a Tokio
    /// runtime, which hosts the sampling task.
    pub fn open_session(&self, pose_id: &str, facing: Facing) -> Result<SessionHandle, CameraError> {
        let pose = pose::find(pose_id).ok_or_else(|| CameraError::UnknownPose(pose_id.to_string()))?;

        let mut active = self.active.lock();
        if let Some(previous) = active.upgrade() {
            tracing::info!("Closing session {} before opening a new one", previous.id);
            previous.close();
        }

        let inner = Arc::new(SessionInner {
            id: Uuid::new_v4(),
            pose,
            config: self.config.clone(),
            provider: self.provider.clone(),
            state: RwLock::new(SessionState::Idle),
            settings: Mutex::new(CameraSettings {
                facing,
                zoom: self.config.hardware.zoom_min,
                exposure_bias: 0.0,
            }),
            device: Mutex::new(None),
            readiness: RwLock::new(ReadinessState::analyzing()),
            generation: AtomicU64::new(0),
            sampler: Mutex::new(FrameSampler::new(self.config.sampler.clone())),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        });

        inner.start()?;
        *active = Arc::downgrade(&inner);
        Ok(SessionHandle { inner })
    }

    pub fn close_session(&self, handle: &SessionHandle) {
        handle.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::synthetic::{DeviceStats, SyntheticProvider};
    use crate::device::{CapabilityRange, Control, DeviceCapabilities, FrameSlot};
    use crate::error::DeviceError;
    use crate::presence::tests::gray_with_skin_disc;
    use crate::quality::Status;
    use image::RgbImage;

    struct Rig {
        engine: CaptureEngine,
        provider: Arc<SyntheticProvider>,
        slot: FrameSlot,
        stats: Arc<DeviceStats>,
    }

    fn rig_with(provider: SyntheticProvider) -> Rig {
        let provider = Arc::new(provider);
        Rig {
            engine: CaptureEngine::new(provider.clone(), EngineConfig::default()),
            slot: provider.frame_slot(),
            stats: provider.stats(),
            provider,
        }
    }

    fn rig() -> Rig {
        rig_with(SyntheticProvider::new())
    }

    fn skin_frame() -> RgbImage {
        gray_with_skin_disc(480, 640, 140, 0.30)
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let rig = rig();
        let handle = rig.engine.open_session("glabellar", Facing::Front).unwrap();
        assert_eq!(handle.state(), SessionState::Live);
        assert_eq!(rig.stats.open(), 1);

        rig.engine.close_session(&handle);
        handle.close();
        drop(handle);

        assert_eq!(rig.stats.acquired(), 1);
        assert_eq!(rig.stats.released(), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_device() {
        let rig = rig();
        {
            let _handle = rig.engine.open_session("frontal_rest", Facing::Back).unwrap();
            assert_eq!(rig.stats.open(), 1);
        }
        assert_eq!(rig.stats.open(), 0);
        assert_eq!(rig.stats.facings(), vec![Facing::Back]);
    }

    #[tokio::test]
    async fn test_glabellar_skin_disc_scores_fifty() {
        let rig = rig();
        let handle = rig.engine.open_session("glabellar", Facing::Front).unwrap();
        rig.slot.feed(skin_frame());

        assert!(handle.sample_now());
        let state = handle.readiness();
        assert!(!state.analyzing);
        assert_eq!(state.brightness_status, Status::Good);
        assert_eq!(state.sharpness_status, Status::Error);
        assert!(state.subject_present);
        assert_eq!(state.score, 50);
        assert!(state.may_capture);
    }

    #[tokio::test]
    async fn test_black_frame_scores_zero_but_still_captures() {
        let rig = rig();
        let handle = rig.engine.open_session("glabellar", Facing::Front).unwrap();
        rig.slot.feed(RgbImage::new(480, 640));

        assert!(handle.sample_now());
        let state = handle.readiness();
        assert_eq!(state.brightness_status, Status::Error);
        assert!(!state.subject_present);
        assert_eq!(state.score, 0);
        assert!(!state.may_capture);

        let artifact = handle.capture(true).unwrap();
        assert_eq!(artifact.mime_type, "image/jpeg");
        assert_eq!((artifact.width, artifact.height), (480, 640));
        assert_eq!(artifact.pose_id, "glabellar");
        assert_eq!(artifact.score, 0);
        assert!(artifact.file_name().starts_with("glabellar-"));
        assert!(image::load_from_memory(&artifact.image_bytes).is_ok());
        assert_eq!(handle.state(), SessionState::Live);
    }

    #[tokio::test]
    async fn test_unforced_capture_is_not_blocked() {
        let rig = rig();
        let handle = rig.engine.open_session("smile", Facing::Front).unwrap();
        rig.slot.feed(RgbImage::new(40, 40));
        handle.sample_now();
        assert!(!handle.readiness().may_capture);
        assert!(handle.capture(false).is_ok());
    }

    #[tokio::test]
    async fn test_switch_facing_resets_readiness() {
        let rig = rig();
        let handle = rig.engine.open_session("glabellar", Facing::Front).unwrap();
        rig.slot.feed(skin_frame());
        handle.sample_now();
        assert_eq!(handle.readiness().score, 50);

        handle.switch_facing().unwrap();
        assert_eq!(handle.readiness(), ReadinessState::analyzing());
        assert_eq!(handle.settings().facing, Facing::Back);
        assert_eq!(rig.stats.facings(), vec![Facing::Front, Facing::Back]);
        assert_eq!(rig.stats.open(), 1);

        assert!(handle.sample_now());
        assert!(!handle.readiness().analyzing);
    }

    #[tokio::test]
    async fn test_switch_facing_keeps_settings() {
        let rig = rig();
        let handle = rig.engine.open_session("glabellar", Facing::Front).unwrap();
        handle.set_zoom(2.0);
        handle.set_exposure(-1.0);
        handle.switch_facing().unwrap();
        let settings = handle.settings();
        assert_eq!(settings.zoom, 2.0);
        assert_eq!(settings.exposure_bias, -1.0);
    }

    #[tokio::test]
    async fn test_failed_switch_closes_session() {
        let rig = rig();
        let handle = rig.engine.open_session("glabellar", Facing::Front).unwrap();
        rig.provider.fail_next_acquire(DeviceError::NotFound("no back camera".into()));

        assert_eq!(handle.switch_facing(), Err(CameraError::DeviceNotFound));
        assert_eq!(handle.state(), SessionState::Closed);
        assert_eq!(handle.settings().facing, Facing::Front);
        assert_eq!(rig.stats.open(), 0);
        assert_eq!(handle.capture(true).unwrap_err(), CameraError::SessionNotLive);
    }

    #[tokio::test]
    async fn test_open_errors_are_classified() {
        let rig = rig();
        rig.provider.fail_next_acquire(DeviceError::PermissionDenied("denied".into()));
        assert_eq!(
            rig.engine.open_session("glabellar", Facing::Front).err(),
            Some(CameraError::PermissionDenied)
        );
        assert_eq!(rig.stats.open(), 0);

        rig.provider.fail_next_acquire(DeviceError::Other("driver crashed".into()));
        assert!(matches!(
            rig.engine.open_session("glabellar", Facing::Front).err(),
            Some(CameraError::Unknown(_))
        ));

        // retry with a fresh open
        assert!(rig.engine.open_session("glabellar", Facing::Front).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_pose() {
        let rig = rig();
        assert_eq!(
            rig.engine.open_session("knee", Facing::Front).err(),
            Some(CameraError::UnknownPose("knee".into()))
        );
        assert_eq!(rig.stats.acquired(), 0);
    }

    #[test]
    fn test_open_outside_runtime_fails_cleanly() {
        let rig = rig();
        assert!(matches!(
            rig.engine.open_session("glabellar", Facing::Front).err(),
            Some(CameraError::Unknown(_))
        ));
        assert_eq!(rig.stats.acquired(), 0);
    }

    #[tokio::test]
    async fn test_second_session_closes_first() {
        let rig = rig();
        let first = rig.engine.open_session("glabellar", Facing::Front).unwrap();
        let second = rig.engine.open_session("frontalis", Facing::Front).unwrap();

        assert_eq!(first.state(), SessionState::Closed);
        assert_eq!(second.state(), SessionState::Live);
        assert_eq!(rig.stats.open(), 1);
        assert_eq!(first.capture(false).unwrap_err(), CameraError::SessionNotLive);
    }

    #[tokio::test]
    async fn test_zoom_clamps_to_default_max() {
        let rig = rig();
        let handle = rig.engine.open_session("glabellar", Facing::Front).unwrap();
        handle.set_zoom(10.0);
        assert_eq!(handle.settings().zoom, 3.0);
        handle.set_exposure(7.0);
        assert_eq!(handle.settings().exposure_bias, 2.0);
    }

    #[tokio::test]
    async fn test_zoom_clamps_to_device_max() {
        let rig = rig_with(SyntheticProvider::new().with_capabilities(DeviceCapabilities {
            zoom: Some(CapabilityRange::new(1.0, 2.5)),
            ..Default::default()
        }));
        let handle = rig.engine.open_session("glabellar", Facing::Front).unwrap();
        handle.set_zoom(10.0);
        assert_eq!(handle.settings().zoom, 2.5);
    }

    #[tokio::test]
    async fn test_capture_uses_latest_settings() {
        let rig = rig();
        let handle = rig.engine.open_session("glabellar", Facing::Front).unwrap();
        let frame = skin_frame();
        rig.slot.feed(frame.clone());

        handle.set_zoom(1.5);
        let artifact = handle.capture(false).unwrap();
        assert_eq!(artifact.zoom, 1.5);

        let config = EngineConfig::default();
        let expected = capture::encode_jpeg(
            &capture::render_still(&frame, 1.5, 0.0, &config.capture),
            config.capture.jpeg_quality,
        )
        .unwrap();
        assert_eq!(artifact.image_bytes.as_ref(), expected.as_slice());
    }

    #[tokio::test]
    async fn test_non_finite_requests_never_reach_the_still() {
        let rig = rig();
        let handle = rig.engine.open_session("glabellar", Facing::Front).unwrap();
        rig.slot.feed(RgbImage::from_pixel(64, 48, image::Rgb([140, 140, 140])));

        handle.set_exposure(f32::NAN);
        handle.set_zoom(f32::NAN);
        let settings = handle.settings();
        assert_eq!(settings.zoom, 1.0);
        assert_eq!(settings.exposure_bias, 0.0);
        assert_eq!(handle.preview_gain(), 1.0);

        let artifact = handle.capture(false).unwrap();
        let decoded = image::load_from_memory(&artifact.image_bytes).unwrap().to_rgb8();
        let px = decoded.get_pixel(32, 24);
        assert!(px.0.iter().all(|&c| (135..=145).contains(&c)), "{px:?}");
    }

    #[tokio::test]
    async fn test_native_zoom_and_exposure_are_not_reapplied() {
        let rig = rig_with(SyntheticProvider::new().with_capabilities(DeviceCapabilities {
            zoom: Some(CapabilityRange::new(1.0, 3.0)),
            exposure_compensation: Some(CapabilityRange::new(-2.0, 2.0)),
            ..Default::default()
        }));
        let handle = rig.engine.open_session("glabellar", Facing::Front).unwrap();
        let frame = skin_frame();
        rig.slot.feed(frame.clone());

        handle.set_zoom(2.0);
        handle.set_exposure(1.0);
        assert!(rig.stats.controls().contains(&(Control::Zoom, 2.0)));

        let artifact = handle.capture(false).unwrap();
        assert_eq!((artifact.zoom, artifact.exposure_bias), (2.0, 1.0));

        let config = EngineConfig::default();
        let expected = capture::encode_jpeg(
            &capture::render_still(&frame, 1.0, 0.0, &config.capture),
            config.capture.jpeg_quality,
        )
        .unwrap();
        assert_eq!(artifact.image_bytes.as_ref(), expected.as_slice());
    }

    /// Provider that runs a hook while a device is being acquired
    struct HookedProvider {
        inner: SyntheticProvider,
        on_acquire: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl DeviceProvider for HookedProvider {
        fn acquire(&self, request: &DeviceRequest) -> Result<Box<dyn CameraDevice>, DeviceError> {
            if let Some(hook) = self.on_acquire.lock().take() {
                hook();
            }
            self.inner.acquire(request)
        }
    }

    #[tokio::test]
    async fn test_close_during_switch_leaves_session_closed() {
        let provider = Arc::new(HookedProvider {
            inner: SyntheticProvider::new(),
            on_acquire: Mutex::new(None),
        });
        let stats = provider.inner.stats();
        let engine = CaptureEngine::new(provider.clone(), EngineConfig::default());
        let handle = engine.open_session("glabellar", Facing::Front).unwrap();

        // A concurrent close marks the session Closed before it can take the device
        let inner = handle.inner.clone();
        *provider.on_acquire.lock() = Some(Box::new(move || {
            *inner.state.write() = SessionState::Closed;
        }));

        assert_eq!(handle.switch_facing(), Err(CameraError::SessionNotLive));
        assert_eq!(handle.state(), SessionState::Closed);
        assert_eq!(stats.acquired(), 2);
        assert_eq!(stats.open(), 0);
        assert!(!handle.sample_now());
    }

    #[tokio::test]
    async fn test_capture_without_frame() {
        let rig = rig();
        let handle = rig.engine.open_session("glabellar", Facing::Front).unwrap();
        assert_eq!(handle.capture(false).unwrap_err(), CameraError::FrameUnavailable);
        assert_eq!(handle.state(), SessionState::Live);
        assert!(!handle.sample_now());
        assert!(handle.readiness().analyzing);
    }

    #[tokio::test]
    async fn test_preview_gain_tracks_exposure() {
        let rig = rig();
        let handle = rig.engine.open_session("glabellar", Facing::Front).unwrap();
        assert_eq!(handle.preview_gain(), 1.0);
        handle.set_exposure(1.0);
        assert!((handle.preview_gain() - 1.3).abs() < 1e-6);

        rig.slot.feed(RgbImage::from_pixel(64, 48, image::Rgb([100, 100, 100])));
        let preview = handle.preview_frame().unwrap();
        assert_eq!(preview.dimensions(), (16, 12));
        assert_eq!(preview.get_pixel(0, 0)[0], 130);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampling_loop_updates_readiness() {
        let rig = rig();
        let handle = rig.engine.open_session("glabellar", Facing::Front).unwrap();
        rig.slot.feed(skin_frame());

        tokio::time::sleep(Duration::from_millis(600)).await;
        let state = handle.readiness();
        assert!(!state.analyzing);
        assert_eq!(state.score, 50);

        handle.close();
        rig.slot.feed(RgbImage::new(480, 640));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        // no samples after close
        assert_eq!(handle.readiness().score, 50);
        assert_eq!(rig.stats.open(), 0);
    }
}
