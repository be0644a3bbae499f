//! Guided capture engine
//!
//! Drives a live camera for clinical photo documentation: samples frames on
//! a timer, scores exposure, sharpness, framing and subject presence against
//! a target pose, negotiates zoom/exposure with the hardware and produces a
//! finished JPEG still.

pub mod capabilities;
pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod pose;
pub mod presence;
pub mod quality;
pub mod readiness;
pub mod sampler;
pub mod session;

pub use capture::CaptureArtifact;
pub use config::EngineConfig;
pub use device::{CameraDevice, DeviceProvider, Facing};
pub use error::{CameraError, DeviceError};
pub use pose::{FramingArchetype, PoseSpec};
pub use quality::Status;
pub use readiness::ReadinessState;
pub use session::{CameraSettings, CaptureEngine, SessionHandle, SessionState};
