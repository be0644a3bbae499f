//! Error types surfaced by the capture engine

use thiserror::Error;

/// Errors returned to callers of the session API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    /// Operator or OS refused access to the camera
    #[error("Camera permission denied")]
    PermissionDenied,

    /// No camera matching the requested facing exists
    #[error("Camera not found")]
    DeviceNotFound,

    #[error("Camera error: {0}")]
    Unknown(String),

    /// Operation requires a live session
    #[error("Session is not live")]
    SessionNotLive,

    #[error("Unknown pose: {0}")]
    UnknownPose(String),

    /// Device is live but has not produced a frame yet
    #[error("No frame available from camera")]
    FrameUnavailable,
}

/// Failures reported by a camera backend
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    /// Requested control is not exposed by the device
    #[error("Unsupported control: {0}")]
    Unsupported(&'static str),

    #[error("Frame decode failed: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<DeviceError> for CameraError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::PermissionDenied(_) => CameraError::PermissionDenied,
            DeviceError::NotFound(_) => CameraError::DeviceNotFound,
            DeviceError::Io(io) => match io.kind() {
                std::io::ErrorKind::PermissionDenied => CameraError::PermissionDenied,
                std::io::ErrorKind::NotFound => CameraError::DeviceNotFound,
                _ => CameraError::Unknown(io.to_string()),
            },
            other => CameraError::Unknown(other.to_string()),
        }
    }
}
