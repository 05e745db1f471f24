//! Media capture failures
//!
//! Capture errors arrive as DOM exception names (`NotAllowedError`,
//! `NotFoundError`, ...). They are mapped to typed reasons with guidance
//! for the user.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("camera/microphone access denied")]
    NotAllowed,

    #[error("no camera/microphone found")]
    NotFound,

    #[error("camera/microphone is already in use")]
    NotReadable,

    #[error("camera/microphone constraints cannot be satisfied")]
    Overconstrained,

    #[error("camera/microphone access blocked by security settings")]
    Security,

    #[error("camera/microphone access was interrupted")]
    Abort,

    #[error("media devices are not supported")]
    Unsupported,

    #[error("could not access camera/microphone: {0}")]
    Unknown(String),
}

impl MediaError {
    /// Map an exception name and message to a reason
    pub fn from_name(name: &str, message: &str) -> Self {
        match name.trim_end_matches("Error") {
            "NotAllowed" | "PermissionDenied" => MediaError::NotAllowed,
            "NotFound" | "DevicesNotFound" => MediaError::NotFound,
            "NotReadable" | "TrackStart" => MediaError::NotReadable,
            "Overconstrained" | "ConstraintNotSatisfied" => MediaError::Overconstrained,
            "Security" => MediaError::Security,
            "Abort" => MediaError::Abort,
            "NotSupported" => MediaError::Unsupported,
            _ => MediaError::Unknown(if message.is_empty() {
                name.to_string()
            } else {
                message.to_string()
            }),
        }
    }

    /// What the user can do about it
    pub fn remedy(&self) -> &'static str {
        match self {
            MediaError::NotAllowed => {
                "Allow camera and microphone access when the browser asks, or enable it for this site in the browser settings."
            }
            MediaError::NotFound => {
                "Make sure a camera and microphone are connected and not used by another application."
            }
            MediaError::NotReadable => {
                "Close other applications that might be using the camera or microphone and try again."
            }
            MediaError::Overconstrained => {
                "The device does not support the requested quality; retry with lower settings."
            }
            MediaError::Security => {
                "Camera and microphone access requires a secure (HTTPS) connection."
            }
            MediaError::Abort => "The request was interrupted. Please try again.",
            MediaError::Unsupported => {
                "This browser cannot capture media. Use a current browser over HTTPS."
            }
            MediaError::Unknown(_) => "Check the camera and microphone and try again.",
        }
    }

    /// Whether retrying the capture can succeed without a settings change
    pub fn is_retryable(&self) -> bool {
        !matches!(self, MediaError::Security | MediaError::Unsupported)
    }

    /// Whether the capture should be retried with relaxed constraints
    pub fn wants_lower_constraints(&self) -> bool {
        matches!(self, MediaError::Overconstrained)
    }
}
