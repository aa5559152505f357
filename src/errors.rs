//! Error types for image acquisition, the live camera and calorie estimation.
//!
//! The `Display` text of every variant is the message shown inline in the
//! UI, so each one tells the user what to do next.

use thiserror::Error;

/// Failures while turning a selected image into an [`crate::encoder::EncodedImage`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("Please upload a valid image file (e.g., PNG, JPG, WEBP). Got: {0}")]
    UnsupportedType(String),

    #[error("Failed to read image file: {0}. Please try another image.")]
    ReadError(String),

    #[error("Failed to process image file ({0}). Please try another image.")]
    MalformedEncoding(String),
}

/// Camera lifecycle failures.
///
/// Everything except [`CameraError::FrameNotAvailable`] tears the session
/// down and turns camera mode off.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error(
        "Camera access denied. Please grant permission to the camera device (check that your \
         user is in the video group) and ensure no other app is using the camera."
    )]
    PermissionDenied,

    #[error(
        "No camera found. Please ensure a camera is connected, enabled, and not being used by \
         another application."
    )]
    DeviceNotFound,

    #[error(
        "Camera is already in use by another application or a hardware error occurred. Please \
         close any other app that might be using the camera and try again."
    )]
    DeviceBusyOrHardware,

    #[error("Camera playback was prevented. Please check system permissions or try again.")]
    PlaybackBlocked,

    #[error(
        "Camera access denied due to security settings (e.g., a sandbox without device access). \
         Run the application with camera access enabled."
    )]
    InsecureContext,

    #[error("Camera capture tool ({0}) is not available on this system.")]
    ApiUnavailable(String),

    #[error("Camera stream ended. Please try reactivating the camera.")]
    StreamEndedUnexpectedly,

    #[error("Camera view is not ready. Please try toggling the camera again.")]
    SurfaceNotReady,

    #[error(
        "Camera feed not fully loaded or invalid (dimensions are zero). Cannot capture. Please \
         wait or restart camera."
    )]
    FrameNotAvailable,

    #[error("Could not process video frame ({0}).")]
    CaptureFailed(String),

    #[error(
        "Camera error: {0}. Please check that camera drivers are up to date and that no other \
         app is using it."
    )]
    Backend(String),
}

impl CameraError {
    /// Soft failures leave the session running so the user can retry.
    pub fn is_recoverable_in_session(&self) -> bool {
        matches!(self, CameraError::FrameNotAvailable)
    }
}

/// Failures of the estimation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EstimationError {
    #[error("API Key is not configured. Calorie estimation is unavailable.")]
    ConfigurationMissing,

    #[error("The configured API key is invalid. Please check your API key.")]
    InvalidCredential,

    #[error(
        "The AI returned an empty or invalid response. It might be unable to analyze this image."
    )]
    EmptyResponse,

    #[error("AI analysis failed: {0}")]
    Failed(String),
}

impl EstimationError {
    pub const GENERIC_MESSAGE: &'static str = "Failed to estimate calories. The AI may be busy \
         or unable to process the image. Please try again later.";

    /// Message shown to the user, falling back to a retry hint when the
    /// collaborator gave no detail.
    pub fn user_message(&self) -> String {
        match self {
            EstimationError::Failed(detail) if detail.trim().is_empty() => {
                Self::GENERIC_MESSAGE.to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_frame_not_available_is_soft() {
        assert!(CameraError::FrameNotAvailable.is_recoverable_in_session());
        assert!(!CameraError::PermissionDenied.is_recoverable_in_session());
        assert!(!CameraError::StreamEndedUnexpectedly.is_recoverable_in_session());
        assert!(!CameraError::SurfaceNotReady.is_recoverable_in_session());
    }

    #[test]
    fn test_camera_messages_are_distinct() {
        let errors = [
            CameraError::PermissionDenied,
            CameraError::DeviceNotFound,
            CameraError::DeviceBusyOrHardware,
            CameraError::PlaybackBlocked,
            CameraError::InsecureContext,
            CameraError::ApiUnavailable("rpicam-still".into()),
            CameraError::StreamEndedUnexpectedly,
            CameraError::SurfaceNotReady,
            CameraError::FrameNotAvailable,
        ];
        for (i, a) in errors.iter().enumerate() {
            for b in errors.iter().skip(i + 1) {
                assert_ne!(a.to_string(), b.to_string());
            }
        }
    }

    #[test]
    fn test_estimation_user_message_fallback() {
        assert_eq!(
            EstimationError::Failed("  ".into()).user_message(),
            EstimationError::GENERIC_MESSAGE
        );
        assert_eq!(
            EstimationError::Failed("quota exceeded".into()).user_message(),
            "AI analysis failed: quota exceeded"
        );
    }
}
