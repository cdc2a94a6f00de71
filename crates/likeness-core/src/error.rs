use crate::models::ModelIntegrityError;
use crate::types::ImageOrigin;
use std::time::Duration;
use thiserror::Error;

/// Failures raised by the embedding provider itself.
///
/// "No face" is not one of these: providers report it as `Ok(None)`.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("model file not found: {0} (run `likeness models` to check the model directory)")]
    ModelNotFound(String),
    #[error(transparent)]
    ModelIntegrity(#[from] ModelIntegrityError),
    #[error("image could not be decoded: {0}")]
    Decode(String),
    #[error("image has zero width or height")]
    EmptyImage,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),
    #[error("provider engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Coarse classification of [`FaceError`], used to pick status codes and
/// decide what the user can do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputMissing,
    NoFaceDetected,
    ProviderFailure,
    InsufficientState,
    CameraUnavailable,
    Superseded,
}

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("{0} image is missing")]
    InputMissing(ImageOrigin),
    #[error("no face detected in {origin} image after {attempts} attempt(s)")]
    NoFaceDetected { origin: ImageOrigin, attempts: u32 },
    #[error("face provider failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("verification needs both an uploaded and a captured face")]
    InsufficientState,
    #[error("descriptor dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("capture superseded by a newer request")]
    Superseded,
}

impl FaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FaceError::InputMissing(_) => ErrorKind::InputMissing,
            FaceError::NoFaceDetected { .. } => ErrorKind::NoFaceDetected,
            // A provider that breaks the fixed-length contract is a provider fault.
            FaceError::Provider(_) | FaceError::DimensionMismatch { .. } => {
                ErrorKind::ProviderFailure
            }
            FaceError::InsufficientState => ErrorKind::InsufficientState,
            FaceError::CameraUnavailable(_) => ErrorKind::CameraUnavailable,
            FaceError::Superseded => ErrorKind::Superseded,
        }
    }

    /// True when the person in front of the camera can fix the problem.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InputMissing | ErrorKind::NoFaceDetected | ErrorKind::InsufficientState
        )
    }

    /// Message suitable for showing to an end user, with a next step.
    pub fn user_message(&self) -> String {
        match self {
            FaceError::InputMissing(ImageOrigin::Uploaded) => {
                "No photo was uploaded. Please choose a photo to upload.".to_string()
            }
            FaceError::InputMissing(ImageOrigin::Captured) => {
                "No photo was captured. Please capture a photo from the camera.".to_string()
            }
            FaceError::NoFaceDetected { origin: ImageOrigin::Uploaded, .. } => {
                "No face detected in the uploaded image. Please upload a photo with a clear, visible face."
                    .to_string()
            }
            FaceError::NoFaceDetected { origin: ImageOrigin::Captured, .. } => {
                "No face detected in the captured image. Please face the camera and try again."
                    .to_string()
            }
            FaceError::Provider(ProviderError::Decode(_) | ProviderError::EmptyImage) => {
                "The image could not be read. Please upload a JPEG or PNG photo.".to_string()
            }
            FaceError::Provider(_) | FaceError::DimensionMismatch { .. } => {
                "The photos could not be processed right now. Please try again.".to_string()
            }
            FaceError::InsufficientState => {
                "Please upload an image and capture a face before verifying.".to_string()
            }
            FaceError::CameraUnavailable(detail) => format!(
                "Could not access the camera ({detail}). Check that a camera is connected and that you have permission to use it."
            ),
            FaceError::Superseded => "A newer capture replaced this one.".to_string(),
        }
    }
}
