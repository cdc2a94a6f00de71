use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use likeness_core::{FaceError, ImageOrigin, ProviderError};
use serde::Serialize;
use thiserror::Error;

/// Failures of the `/verify` endpoint, as seen by the client.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("one or both photos missing")]
    MissingInput,
    #[error("no face detected in one or both images")]
    NoFace,
    #[error("{origin} photo is {size} bytes, limit is {limit}")]
    TooLarge {
        origin: ImageOrigin,
        size: usize,
        limit: usize,
    },
    #[error("unreadable multipart body: {detail}")]
    Multipart { status: StatusCode, detail: String },
    #[error(transparent)]
    Face(#[from] FaceError),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl ApiError {
    pub fn message(&self) -> String {
        match self {
            ApiError::MissingInput => "Both photos are required for verification.".to_string(),
            ApiError::NoFace => "No face detected in one or both images. Please ensure both photos contain clear, visible faces.".to_string(),
            ApiError::TooLarge { .. } => "The photos are too large. Please upload smaller images.".to_string(),
            ApiError::Multipart { status, .. } if *status == StatusCode::PAYLOAD_TOO_LARGE => {
                "The photos are too large. Please upload smaller images.".to_string()
            }
            ApiError::Multipart { .. } => {
                "The upload could not be read. Please send both photos as form fields.".to_string()
            }
            ApiError::Face(e) => e.user_message(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingInput | ApiError::NoFace => StatusCode::BAD_REQUEST,
            ApiError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Multipart { status, .. } => *status,
            // An unreadable image is the caller's to fix.
            ApiError::Face(FaceError::Provider(ProviderError::Decode(_) | ProviderError::EmptyImage)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Face(e) if e.is_user_correctable() => StatusCode::BAD_REQUEST,
            ApiError::Face(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            message: self.message(),
        })
    }
}
