//! HTTP surface: one-shot `POST /verify` and `GET /status`.

use crate::error::ApiError;
use actix_multipart::form::bytes::Bytes;
use actix_multipart::form::{MultipartForm, MultipartFormConfig};
use actix_multipart::MultipartError;
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use likeness_core::policy::VERIFY_DISTANCE_THRESHOLD;
use likeness_core::provider::extract_descriptor;
use likeness_core::{verify, EngineHandle, ErrorKind, FaceError, Image, ImageOrigin, VerificationResult};
use serde::Serialize;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// Multipart overhead allowed on top of the two photos.
const FORM_SLACK_BYTES: usize = 64 * 1024;

/// Shared across workers; only the engine handle is long-lived.
pub struct AppState {
    pub engine: EngineHandle,
    started: Instant,
}

impl AppState {
    pub fn new(engine: EngineHandle) -> Self {
        Self {
            engine,
            started: Instant::now(),
        }
    }
}

/// Largest accepted photo, per field.
#[derive(Clone, Copy)]
struct UploadLimit(usize);

#[derive(MultipartForm)]
pub struct VerifyForm {
    #[multipart(rename = "uploadedPhoto")]
    uploaded_photo: Option<Bytes>,
    #[multipart(rename = "capturedPhoto")]
    captured_photo: Option<Bytes>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    is_match: bool,
    distance: f32,
    threshold: f32,
}

impl From<VerificationResult> for VerifyResponse {
    fn from(result: VerificationResult) -> Self {
        Self {
            is_match: result.is_match,
            distance: result.distance,
            threshold: VERIFY_DISTANCE_THRESHOLD,
        }
    }
}

#[derive(Serialize)]
struct StatusResponse<'a> {
    status: &'static str,
    version: &'static str,
    provider: &'a str,
    threshold: f32,
    uptime_secs: u64,
}

pub fn configure(cfg: &mut web::ServiceConfig, max_image_bytes: usize) {
    let limit = max_image_bytes
        .saturating_mul(2)
        .saturating_add(FORM_SLACK_BYTES);
    cfg.app_data(web::Data::new(UploadLimit(max_image_bytes)))
    .app_data(
        MultipartFormConfig::default()
            .total_limit(limit)
            .memory_limit(limit)
            .error_handler(multipart_error),
    )
    .route("/verify", web::post().to(verify_photos))
    .route("/status", web::get().to(status));
}

fn multipart_error(err: MultipartError, _req: &HttpRequest) -> actix_web::Error {
    let status = err.status_code();
    tracing::warn!(error = %err, %status, "rejected multipart body");
    ApiError::Multipart {
        status,
        detail: err.to_string(),
    }
    .into()
}

async fn verify_photos(
    state: web::Data<AppState>,
    limit: web::Data<UploadLimit>,
    MultipartForm(form): MultipartForm<VerifyForm>,
) -> Result<HttpResponse, ApiError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("verify", %request_id);

    async move {
        let started = Instant::now();
        match run_verification(&state.engine, form, limit.0).await {
            Ok(result) => {
                tracing::info!(
                    is_match = result.is_match,
                    distance = result.distance,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "verification complete"
                );
                Ok(HttpResponse::Ok().json(VerifyResponse::from(result)))
            }
            Err(err) => {
                log_failure(&err);
                Err(err)
            }
        }
    }
    .instrument(span)
    .await
}

/// Validate both photos, detect both faces, compare.
async fn run_verification(
    engine: &EngineHandle,
    form: VerifyForm,
    max_image_bytes: usize,
) -> Result<VerificationResult, ApiError> {
    let uploaded = form.uploaded_photo.filter(|p| !p.data.is_empty());
    let captured = form.captured_photo.filter(|p| !p.data.is_empty());
    let (Some(uploaded), Some(captured)) = (uploaded, captured) else {
        return Err(ApiError::MissingInput);
    };
    for (photo, origin) in [(&uploaded, ImageOrigin::Uploaded), (&captured, ImageOrigin::Captured)] {
        if photo.data.len() > max_image_bytes {
            return Err(ApiError::TooLarge {
                origin,
                size: photo.data.len(),
                limit: max_image_bytes,
            });
        }
    }

    let uploaded = Image::decode(&uploaded.data, ImageOrigin::Uploaded).map_err(FaceError::from)?;
    let captured = Image::decode(&captured.data, ImageOrigin::Captured).map_err(FaceError::from)?;
    tracing::debug!(?uploaded, ?captured, "photos decoded");

    let (uploaded, captured) = tokio::join!(engine.detect(uploaded), engine.detect(captured));
    let (uploaded, captured) = match (uploaded?, captured?) {
        (Some(uploaded), Some(captured)) => (extract_descriptor(uploaded), extract_descriptor(captured)),
        (uploaded, captured) => {
            tracing::debug!(
                uploaded_face = uploaded.is_some(),
                captured_face = captured.is_some(),
                "face missing"
            );
            return Err(ApiError::NoFace);
        }
    };

    Ok(verify::compare(&uploaded, &captured)?)
}

fn log_failure(err: &ApiError) {
    match err {
        ApiError::Face(face) if face.kind() == ErrorKind::ProviderFailure => {
            tracing::error!(error = %face, "verification failed");
        }
        other => tracing::info!(error = %other, "verification rejected"),
    }
}

async fn status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.engine.provider(),
        threshold: VERIFY_DISTANCE_THRESHOLD,
        uptime_secs: state.started.elapsed().as_secs(),
    })
}
