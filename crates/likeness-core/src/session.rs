//! Per-user verification session.
//!
//! A session holds the uploaded and captured descriptors for one person
//! proving their identity. Every capture gets a generation number and a
//! cancellation token; starting a new capture cancels the previous one, and a
//! capture that finishes after being superseded is discarded instead of
//! overwriting the newer result.

use crate::engine::EngineHandle;
use crate::error::FaceError;
use crate::policy::RetryPolicy;
use crate::retry;
use crate::types::{Descriptor, FaceDetection, Image, ImageOrigin, VerificationResult};
use crate::verify;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

struct SessionState {
    uploaded: Option<Descriptor>,
    captured: Option<Descriptor>,
    /// Bumped by every restart; results from an older epoch are dropped.
    epoch: u64,
    /// Bumped by every capture.
    capture_generation: u64,
    capture_token: Option<CancellationToken>,
    /// Parent of everything tied to the session's capture stream.
    stream_token: CancellationToken,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            uploaded: None,
            captured: None,
            epoch: 0,
            capture_generation: 0,
            capture_token: None,
            stream_token: CancellationToken::new(),
        }
    }
}

/// Cloneable handle to one session's state.
#[derive(Clone, Default)]
pub struct VerificationSession {
    state: Arc<Mutex<SessionState>>,
    retry: RetryPolicy,
}

impl VerificationSession {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            state: Arc::default(),
            retry,
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Process the uploaded photo. A photo without a face is rejected at once.
    pub async fn submit_upload(
        &self,
        engine: &EngineHandle,
        image: Image,
    ) -> Result<FaceDetection, FaceError> {
        check_origin(&image, ImageOrigin::Uploaded)?;
        let epoch = self.state().epoch;

        let detection = engine
            .detect(image)
            .await?
            .ok_or(FaceError::NoFaceDetected {
                origin: ImageOrigin::Uploaded,
                attempts: 1,
            })?;

        let mut state = self.state();
        if state.epoch != epoch {
            return Err(FaceError::Superseded);
        }
        state.uploaded = Some(detection.descriptor.clone());
        tracing::info!(dims = detection.descriptor.len(), "uploaded face stored");
        Ok(detection)
    }

    /// Process a freshly captured frame with bounded retries.
    ///
    /// Any capture already in flight is cancelled, and the previous captured
    /// descriptor is cleared until this one succeeds.
    pub async fn submit_capture(
        &self,
        engine: &EngineHandle,
        image: Image,
    ) -> Result<FaceDetection, FaceError> {
        check_origin(&image, ImageOrigin::Captured)?;
        let (generation, token) = self.begin_capture();

        let result = retry::detect_with_retry(&self.retry, ImageOrigin::Captured, &token, |attempt| {
            let engine = engine.clone();
            let image = image.clone();
            async move {
                tracing::debug!(attempt, generation, "processing captured image");
                engine.detect(image).await
            }
        })
        .await;

        let mut state = self.state();
        if state.capture_generation != generation {
            tracing::debug!(generation, current = state.capture_generation, "discarding stale capture");
            return Err(FaceError::Superseded);
        }
        state.capture_token = None;

        let detection = result?;
        state.captured = Some(detection.descriptor.clone());
        tracing::info!(generation, dims = detection.descriptor.len(), "captured face stored");
        Ok(detection)
    }

    fn begin_capture(&self) -> (u64, CancellationToken) {
        let mut state = self.state();
        if let Some(previous) = state.capture_token.take() {
            previous.cancel();
        }
        state.capture_generation += 1;
        state.captured = None;

        let token = state.stream_token.child_token();
        state.capture_token = Some(token.clone());
        (state.capture_generation, token)
    }

    /// Compare the stored descriptors.
    pub fn verify(&self) -> Result<VerificationResult, FaceError> {
        let state = self.state();
        verify::verify(state.uploaded.as_ref(), state.captured.as_ref())
    }

    /// Forget both descriptors and stop everything tied to the old stream.
    pub fn restart(&self) {
        let mut state = self.state();
        state.stream_token.cancel();
        let epoch = state.epoch + 1;
        let capture_generation = state.capture_generation + 1;
        *state = SessionState {
            epoch,
            capture_generation,
            ..SessionState::default()
        };
        tracing::info!(epoch, "session restarted");
    }

    /// Token cancelled when the session restarts; parent for guidance tasks.
    pub fn stream_token(&self) -> CancellationToken {
        self.state().stream_token.clone()
    }

    pub fn has_uploaded(&self) -> bool {
        self.state().uploaded.is_some()
    }

    pub fn has_captured(&self) -> bool {
        self.state().captured.is_some()
    }
}

fn check_origin(image: &Image, expected: ImageOrigin) -> Result<(), FaceError> {
    if image.origin() != expected {
        // Wrong slot: the expected image was never supplied.
        return Err(FaceError::InputMissing(expected));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::error::ProviderError;
    use crate::provider::EmbeddingProvider;
    use crate::types::BoundingBox;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Red channel of the first pixel picks the outcome: 0 means no face,
    /// anything else becomes a one-element descriptor.
    struct PixelProvider {
        calls: Arc<AtomicUsize>,
    }

    impl EmbeddingProvider for PixelProvider {
        fn detect(&mut self, image: &Image) -> Result<Option<FaceDetection>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let [r, g, _] = image.pixels().get_pixel(0, 0).0;
            if r == 0 {
                return Ok(None);
            }
            Ok(Some(FaceDetection {
                bounding_box: BoundingBox { x: 0.0, y: 0.0, width: 4.0, height: 4.0, confidence: 0.9 },
                descriptor: Descriptor::new(vec![r as f32 / 100.0, g as f32 / 100.0]),
            }))
        }
    }

    fn setup() -> (EngineHandle, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = spawn_engine(PixelProvider { calls: calls.clone() }, Duration::from_secs(5)).unwrap();
        (engine, calls)
    }

    fn image(r: u8, g: u8, origin: ImageOrigin) -> Image {
        Image::from_rgb(RgbImage::from_pixel(4, 4, Rgb([r, g, 0])), origin).unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy { max_attempts: 3, delay: Duration::from_millis(10) }
    }

    #[tokio::test]
    async fn test_identical_faces_verify() {
        let (engine, _) = setup();
        let session = VerificationSession::new(fast_retry());

        session.submit_upload(&engine, image(10, 20, ImageOrigin::Uploaded)).await.unwrap();
        session.submit_capture(&engine, image(10, 20, ImageOrigin::Captured)).await.unwrap();

        let result = session.verify().unwrap();
        assert_eq!(result.distance, 0.0);
        assert!(result.is_match);
    }

    #[tokio::test]
    async fn test_distant_faces_rejected() {
        let (engine, _) = setup();
        let session = VerificationSession::new(fast_retry());

        // (0.10, 0.20) vs (0.58, 0.84): dx = 0.48, dy = 0.64, distance 0.8
        session.submit_upload(&engine, image(10, 20, ImageOrigin::Uploaded)).await.unwrap();
        session.submit_capture(&engine, image(58, 84, ImageOrigin::Captured)).await.unwrap();

        let result = session.verify().unwrap();
        assert!((result.distance - 0.8).abs() < 1e-5, "distance {}", result.distance);
        assert!(!result.is_match);
    }

    #[tokio::test]
    async fn test_capture_without_face_exhausts_retries() {
        let (engine, calls) = setup();
        let session = VerificationSession::new(fast_retry());

        session.submit_upload(&engine, image(10, 20, ImageOrigin::Uploaded)).await.unwrap();
        let before = calls.load(Ordering::SeqCst);

        let err = session
            .submit_capture(&engine, image(0, 0, ImageOrigin::Captured))
            .await
            .unwrap_err();
        assert!(matches!(err, FaceError::NoFaceDetected { origin: ImageOrigin::Captured, attempts: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst) - before, 3);

        // The verification engine is never reached with a missing capture.
        assert!(matches!(session.verify(), Err(FaceError::InsufficientState)));
    }

    #[tokio::test]
    async fn test_upload_without_face_is_terminal() {
        let (engine, calls) = setup();
        let session = VerificationSession::new(fast_retry());

        let err = session
            .submit_upload(&engine, image(0, 0, ImageOrigin::Uploaded))
            .await
            .unwrap_err();
        assert!(matches!(err, FaceError::NoFaceDetected { origin: ImageOrigin::Uploaded, attempts: 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!session.has_uploaded());
    }

    #[tokio::test]
    async fn test_verify_before_inputs() {
        let session = VerificationSession::default();
        assert!(matches!(session.verify(), Err(FaceError::InsufficientState)));
    }

    #[tokio::test]
    async fn test_wrong_origin_rejected() {
        let (engine, calls) = setup();
        let session = VerificationSession::new(fast_retry());

        let err = session
            .submit_upload(&engine, image(10, 20, ImageOrigin::Captured))
            .await
            .unwrap_err();
        assert!(matches!(err, FaceError::InputMissing(ImageOrigin::Uploaded)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_new_capture_supersedes_stale_retry_loop() {
        let (engine, _) = setup();
        let session = VerificationSession::new(RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(200),
        });

        // First capture never finds a face and sits in its retry delay.
        let stale = {
            let session = session.clone();
            let engine = engine.clone();
            tokio::spawn(async move {
                session.submit_capture(&engine, image(0, 0, ImageOrigin::Captured)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let fresh = session
            .submit_capture(&engine, image(30, 40, ImageOrigin::Captured))
            .await
            .unwrap();

        let stale = stale.await.unwrap();
        assert!(matches!(stale, Err(FaceError::Superseded)));
        assert!(session.has_captured());
        assert_eq!(fresh.descriptor.values, vec![0.3, 0.4]);
    }

    #[tokio::test]
    async fn test_restart_clears_state_and_stream() {
        let (engine, _) = setup();
        let session = VerificationSession::new(fast_retry());
        let stream = session.stream_token();

        session.submit_upload(&engine, image(10, 20, ImageOrigin::Uploaded)).await.unwrap();
        session.submit_capture(&engine, image(10, 20, ImageOrigin::Captured)).await.unwrap();
        session.restart();

        assert!(stream.is_cancelled());
        assert!(!session.stream_token().is_cancelled());
        assert!(!session.has_uploaded());
        assert!(!session.has_captured());
        assert!(matches!(session.verify(), Err(FaceError::InsufficientState)));
    }
}
