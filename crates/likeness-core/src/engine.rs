//! Dedicated inference thread.
//!
//! Providers hold mutable model sessions, so a single OS thread owns the
//! provider and serves requests in order. Async callers talk to it through a
//! cloneable [`EngineHandle`]; every request carries its own image and reply
//! channel, so nothing about one request is visible to another.

use crate::error::{FaceError, ProviderError};
use crate::provider::EmbeddingProvider;
use crate::types::{FaceDetection, Image};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Depth of the request queue in front of the engine thread.
const ENGINE_QUEUE_DEPTH: usize = 16;

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Detect {
        image: Image,
        reply: oneshot::Sender<Result<Option<FaceDetection>, ProviderError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
    provider: Arc<str>,
}

impl EngineHandle {
    /// Run the provider on one image.
    ///
    /// Exceeding the configured timeout is reported as a provider failure. A
    /// request abandoned while still queued is skipped by the engine thread.
    pub async fn detect(&self, image: Image) -> Result<Option<FaceDetection>, FaceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Detect {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ProviderError::EngineUnavailable("engine thread exited".into()))?;

        let reply = tokio::time::timeout(self.timeout, reply_rx)
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))?
            .map_err(|_| ProviderError::EngineUnavailable("engine dropped the request".into()))?;

        Ok(reply?)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Name of the provider behind this engine.
    pub fn provider(&self) -> &str {
        &self.provider
    }
}

/// Move `provider` onto its own thread and return a handle to it.
///
/// The thread exits once every handle has been dropped.
pub fn spawn_engine<P>(provider: P, timeout: Duration) -> Result<EngineHandle, ProviderError>
where
    P: EmbeddingProvider + Send + 'static,
{
    let name: Arc<str> = Arc::from(provider.name());
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(ENGINE_QUEUE_DEPTH);

    let mut provider = provider;
    std::thread::Builder::new()
        .name("likeness-engine".into())
        .spawn(move || {
            tracing::info!(provider = provider.name(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { image, reply } => {
                        if reply.is_closed() {
                            tracing::debug!(origin = %image.origin(), "engine: caller gone, skipping detect");
                            continue;
                        }
                        let started = std::time::Instant::now();
                        let result = provider.detect(&image);
                        tracing::debug!(
                            origin = %image.origin(),
                            width = image.width(),
                            height = image.height(),
                            found = matches!(result, Ok(Some(_))),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "engine: detect finished"
                        );
                        // The caller may have timed out and gone away.
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(|e| ProviderError::EngineUnavailable(format!("failed to spawn engine thread: {e}")))?;

    Ok(EngineHandle {
        tx,
        timeout,
        provider: name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Descriptor, ImageOrigin};
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Finds a face whenever the first pixel is bright.
    struct BrightnessProvider {
        delay: Duration,
    }

    impl EmbeddingProvider for BrightnessProvider {
        fn detect(&mut self, image: &Image) -> Result<Option<FaceDetection>, ProviderError> {
            std::thread::sleep(self.delay);
            let level = image.pixels().get_pixel(0, 0)[0];
            if level == 0 {
                return Err(ProviderError::InferenceFailed("black frame".into()));
            }
            Ok((level > 128).then(|| FaceDetection {
                bounding_box: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 1.0 },
                descriptor: Descriptor::new(vec![level as f32 / 255.0; 8]),
            }))
        }

        fn name(&self) -> &str {
            "brightness"
        }
    }

    struct CountingProvider {
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl EmbeddingProvider for CountingProvider {
        fn detect(&mut self, _image: &Image) -> Result<Option<FaceDetection>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(None)
        }
    }

    fn image(level: u8) -> Image {
        Image::from_rgb(RgbImage::from_pixel(8, 8, Rgb([level; 3])), ImageOrigin::Captured).unwrap()
    }

    #[tokio::test]
    async fn test_detect_roundtrip() {
        let engine = spawn_engine(BrightnessProvider { delay: Duration::ZERO }, Duration::from_secs(5)).unwrap();
        assert_eq!(engine.provider(), "brightness");

        let found = engine.detect(image(255)).await.unwrap();
        assert!(found.is_some());
        let missing = engine.detect(image(100)).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let engine = spawn_engine(BrightnessProvider { delay: Duration::ZERO }, Duration::from_secs(5)).unwrap();
        let err = engine.detect(image(0)).await.unwrap_err();
        assert!(matches!(err, FaceError::Provider(ProviderError::InferenceFailed(_))));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let engine = spawn_engine(
            BrightnessProvider { delay: Duration::from_millis(300) },
            Duration::from_millis(50),
        )
        .unwrap();
        let err = engine.detect(image(255)).await.unwrap_err();
        assert!(matches!(err, FaceError::Provider(ProviderError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_concurrent_requests_keep_their_own_images() {
        let engine = spawn_engine(BrightnessProvider { delay: Duration::from_millis(5) }, Duration::from_secs(5)).unwrap();

        let (a, b) = tokio::join!(engine.detect(image(200)), engine.detect(image(250)));
        let a = a.unwrap().unwrap().into_descriptor();
        let b = b.unwrap().unwrap().into_descriptor();
        assert!((a.values[0] - 200.0 / 255.0).abs() < 1e-6);
        assert!((b.values[0] - 250.0 / 255.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_abandoned_requests_are_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = spawn_engine(
            CountingProvider { delay: Duration::from_millis(100), calls: calls.clone() },
            Duration::from_millis(150),
        )
        .unwrap();

        let mut burst = tokio::task::JoinSet::new();
        for _ in 0..6 {
            let engine = engine.clone();
            burst.spawn(async move { engine.detect(image(255)).await });
        }
        let mut timed_out = 0;
        while let Some(result) = burst.join_next().await {
            if matches!(result.unwrap(), Err(FaceError::Provider(ProviderError::Timeout(_)))) {
                timed_out += 1;
            }
        }
        assert!(timed_out > 0);

        // Let the engine drain whatever is left in its queue.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(calls.load(Ordering::SeqCst) < 6);

        // Served within the timeout once the backlog is gone.
        assert!(engine.detect(image(255)).await.is_ok());
    }
}
