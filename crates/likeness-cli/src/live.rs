//! Interactive live verification: uploaded photo vs. camera capture.

use anyhow::{Context, Result};
use likeness_core::policy::GUIDANCE_INTERVAL;
use likeness_core::{
    EngineHandle, FaceError, FrameObservation, Guidance, GuideEllipse, GuidanceTask, Image,
    ImageOrigin, ProviderError, VerificationSession,
};
use likeness_hw::{Camera, Frame};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

type LatestFrame = watch::Receiver<Option<Arc<Frame>>>;

/// How long `stop` waits for the camera thread before leaving it behind.
const CAMERA_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Requested capture geometry.
#[derive(Debug, Clone)]
pub struct CameraOptions {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

/// A camera streaming on its own thread; only the newest frame is kept.
pub struct CameraFeed {
    device: String,
    frames: LatestFrame,
    token: CancellationToken,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CameraFeed {
    /// Open the device and start streaming. Fails if the device cannot be opened.
    pub async fn open(
        options: &CameraOptions,
        parent: &CancellationToken,
    ) -> Result<Self, FaceError> {
        let token = parent.child_token();
        let (frames_tx, frames) = watch::channel(None);
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_token = token.clone();
        let CameraOptions { device, width, height } = options.clone();
        let path = device.clone();
        let thread = std::thread::Builder::new()
            .name("likeness-camera".into())
            .spawn(move || {
                let camera = match Camera::open(&path, width, height) {
                    Ok(camera) => camera,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok((camera.width, camera.height)));

                let streamed = camera.stream(|frame| {
                    frames_tx.send_replace(Some(Arc::new(frame)));
                    !thread_token.is_cancelled()
                });
                if let Err(e) = streamed {
                    tracing::warn!(device = %path, error = %e, "camera stream ended");
                }
            })
            .map_err(|e| FaceError::CameraUnavailable(format!("failed to start camera thread: {e}")))?;

        let (w, h) = ready_rx
            .await
            .map_err(|_| FaceError::CameraUnavailable("camera thread exited".into()))?
            .map_err(|e| FaceError::CameraUnavailable(e.to_string()))?;
        tracing::info!(%device, width = w, height = h, "camera feed started");

        Ok(Self {
            device,
            frames,
            token,
            thread: Some(thread),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.frames.borrow().clone()
    }

    /// Stop streaming and wait (bounded) for the device to be released.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(thread) = self.thread.take() {
            if !join_camera_thread(thread, CAMERA_JOIN_TIMEOUT).await {
                tracing::warn!(device = %self.device, "camera thread did not exit; detaching");
            }
        }
    }
}

impl Drop for CameraFeed {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Join `thread` unless it takes longer than `limit`. Returns whether it exited.
async fn join_camera_thread(thread: std::thread::JoinHandle<()>, limit: Duration) -> bool {
    let join = tokio::task::spawn_blocking(move || thread.join());
    tokio::time::timeout(limit, join).await.is_ok()
}

fn frame_image(frame: &Frame) -> Result<Image, FaceError> {
    let pixels = frame
        .clone()
        .into_rgb_image()
        .map_err(|e| ProviderError::Decode(e.to_string()))?;
    Ok(Image::from_rgb(pixels, ImageOrigin::Captured)?)
}

/// Detect on the newest frame for framing feedback.
async fn observe(engine: &EngineHandle, frames: &LatestFrame) -> Result<FrameObservation, FaceError> {
    if frames.has_changed().is_err() {
        return Err(FaceError::CameraUnavailable("camera stream ended".into()));
    }
    let latest = frames.borrow().clone();
    let Some(frame) = latest else {
        return Ok(FrameObservation {
            face: None,
            frame_width: 0,
            frame_height: 0,
        });
    };

    let detection = engine.detect(frame_image(&frame)?).await?;
    Ok(FrameObservation {
        face: detection.map(|d| d.bounding_box),
        frame_width: frame.width,
        frame_height: frame.height,
    })
}

fn start_guidance(engine: &EngineHandle, feed: &CameraFeed) -> GuidanceTask {
    let engine = engine.clone();
    let frames = feed.frames.clone();
    let mut last = None;

    GuidanceTask::spawn(
        GUIDANCE_INTERVAL,
        GuideEllipse::default(),
        &feed.token,
        move || {
            let engine = engine.clone();
            let frames = frames.clone();
            async move { observe(&engine, &frames).await }
        },
        move |guidance: Guidance| {
            if last != Some(guidance) {
                println!("[guide] {}", guidance.message());
                last = Some(guidance);
            }
        },
    )
}

/// The device after `current` in `devices`, wrapping around.
fn next_device(devices: &[String], current: &str) -> Option<String> {
    let after = devices
        .iter()
        .position(|d| d == current)
        .map_or(0, |i| i + 1);
    devices
        .iter()
        .cycle()
        .skip(after)
        .take(devices.len())
        .find(|d| d.as_str() != current)
        .cloned()
}

/// Camera and guidance for one stream; either may be absent after a failure.
struct Stream {
    feed: Option<CameraFeed>,
    guidance: Option<GuidanceTask>,
}

impl Stream {
    async fn start(engine: &EngineHandle, options: &CameraOptions, session: &VerificationSession) -> Self {
        match CameraFeed::open(options, &session.stream_token()).await {
            Ok(feed) => {
                println!("Camera {} ready.", feed.device());
                let guidance = start_guidance(engine, &feed);
                Self {
                    feed: Some(feed),
                    guidance: Some(guidance),
                }
            }
            Err(e) => {
                tracing::warn!(device = %options.device, error = %e, "camera unavailable");
                println!("{}", e.user_message());
                Self {
                    feed: None,
                    guidance: None,
                }
            }
        }
    }

    async fn stop(self) {
        if let Some(guidance) = self.guidance {
            guidance.stop().await;
        }
        if let Some(feed) = self.feed {
            feed.stop().await;
        }
    }
}

async fn load_upload(engine: &EngineHandle, session: &VerificationSession, path: &Path) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let image = Image::decode(&bytes, ImageOrigin::Uploaded).map_err(FaceError::from);
    let result = match image {
        Ok(image) => session.submit_upload(engine, image).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(detection) => {
            println!(
                "Uploaded photo: face found (confidence {:.2}).",
                detection.bounding_box.confidence
            );
            Ok(())
        }
        Err(e) => {
            let message = e.user_message();
            Err(anyhow::Error::new(e).context(message))
        }
    }
}

fn spawn_capture(engine: &EngineHandle, session: &VerificationSession, frame: &Frame) {
    let image = match frame_image(frame) {
        Ok(image) => image,
        Err(e) => {
            println!("{}", e.user_message());
            return;
        }
    };
    println!("Processing captured image...");

    let engine = engine.clone();
    let session = session.clone();
    tokio::spawn(async move {
        match session.submit_capture(&engine, image).await {
            Ok(detection) => println!(
                "Captured photo: face found (confidence {:.2}). Press v to verify.",
                detection.bounding_box.confidence
            ),
            // A newer capture owns the result now.
            Err(FaceError::Superseded) => {}
            Err(e) => println!("{}", e.user_message()),
        }
    });
}

fn print_verification(session: &VerificationSession) {
    match session.verify() {
        Ok(result) if result.is_match => {
            println!("Verified: faces match (distance {:.4}).", result.distance)
        }
        Ok(result) => println!("Not verified: faces differ (distance {:.4}).", result.distance),
        Err(e) => println!("{}", e.user_message()),
    }
}

const HELP: &str = "Commands: Enter = capture, v = verify, s = switch camera, r = restart, q = quit";

/// Run the interactive session until `q` or end of input.
pub async fn run(engine: EngineHandle, uploaded: PathBuf, mut options: CameraOptions) -> Result<()> {
    let session = VerificationSession::default();
    load_upload(&engine, &session, &uploaded).await?;

    let mut stream = Stream::start(&engine, &options, &session).await;
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" | "c" => match stream.feed.as_ref().and_then(CameraFeed::latest) {
                Some(frame) => spawn_capture(&engine, &session, &frame),
                None => println!("No camera frame available yet."),
            },
            "v" => print_verification(&session),
            "s" => {
                let devices: Vec<String> = likeness_hw::list_devices().into_iter().map(|d| d.path).collect();
                let Some(next) = next_device(&devices, &options.device) else {
                    println!("No other camera found.");
                    continue;
                };
                stream.stop().await;
                options.device = next;
                stream = Stream::start(&engine, &options, &session).await;
            }
            "r" => {
                stream.stop().await;
                session.restart();
                println!("Session restarted.");
                load_upload(&engine, &session, &uploaded).await?;
                stream = Stream::start(&engine, &options, &session).await;
            }
            "q" => break,
            "h" | "?" => println!("{HELP}"),
            other => println!("Unknown command {other:?}. {HELP}"),
        }
    }

    stream.stop().await;
    if !session.has_captured() {
        tracing::debug!("session ended without a capture");
    }
    Ok(())
}
