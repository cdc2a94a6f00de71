//! Live framing guidance for the capture stream.
//!
//! The guide is an ellipse centered in the frame. A face counts as framed when
//! the center of its box lies inside or on that ellipse. [`GuidanceTask`] runs
//! the check on a fixed cadence for as long as the capture stream is alive.

use crate::error::{ErrorKind, FaceError};
use crate::policy::{GUIDE_RADIUS_X, GUIDE_RADIUS_Y};
use crate::types::BoundingBox;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Framing target, radii expressed as fractions of the frame size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuideEllipse {
    pub radius_x: f32,
    pub radius_y: f32,
}

impl Default for GuideEllipse {
    fn default() -> Self {
        Self {
            radius_x: GUIDE_RADIUS_X,
            radius_y: GUIDE_RADIUS_Y,
        }
    }
}

impl GuideEllipse {
    /// Whether the face box center falls inside or on the guide.
    pub fn contains(&self, face: &BoundingBox, frame_width: u32, frame_height: u32) -> bool {
        if frame_width == 0 || frame_height == 0 {
            return false;
        }
        let (w, h) = (frame_width as f32, frame_height as f32);
        let rx = self.radius_x * w;
        let ry = self.radius_y * h;
        if rx <= 0.0 || ry <= 0.0 {
            return false;
        }

        let (fx, fy) = face.center();
        let dx = (fx - w / 2.0) / rx;
        let dy = (fy - h / 2.0) / ry;
        dx * dx + dy * dy <= 1.0
    }
}

/// Check a face against the default guide.
pub fn is_within_guide(face: &BoundingBox, frame_width: u32, frame_height: u32) -> bool {
    GuideEllipse::default().contains(face, frame_width, frame_height)
}

/// One look at the live stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameObservation {
    pub face: Option<BoundingBox>,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// Feedback surfaced to the person framing their face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guidance {
    Centered,
    Adjust,
    NoFace,
    /// The camera stream ended; the task stops after reporting this.
    Unavailable,
}

impl Guidance {
    pub fn evaluate(observation: &FrameObservation, guide: &GuideEllipse) -> Self {
        match &observation.face {
            None => Guidance::NoFace,
            Some(face) if guide.contains(face, observation.frame_width, observation.frame_height) => {
                Guidance::Centered
            }
            Some(_) => Guidance::Adjust,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Guidance::Centered => "Face centered. Hold still and capture.",
            Guidance::Adjust => "Move closer and center your face in the oval.",
            Guidance::NoFace => "No face in view. Look at the camera.",
            Guidance::Unavailable => "Camera feed unavailable.",
        }
    }
}

/// Periodic guidance check bound to a capture stream.
///
/// Dropping the task cancels it; [`stop`](Self::stop) also waits for it.
pub struct GuidanceTask {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl GuidanceTask {
    /// Start probing every `interval` until `stream` (or this task) is cancelled.
    ///
    /// `probe` grabs a frame and runs detection; `report` receives each verdict.
    /// Slow probes skip ticks instead of queueing them.
    pub fn spawn<P, Fut, R>(
        interval: Duration,
        guide: GuideEllipse,
        stream: &CancellationToken,
        mut probe: P,
        mut report: R,
    ) -> Self
    where
        P: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<FrameObservation, FaceError>> + Send + 'static,
        R: FnMut(Guidance) + Send + 'static,
    {
        let token = stream.child_token();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let observed = tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    observed = probe() => observed,
                };

                match observed {
                    Ok(observation) => report(Guidance::evaluate(&observation, &guide)),
                    Err(e) if e.kind() == ErrorKind::CameraUnavailable => {
                        tracing::warn!(error = %e, "camera lost; stopping guidance");
                        report(Guidance::Unavailable);
                        break;
                    }
                    // Detection trouble only costs this tick.
                    Err(e) => tracing::warn!(error = %e, "guidance detection failed; skipping tick"),
                }
            }
            tracing::debug!("guidance task stopped");
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the task and wait for it to exit.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for GuidanceTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn face_at(cx: f32, cy: f32) -> BoundingBox {
        BoundingBox { x: cx - 50.0, y: cy - 50.0, width: 100.0, height: 100.0, confidence: 0.9 }
    }

    #[test]
    fn test_centered_face_within_guide() {
        assert!(is_within_guide(&face_at(320.0, 240.0), 640, 480));
    }

    #[test]
    fn test_offset_by_half_width_outside_guide() {
        // Center at x = 640 is 320px right of center; radius_x is 224px.
        assert!(!is_within_guide(&face_at(640.0, 240.0), 640, 480));
    }

    #[test]
    fn test_point_on_ellipse_counts_as_inside() {
        let guide = GuideEllipse { radius_x: 0.25, radius_y: 0.25 };
        // rx = 100 for width 400; center at 200 + 100 lies exactly on the edge.
        assert!(guide.contains(&face_at(300.0, 200.0), 400, 400));
        assert!(!guide.contains(&face_at(301.0, 200.0), 400, 400));
    }

    #[test]
    fn test_vertical_axis_uses_height_radius() {
        // ry = 0.45 * 480 = 216; 200px below center is inside, 230px is not.
        assert!(is_within_guide(&face_at(320.0, 440.0), 640, 480));
        assert!(!is_within_guide(&face_at(320.0, 470.0), 640, 480));
    }

    #[test]
    fn test_diagonal_offset_combines_axes() {
        // Each axis alone is inside (0.8 of the radius) but 0.64 + 0.64 > 1.
        let cx = 320.0 + 0.8 * 224.0;
        let cy = 240.0 + 0.8 * 216.0;
        assert!(!is_within_guide(&face_at(cx, cy), 640, 480));
    }

    #[test]
    fn test_zero_sized_frame() {
        assert!(!is_within_guide(&face_at(0.0, 0.0), 0, 0));
    }

    #[test]
    fn test_evaluate() {
        let guide = GuideEllipse::default();
        let obs = |face| FrameObservation { face, frame_width: 640, frame_height: 480 };
        assert_eq!(Guidance::evaluate(&obs(None), &guide), Guidance::NoFace);
        assert_eq!(
            Guidance::evaluate(&obs(Some(face_at(320.0, 240.0))), &guide),
            Guidance::Centered
        );
        assert_eq!(
            Guidance::evaluate(&obs(Some(face_at(10.0, 10.0))), &guide),
            Guidance::Adjust
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_ticks_until_stopped() {
        let probes = Arc::new(AtomicUsize::new(0));
        let reports = Arc::new(Mutex::new(Vec::new()));
        let stream = CancellationToken::new();

        let counter = probes.clone();
        let sink = reports.clone();
        let task = GuidanceTask::spawn(
            Duration::from_millis(100),
            GuideEllipse::default(),
            &stream,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Ok::<_, FaceError>(FrameObservation {
                        face: Some(face_at(320.0, 240.0)),
                        frame_width: 640,
                        frame_height: 480,
                    })
                }
            },
            move |g| sink.lock().unwrap().push(g),
        );

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(task.is_running());
        task.stop().await;

        let seen = probes.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected at least 3 probes, got {seen}");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(probes.load(Ordering::SeqCst), seen);
        assert!(reports.lock().unwrap().iter().all(|g| *g == Guidance::Centered));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_cancellation_stops_task() {
        let probes = Arc::new(AtomicUsize::new(0));
        let stream = CancellationToken::new();

        let counter = probes.clone();
        let task = GuidanceTask::spawn(
            Duration::from_millis(100),
            GuideEllipse::default(),
            &stream,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Ok::<_, FaceError>(FrameObservation { face: None, frame_width: 640, frame_height: 480 })
                }
            },
            |_| {},
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        stream.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let seen = probes.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(probes.load(Ordering::SeqCst), seen);
        assert!(!task.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_reports_unavailable_and_exits() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        let stream = CancellationToken::new();

        let task = GuidanceTask::spawn(
            Duration::from_millis(100),
            GuideEllipse::default(),
            &stream,
            || async { Err::<FrameObservation, _>(FaceError::CameraUnavailable("unplugged".into())) },
            move |g| sink.lock().unwrap().push(g),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_running());
        assert_eq!(*reports.lock().unwrap(), vec![Guidance::Unavailable]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_error_skips_tick_and_keeps_running() {
        let probes = Arc::new(AtomicUsize::new(0));
        let reports = Arc::new(Mutex::new(Vec::new()));
        let stream = CancellationToken::new();

        let counter = probes.clone();
        let sink = reports.clone();
        let task = GuidanceTask::spawn(
            Duration::from_millis(100),
            GuideEllipse::default(),
            &stream,
            move || {
                let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if first {
                        return Err(FaceError::Provider(ProviderError::Timeout(Duration::from_secs(10))));
                    }
                    Ok(FrameObservation {
                        face: Some(face_at(320.0, 240.0)),
                        frame_width: 640,
                        frame_height: 480,
                    })
                }
            },
            move |g| sink.lock().unwrap().push(g),
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(task.is_running());
        assert!(probes.load(Ordering::SeqCst) >= 2);
        let seen = reports.lock().unwrap().clone();
        assert!(!seen.contains(&Guidance::Unavailable));
        assert!(seen.contains(&Guidance::Centered));
        task.stop().await;
    }
}
