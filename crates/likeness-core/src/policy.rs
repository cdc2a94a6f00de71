//! Verification policy constants.
//!
//! Every tunable number in the verification flow lives here; the service,
//! the CLI and the tests all read the same values. The distance threshold is
//! a constant and is never read from the environment.

use std::time::Duration;

/// Euclidean distance below which two descriptors are the same person.
///
/// 0.6 is the customary cut-off for 128-d dlib-style descriptors. On the
/// unit-length 512-d ArcFace vectors produced here, distance `d` maps to
/// cosine similarity `1 - d²/2`, so 0.6 demands cosine above 0.82. That is
/// stricter than the usual ArcFace operating point (cosine around 0.3 to 0.5),
/// and genuine pairs under poor lighting or pose may be rejected.
pub const VERIFY_DISTANCE_THRESHOLD: f32 = 0.6;

/// Square input resolution fed to the face detector.
pub const DETECTOR_INPUT_SIZE: usize = 320;
/// Minimum detector score for a candidate face.
pub const DETECTOR_SCORE_THRESHOLD: f32 = 0.3;
/// IoU above which overlapping candidates are suppressed.
pub const DETECTOR_NMS_THRESHOLD: f32 = 0.4;

/// Total detection attempts for a freshly captured frame.
pub const RETRY_MAX_ATTEMPTS: u32 = 3;
/// Pause between capture detection attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Cadence of the live guidance check.
pub const GUIDANCE_INTERVAL: Duration = Duration::from_millis(100);
/// Guide ellipse horizontal radius as a fraction of frame width.
pub const GUIDE_RADIUS_X: f32 = 0.35;
/// Guide ellipse vertical radius as a fraction of frame height.
pub const GUIDE_RADIUS_Y: f32 = 0.45;

/// Upper bound on a single provider call.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Face detector tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    pub input_size: usize,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            input_size: DETECTOR_INPUT_SIZE,
            score_threshold: DETECTOR_SCORE_THRESHOLD,
            nms_threshold: DETECTOR_NMS_THRESHOLD,
        }
    }
}

/// Bounded retry for live capture detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            delay: RETRY_DELAY,
        }
    }
}
