//! Bounded detection retry for freshly captured frames.

use crate::error::FaceError;
use crate::policy::RetryPolicy;
use crate::types::{FaceDetection, ImageOrigin};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Run `attempt` until it finds a face, the policy is exhausted, or `token`
/// is cancelled.
///
/// "No face" (`Ok(None)`) is retried after `policy.delay`; any error ends the
/// loop immediately. Exhaustion yields [`FaceError::NoFaceDetected`] and
/// cancellation yields [`FaceError::Superseded`]. The attempt number passed to
/// the closure starts at 1.
pub async fn detect_with_retry<F, Fut>(
    policy: &RetryPolicy,
    origin: ImageOrigin,
    token: &CancellationToken,
    mut attempt: F,
) -> Result<FaceDetection, FaceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<FaceDetection>, FaceError>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for n in 1..=max_attempts {
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(FaceError::Superseded),
            outcome = attempt(n) => outcome?,
        };

        if let Some(detection) = outcome {
            tracing::debug!(%origin, attempt = n, "face detected");
            return Ok(detection);
        }

        if n < max_attempts {
            tracing::debug!(
                %origin,
                attempt = n,
                max_attempts,
                delay_ms = policy.delay.as_millis() as u64,
                "no face detected, retrying"
            );
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(FaceError::Superseded),
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }
    }

    tracing::info!(%origin, attempts = max_attempts, "no face detected after all attempts");
    Err(FaceError::NoFaceDetected {
        origin,
        attempts: max_attempts,
    })
}
