//! Descriptor comparison against the fixed distance threshold.

use crate::error::FaceError;
use crate::policy::VERIFY_DISTANCE_THRESHOLD;
use crate::types::{Descriptor, VerificationResult};

/// Compare two descriptors.
pub fn compare(uploaded: &Descriptor, captured: &Descriptor) -> Result<VerificationResult, FaceError> {
    let distance = uploaded.euclidean_distance(captured)?;
    Ok(VerificationResult::classify(distance, VERIFY_DISTANCE_THRESHOLD))
}

/// Compare whatever a session holds so far.
///
/// Missing input is reported as [`FaceError::InsufficientState`], never as a
/// failed verification.
pub fn verify(
    uploaded: Option<&Descriptor>,
    captured: Option<&Descriptor>,
) -> Result<VerificationResult, FaceError> {
    match (uploaded, captured) {
        (Some(uploaded), Some(captured)) => {
            let result = compare(uploaded, captured)?;
            tracing::debug!(
                distance = result.distance,
                is_match = result.is_match,
                threshold = VERIFY_DISTANCE_THRESHOLD,
                "descriptors compared"
            );
            Ok(result)
        }
        _ => Err(FaceError::InsufficientState),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_descriptors_match() {
        let d = Descriptor::new(vec![0.1; 128]);
        let result = verify(Some(&d), Some(&d)).unwrap();
        assert_eq!(result.distance, 0.0);
        assert!(result.is_match);
    }

    #[test]
    fn test_far_descriptors_do_not_match() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![0.48, 0.64]);
        let result = compare(&a, &b).unwrap();
        assert!((result.distance - 0.8).abs() < 1e-6);
        assert!(!result.is_match);
    }

    #[test]
    fn test_close_descriptors_match() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![0.3, 0.4]);
        let result = compare(&a, &b).unwrap();
        assert!((result.distance - 0.5).abs() < 1e-6);
        assert!(result.is_match);
    }

    #[test]
    fn test_missing_descriptor_is_insufficient_state() {
        let d = Descriptor::new(vec![1.0]);
        assert!(matches!(verify(Some(&d), None), Err(FaceError::InsufficientState)));
        assert!(matches!(verify(None, Some(&d)), Err(FaceError::InsufficientState)));
        assert!(matches!(verify(None, None), Err(FaceError::InsufficientState)));
    }

    #[test]
    fn test_dimension_mismatch_not_classified() {
        let a = Descriptor::new(vec![0.0; 128]);
        let b = Descriptor::new(vec![0.0; 512]);
        assert!(matches!(
            verify(Some(&a), Some(&b)),
            Err(FaceError::DimensionMismatch { .. })
        ));
    }

    /// Unit vectors at the given cosine similarity.
    fn unit_pair(cosine: f32) -> (Descriptor, Descriptor) {
        let sine = (1.0 - cosine * cosine).sqrt();
        (Descriptor::new(vec![1.0, 0.0]), Descriptor::new(vec![cosine, sine]))
    }

    #[test]
    fn test_unit_descriptors_need_high_cosine() {
        let (a, b) = unit_pair(0.85);
        assert!(compare(&a, &b).unwrap().is_match);

        let (a, b) = unit_pair(0.75);
        assert!(!compare(&a, &b).unwrap().is_match);
    }
}
