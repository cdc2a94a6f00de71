//! Embedding provider boundary.
//!
//! The verification core never looks inside a provider: it hands over an
//! image and gets back at most one face with its descriptor.

use crate::detector::FaceDetector;
use crate::error::ProviderError;
use crate::models::{self, DETECTOR_MODEL, RECOGNIZER_MODEL};
use crate::policy::DetectorOptions;
use crate::recognizer::FaceRecognizer;
use crate::types::{Descriptor, FaceDetection, Image};
use std::path::Path;

/// Source of face detections and descriptors.
///
/// `Ok(None)` means the image was processed and holds no face; `Err` is
/// reserved for malformed input and internal failures.
pub trait EmbeddingProvider {
    fn detect(&mut self, image: &Image) -> Result<Option<FaceDetection>, ProviderError>;

    /// Short label for logs and status output.
    fn name(&self) -> &str {
        "embedding-provider"
    }
}

/// Keep only the comparable part of a detection.
pub fn extract_descriptor(detection: FaceDetection) -> Descriptor {
    detection.into_descriptor()
}

/// SCRFD detection followed by ArcFace embedding, both on ONNX Runtime.
pub struct OnnxProvider {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxProvider {
    /// Load both models from `model_dir`, checking their checksums first.
    pub fn load(model_dir: &Path, options: DetectorOptions) -> Result<Self, ProviderError> {
        models::verify_models(model_dir)?;
        let detector = FaceDetector::load(&models::model_path(model_dir, DETECTOR_MODEL), options)?;
        let recognizer = FaceRecognizer::load(&models::model_path(model_dir, RECOGNIZER_MODEL))?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl EmbeddingProvider for OnnxProvider {
    fn detect(&mut self, image: &Image) -> Result<Option<FaceDetection>, ProviderError> {
        let faces = self.detector.detect(image.pixels())?;
        tracing::debug!(origin = %image.origin(), faces = faces.len(), "detector finished");

        // Only the highest-scoring face takes part in verification.
        let Some(face) = faces.into_iter().next() else {
            return Ok(None);
        };

        let descriptor = self.recognizer.extract(image.pixels(), &face.landmarks)?;
        Ok(Some(FaceDetection {
            bounding_box: face.bbox,
            descriptor,
        }))
    }

    fn name(&self) -> &str {
        "onnx-scrfd-arcface"
    }
}
