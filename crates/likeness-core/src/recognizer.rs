//! ArcFace face recognizer via ONNX Runtime.
//!
//! Produces L2-normalized 512-dimensional descriptors from aligned 112×112
//! RGB face crops (w600k_r50).

use crate::alignment::{self, ALIGNED_SIZE};
use crate::error::ProviderError;
use crate::types::Descriptor;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;

/// Length of every descriptor this recognizer emits.
pub const DESCRIPTOR_DIM: usize = 512;

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace model.
    pub fn load(model_path: &Path) -> Result<Self, ProviderError> {
        if !model_path.exists() {
            return Err(ProviderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), dim = DESCRIPTOR_DIM, "loaded ArcFace recognizer");
        Ok(Self { session })
    }

    /// Align the face described by `landmarks` and embed it.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        landmarks: &[(f32, f32); 5],
    ) -> Result<Descriptor, ProviderError> {
        let aligned = alignment::align_face(image, landmarks);
        let input = to_tensor(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ProviderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != DESCRIPTOR_DIM {
            return Err(ProviderError::InferenceFailed(format!(
                "expected {DESCRIPTOR_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Descriptor::new(l2_normalize(raw)))
    }
}

fn to_tensor(aligned: &RgbImage) -> Array4<f32> {
    Array4::from_shape_fn((1, 3, ALIGNED_SIZE, ALIGNED_SIZE), |(_, c, y, x)| {
        let value = aligned
            .get_pixel_checked(x as u32, y as u32)
            .map_or(0.0, |p| p[c] as f32);
        (value - ARCFACE_MEAN) / ARCFACE_STD
    })
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}
