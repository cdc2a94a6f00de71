use crate::error::{FaceError, ProviderError};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Where an image entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageOrigin {
    /// A previously taken photo supplied as a file.
    Uploaded,
    /// A frame grabbed from a live camera stream.
    Captured,
}

impl fmt::Display for ImageOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageOrigin::Uploaded => f.write_str("uploaded"),
            ImageOrigin::Captured => f.write_str("captured"),
        }
    }
}

/// Decoded RGB pixels tagged with their origin.
///
/// Pixel data is shared, so cloning an image for a retry is cheap.
#[derive(Clone)]
pub struct Image {
    pixels: Arc<RgbImage>,
    origin: ImageOrigin,
}

impl Image {
    /// Decode an encoded image (JPEG, PNG, ...) into RGB pixels.
    pub fn decode(bytes: &[u8], origin: ImageOrigin) -> Result<Self, ProviderError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| ProviderError::Decode(format!("{origin} image: {e}")))?;
        Self::from_rgb(decoded.to_rgb8(), origin)
    }

    /// Wrap already-decoded pixels. Rejects zero-sized buffers.
    pub fn from_rgb(pixels: RgbImage, origin: ImageOrigin) -> Result<Self, ProviderError> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(ProviderError::EmptyImage);
        }
        Ok(Self {
            pixels: Arc::new(pixels),
            origin,
        })
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn origin(&self) -> ImageOrigin {
        self.origin
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("origin", &self.origin)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Axis-aligned face box in source image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score in [0, 1].
    pub confidence: f32,
}

impl BoundingBox {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.width * self.height + other.width * other.height - inter;

        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Face embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance to another descriptor of the same length.
    pub fn euclidean_distance(&self, other: &Descriptor) -> Result<f32, FaceError> {
        if self.len() != other.len() || self.is_empty() {
            return Err(FaceError::DimensionMismatch {
                left: self.len(),
                right: other.len(),
            });
        }

        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// The single face the provider reports for an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bounding_box: BoundingBox,
    pub descriptor: Descriptor,
}

impl FaceDetection {
    /// Drop the box and keep only the vector used for comparison.
    pub fn into_descriptor(self) -> Descriptor {
        self.descriptor
    }
}

/// Outcome of comparing two descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub distance: f32,
    pub is_match: bool,
}

impl VerificationResult {
    /// Classify a distance; the boundary itself is not a match.
    pub fn classify(distance: f32, threshold: f32) -> Self {
        Self {
            distance,
            is_match: distance < threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 1.0 }
    }

    #[test]
    fn test_distance_identical() {
        let a = Descriptor::new(vec![0.25, -0.5, 0.75]);
        assert_eq!(a.euclidean_distance(&a.clone()).unwrap(), 0.0);
    }

    #[test]
    fn test_distance_three_four_five() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b).unwrap() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_length_mismatch() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![0.0, 0.0, 0.0]);
        assert!(matches!(
            a.euclidean_distance(&b),
            Err(FaceError::DimensionMismatch { left: 2, right: 3 })
        ));
    }

    #[test]
    fn test_distance_empty_rejected() {
        let a = Descriptor::new(vec![]);
        assert!(a.euclidean_distance(&a.clone()).is_err());
    }

    #[test]
    fn test_classify_boundary_exclusive() {
        assert!(!VerificationResult::classify(0.6, 0.6).is_match);
        assert!(VerificationResult::classify(0.599_999, 0.6).is_match);
        assert!(!VerificationResult::classify(0.8, 0.6).is_match);
    }

    #[test]
    fn test_result_wire_names() {
        let json = serde_json::to_value(VerificationResult::classify(0.0, 0.6)).unwrap();
        assert_eq!(json["isMatch"], true);
        assert_eq!(json["distance"], 0.0);
    }

    #[test]
    fn test_iou_identical() {
        let a = bbox(0.0, 0.0, 100.0, 100.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0);
        // 50 / (100 + 100 - 50)
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(20.0, 20.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_image_rejects_zero_size() {
        let empty = RgbImage::new(0, 10);
        assert!(matches!(
            Image::from_rgb(empty, ImageOrigin::Uploaded),
            Err(ProviderError::EmptyImage)
        ));
    }

    #[test]
    fn test_image_decode_garbage() {
        let err = Image::decode(b"definitely not a jpeg", ImageOrigin::Captured).unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[test]
    fn test_image_decode_png() {
        let mut encoded = Vec::new();
        RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30]))
            .write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Png)
            .unwrap();
        let img = Image::decode(&encoded, ImageOrigin::Uploaded).unwrap();
        assert_eq!((img.width(), img.height()), (4, 3));
        assert_eq!(img.origin(), ImageOrigin::Uploaded);
    }
}
