//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by greedy NMS. Input is
//! letterboxed into a square of `DetectorOptions::input_size` pixels.

use crate::error::ProviderError;
use crate::policy::DetectorOptions;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_LANDMARKS: usize = 5;

/// A detector candidate: box plus the five alignment landmarks
/// (left eye, right eye, nose, left mouth corner, right mouth corner).
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub landmarks: [(f32, f32); SCRFD_LANDMARKS],
}

/// Maps letterboxed tensor coordinates back to source pixels.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(src_width: u32, src_height: u32, target: usize) -> Self {
        let target = target as f32;
        let scale = (target / src_width as f32).min(target / src_height as f32);
        let new_w = (src_width as f32 * scale).round();
        let new_h = (src_height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((target - new_w) / 2.0).floor(),
            pad_y: ((target - new_h) / 2.0).floor(),
        }
    }

    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// (score, bbox, kps) output indices for one stride.
type StrideOutputs = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    options: DetectorOptions,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD model. `options.input_size` is rounded down to a
    /// multiple of the largest stride.
    pub fn load(model_path: &Path, mut options: DetectorOptions) -> Result<Self, ProviderError> {
        if !model_path.exists() {
            return Err(ProviderError::ModelNotFound(model_path.display().to_string()));
        }

        let largest_stride = SCRFD_STRIDES[SCRFD_STRIDES.len() - 1];
        options.input_size -= options.input_size % largest_stride;
        if options.input_size == 0 {
            return Err(ProviderError::InferenceFailed(format!(
                "detector input size must be at least {largest_stride}"
            )));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(ProviderError::InferenceFailed(format!(
                "SCRFD model needs 9 outputs with landmarks, got {}",
                names.len()
            )));
        }
        let outputs = map_outputs(&names);

        tracing::info!(
            path = %model_path.display(),
            input_size = options.input_size,
            score_threshold = options.score_threshold,
            ?outputs,
            "loaded SCRFD detector"
        );

        Ok(Self {
            session,
            options,
            outputs,
        })
    }

    /// Detect faces, best score first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError> {
        let size = self.options.input_size;
        let (input, letterbox) = letterbox_tensor(image, size);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in SCRFD_STRIDES.iter().zip(self.outputs.iter()) {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| ProviderError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(score_idx, "scores")?;
            let boxes = extract(bbox_idx, "boxes")?;
            let kps = extract(kps_idx, "landmarks")?;

            candidates.extend(decode_stride(
                scores,
                boxes,
                kps,
                stride,
                size,
                &letterbox,
                self.options.score_threshold,
            ));
        }

        Ok(nms(candidates, self.options.nms_threshold))
    }
}

/// Resize into a centered square letterbox and normalize to NCHW floats.
fn letterbox_tensor(image: &RgbImage, size: usize) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height(), size);
    let new_w = ((image.width() as f32 * letterbox.scale).round() as u32).clamp(1, size as u32);
    let new_h = ((image.height() as f32 * letterbox.scale).round() as u32).clamp(1, size as u32);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let (pad_x, pad_y) = (letterbox.pad_x as u32, letterbox.pad_y as u32);
    let tensor = Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        let (x, y) = (x as u32, y as u32);
        let inside = x >= pad_x && y >= pad_y && x - pad_x < new_w && y - pad_y < new_h;
        let value = if inside {
            resized.get_pixel(x - pad_x, y - pad_y)[c] as f32
        } else {
            SCRFD_MEAN
        };
        (value - SCRFD_MEAN) / SCRFD_STD
    });

    (tensor, letterbox)
}

/// Discover the output ordering by tensor name ("score_8", "bbox_16", ...),
/// falling back to the standard [scores, boxes, landmarks] × [8, 16, 32] layout.
fn map_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let by_name: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match by_name {
        Some(found) => [found[0], found[1], found[2]],
        None => {
            tracing::debug!(?names, "SCRFD output names not recognized; using positional layout");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode candidates above `threshold` for one stride level.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<DetectedFace> {
    let grid = input_size / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors.min(scores.len()))
        .filter(|&idx| scores[idx] >= threshold)
        .filter_map(|idx| {
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * step;
            let ay = (cell / grid) as f32 * step;

            let b = boxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(ax - b[0] * step, ay - b[1] * step);
            let (x2, y2) = letterbox.unmap(ax + b[2] * step, ay + b[3] * step);

            let k = kps.get(idx * 10..idx * 10 + 10)?;
            let landmarks: [(f32, f32); SCRFD_LANDMARKS] = std::array::from_fn(|i| {
                letterbox.unmap(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step)
            });

            Some(DetectedFace {
                bbox: BoundingBox {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                    confidence: scores[idx],
                },
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output sorted by descending score.
fn nms(mut faces: Vec<DetectedFace>, iou_threshold: f32) -> Vec<DetectedFace> {
    faces.sort_by(|a, b| b.bbox.confidence.total_cmp(&a.bbox.confidence));

    let mut kept: Vec<DetectedFace> = Vec::with_capacity(faces.len());
    for face in faces {
        if kept.iter().all(|k| k.bbox.iou(&face.bbox) <= iou_threshold) {
            kept.push(face);
        }
    }
    kept
}
