//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by NMS. The detector
//! canvas size follows the requested [`DetectionMode`] and upsampling.

use facebase_core::{BoundingBox, DetectionMode};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_SCORE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Canvas side for [`DetectionMode::Fast`].
const FAST_INPUT_SIZE: usize = 320;
/// Canvas side for [`DetectionMode::Accurate`].
const ACCURATE_INPUT_SIZE: usize = 640;
const MAX_INPUT_SIZE: usize = 1280;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download det_10g.onnx from insightface)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty image")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A raw detection in original image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    /// Five-point landmarks: left eye, right eye, nose, left mouth, right mouth.
    pub landmarks: [(f32, f32); 5],
}

impl Detection {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Integer pixel box clamped to the image, or `None` if nothing is left.
    pub fn pixel_box(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let clamp = |v: f32, max: u32| v.round().clamp(0.0, max as f32) as i32;
        BoundingBox::new(
            clamp(self.x1, width),
            clamp(self.y1, height),
            clamp(self.x2, width),
            clamp(self.y2, height),
        )
        .ok()
    }
}

/// Canvas side length for a mode; each upsampling step doubles it.
pub fn input_size(mode: DetectionMode, upsampling: u32) -> usize {
    let base = match mode {
        DetectionMode::Fast => FAST_INPUT_SIZE,
        DetectionMode::Accurate => ACCURATE_INPUT_SIZE,
    };
    let mut size = base;
    for _ in 0..upsampling {
        if size * 2 > MAX_INPUT_SIZE {
            break;
        }
        size *= 2;
    }
    size
}

/// Maps between original image space and the square detector canvas.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: usize,
    pad_y: usize,
    new_w: u32,
    new_h: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, canvas: usize) -> Self {
        let scale = (canvas as f32 / width as f32).min(canvas as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, canvas as u32);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, canvas as u32);
        Self {
            scale,
            pad_x: (canvas - new_w as usize) / 2,
            pad_y: (canvas - new_h as usize) / 2,
            new_w,
            new_h,
        }
    }

    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Output tensor positions for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideSlots {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    slots: [StrideSlots; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps for 3 strides), model has {}",
                names.len()
            )));
        }

        let slots = output_slots(&names);
        tracing::info!(path = %model_path.display(), outputs = ?names, ?slots, "loaded SCRFD model");

        Ok(Self { session, slots })
    }

    /// Detect faces, highest score first.
    pub fn detect(
        &mut self,
        image: &RgbImage,
        mode: DetectionMode,
        upsampling: u32,
    ) -> Result<Vec<Detection>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::EmptyImage);
        }

        let canvas = input_size(mode, upsampling);
        let (input, letterbox) = preprocess(image, canvas);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slots, &stride) in self.slots.iter().zip(SCRFD_STRIDES.iter()) {
            let tensor = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = tensor(slots.score, "scores")?;
            let bboxes = tensor(slots.bbox, "bboxes")?;
            let kps = tensor(slots.kps, "kps")?;
            candidates.extend(decode_stride(scores, bboxes, kps, stride, canvas, &letterbox));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(
            faces = faces.len(),
            canvas,
            %mode,
            width = image.width(),
            height = image.height(),
            "SCRFD detection"
        );
        Ok(faces)
    }
}

/// Letterbox `image` onto a `canvas`×`canvas` NCHW tensor.
fn preprocess(image: &RgbImage, canvas: usize) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height(), canvas);
    let resized = imageops::resize(image, letterbox.new_w, letterbox.new_h, FilterType::Triangle);

    // Padding stays at 0.0, i.e. SCRFD_MEAN after normalisation.
    let mut tensor = Array4::<f32>::zeros((1, 3, canvas, canvas));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (cx, cy) = (x as usize + letterbox.pad_x, y as usize + letterbox.pad_y);
        for c in 0..3 {
            tensor[[0, c, cy, cx]] = (f32::from(pixel[c]) - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Match outputs by name ("score_8", "bbox_16", ...), falling back to the
/// standard export order: scores 0-2, bboxes 3-5, kps 6-8.
fn output_slots(names: &[String]) -> [StrideSlots; 3] {
    let find = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let named: Option<Vec<StrideSlots>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideSlots {
                score: find("score", stride)?,
                bbox: find("bbox", stride)?,
                kps: find("kps", stride)?,
            })
        })
        .collect();

    match named.as_deref() {
        Some(&[a, b, c]) => [a, b, c],
        _ => {
            tracing::info!(?names, "SCRFD output names not recognised, using positional layout");
            std::array::from_fn(|i| StrideSlots { score: i, bbox: i + 3, kps: i + 6 })
        }
    }
}

/// Decode the anchors of one stride level above the score threshold.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    canvas: usize,
    letterbox: &Letterbox,
) -> Vec<Detection> {
    let cells_x = canvas / stride;
    let anchors = (canvas / stride) * cells_x * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= SCRFD_SCORE_THRESHOLD {
                return None;
            }
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % cells_x) as f32 * step;
            let ay = (cell / cells_x) as f32 * step;

            let d = bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(ax - d[0] * step, ay - d[1] * step);
            let (x2, y2) = letterbox.unmap(ax + d[2] * step, ay + d[3] * step);

            let k = kps.get(idx * 10..idx * 10 + 10)?;
            let landmarks = std::array::from_fn(|i| {
                letterbox.unmap(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step)
            });

            Some(Detection { x1, y1, x2, y2, score, landmarks })
        })
        .collect()
}

/// Greedy non-maximum suppression; output sorted by descending score.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let iw = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let ih = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = iw * ih;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
