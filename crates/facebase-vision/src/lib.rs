//! facebase-vision — ONNX face detection and embedding for facebase.
//!
//! Uses SCRFD for detection and ArcFace for descriptors, and exposes both
//! through [`facebase_core::FaceEmbedder`].

pub mod alignment;
pub mod detector;
pub mod recognizer;

pub use detector::{Detection, DetectorError, FaceDetector};
pub use recognizer::{FaceRecognizer, RecognizerError};

use facebase_core::{CollaboratorError, DetectionMode, FaceDetection, FaceEmbedder};
use image::DynamicImage;
use std::path::{Path, PathBuf};

/// SCRFD model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace model file name inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Paths of both models under `model_dir`.
pub fn model_paths(model_dir: &Path) -> (PathBuf, PathBuf) {
    (
        model_dir.join(DETECTOR_MODEL_FILE),
        model_dir.join(RECOGNIZER_MODEL_FILE),
    )
}

/// SCRFD + ArcFace pipeline.
pub struct OnnxFaceEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEmbedder {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self { detector, recognizer }
    }

    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, CollaboratorError> {
        let (detector_path, recognizer_path) = model_paths(model_dir);
        let detector = FaceDetector::load(&detector_path)?;
        let recognizer = FaceRecognizer::load(&recognizer_path)?;
        Ok(Self::new(detector, recognizer))
    }
}

impl FaceEmbedder for OnnxFaceEmbedder {
    fn detect_and_embed(
        &mut self,
        image: &DynamicImage,
        mode: DetectionMode,
        upsampling: u32,
    ) -> Result<Vec<FaceDetection>, CollaboratorError> {
        let rgb = image.to_rgb8();
        let detections = self.detector.detect(&rgb, mode, upsampling)?;

        let mut faces = Vec::with_capacity(detections.len());
        for detection in &detections {
            let Some(bounding_box) = detection.pixel_box(rgb.width(), rgb.height()) else {
                tracing::debug!(score = detection.score, "detection outside image, dropped");
                continue;
            };
            let descriptor = self.recognizer.extract(&rgb, detection)?;
            faces.push(FaceDetection { bounding_box, descriptor });
        }
        Ok(faces)
    }
}
