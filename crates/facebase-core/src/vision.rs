//! Interfaces to the external vision stack.
//!
//! The core never touches a detection or embedding model directly. Callers
//! inject an implementation of [`FaceEmbedder`] (and optionally an
//! [`ImageSource`]) and own its lifecycle.

use crate::types::{BoundingBox, Descriptor};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Error reported by an external collaborator, passed through untranslated.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Detector trade-off between speed and recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Cheap detector, good enough for frontal faces in query images.
    Fast,
    /// Expensive detector, used when building the reference database.
    #[default]
    Accurate,
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionMode::Fast => f.write_str("fast"),
            DetectionMode::Accurate => f.write_str("accurate"),
        }
    }
}

impl FromStr for DetectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" | "hog" => Ok(DetectionMode::Fast),
            "accurate" | "cnn" => Ok(DetectionMode::Accurate),
            other => Err(format!("unknown detection mode '{other}' (expected fast or accurate)")),
        }
    }
}

/// A face found in an image together with its descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetection {
    pub bounding_box: BoundingBox,
    pub descriptor: Descriptor,
}

/// Detection + embedding capability.
pub trait FaceEmbedder {
    /// Find every face in `image` and compute its descriptor.
    ///
    /// `upsampling` asks the detector to look at a larger version of the
    /// image so small faces are found. An image without faces yields an
    /// empty vector.
    fn detect_and_embed(
        &mut self,
        image: &DynamicImage,
        mode: DetectionMode,
        upsampling: u32,
    ) -> Result<Vec<FaceDetection>, CollaboratorError>;
}

impl<E: FaceEmbedder + ?Sized> FaceEmbedder for &mut E {
    fn detect_and_embed(
        &mut self,
        image: &DynamicImage,
        mode: DetectionMode,
        upsampling: u32,
    ) -> Result<Vec<FaceDetection>, CollaboratorError> {
        (**self).detect_and_embed(image, mode, upsampling)
    }
}

/// Supplies decoded images by path.
pub trait ImageSource {
    fn open(&self, path: &Path) -> Result<DynamicImage, CollaboratorError>;
}

/// Decodes images from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsImageSource;

impl ImageSource for FsImageSource {
    fn open(&self, path: &Path) -> Result<DynamicImage, CollaboratorError> {
        Ok(image::open(path)?)
    }
}
