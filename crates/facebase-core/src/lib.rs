//! facebase-core — Reference face database and nearest-neighbour matching.
//!
//! Builds a flat table of face descriptors from a directory of labelled
//! images, persists it as CSV, and labels fresh descriptors with the closest
//! stored identity. Detection and embedding are supplied by the caller
//! through [`FaceEmbedder`].

pub mod builder;
pub mod codec;
pub mod matcher;
pub mod types;
pub mod vision;

pub use builder::{build_database, BuildError, BuildOptions, DatabaseBuilder};
pub use codec::{decode, encode, load, save, CodecError};
pub use matcher::{recognize, recognize_with, EuclideanMatcher, MatchError, Matcher};
pub use types::{
    BoundingBox, Database, Descriptor, DescriptorError, FaceRecord, InvalidRecord, MatchResult,
    UNKNOWN_LABEL,
};
pub use vision::{
    CollaboratorError, DetectionMode, FaceDetection, FaceEmbedder, FsImageSource, ImageSource,
};
