use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Label reported for a face with no reference descriptor within threshold.
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("degenerate bounding box ({left}, {top}, {right}, {bottom}): need left < right and top < bottom")]
pub struct InvalidBoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("face descriptor is empty")]
    Empty,
    #[error("descriptor value {value} at position {position} is not finite")]
    NonFinite { position: usize, value: f32 },
}

/// A record rejected by [`Database::new`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidRecord {
    #[error("record {index}: {source}")]
    Descriptor {
        index: usize,
        #[source]
        source: DescriptorError,
    },
    #[error("record {index} has a {found}-dim descriptor, database uses {expected}")]
    InconsistentDescriptor {
        index: usize,
        expected: usize,
        found: usize,
    },
}

impl InvalidRecord {
    /// Position of the offending record in the input.
    pub fn index(&self) -> usize {
        match self {
            InvalidRecord::Descriptor { index, .. }
            | InvalidRecord::InconsistentDescriptor { index, .. } => *index,
        }
    }
}

/// Face rectangle in pixel coordinates of the source image.
///
/// Always satisfies `left < right` and `top < bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
}

impl BoundingBox {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Result<Self, InvalidBoundingBox> {
        if left < right && top < bottom {
            Ok(Self { left, top, right, bottom })
        } else {
            Err(InvalidBoundingBox { left, top, right, bottom })
        }
    }

    pub fn left(&self) -> i32 {
        self.left
    }

    pub fn top(&self) -> i32 {
        self.top
    }

    pub fn right(&self) -> i32 {
        self.right
    }

    pub fn bottom(&self) -> i32 {
        self.bottom
    }

    pub fn width(&self) -> u32 {
        self.right.abs_diff(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.abs_diff(self.top)
    }

    /// `[left, top, right, bottom]`
    pub fn to_array(self) -> [i32; 4] {
        [self.left, self.top, self.right, self.bottom]
    }
}

impl TryFrom<[i32; 4]> for BoundingBox {
    type Error = InvalidBoundingBox;

    fn try_from([left, top, right, bottom]: [i32; 4]) -> Result<Self, Self::Error> {
        Self::new(left, top, right, bottom)
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(bbox: BoundingBox) -> Self {
        bbox.to_array()
    }
}

/// Face embedding vector produced by the recognition model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// A usable descriptor has at least one value and no NaN or infinity.
    pub fn check(&self) -> Result<(), DescriptorError> {
        if self.values.is_empty() {
            return Err(DescriptorError::Empty);
        }
        match self.values.iter().position(|v| !v.is_finite()) {
            Some(position) => Err(DescriptorError::NonFinite {
                position,
                value: self.values[position],
            }),
            None => Ok(()),
        }
    }

    /// Euclidean distance to `other`, or `None` when the lengths differ.
    pub fn distance_to(&self, other: &Descriptor) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        let sum = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>();
        Some(sum.sqrt())
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// One detected face in a reference image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    /// Identity label, shared by every record of the same person.
    pub name: String,
    pub image_path: String,
    pub bounding_box: BoundingBox,
    pub descriptor: Descriptor,
}

/// Reference set of face records. Every descriptor is non-empty, finite and
/// of the same length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Database {
    records: Vec<FaceRecord>,
}

impl Database {
    pub fn new(records: Vec<FaceRecord>) -> Result<Self, InvalidRecord> {
        let expected = records.first().map(|r| r.descriptor.len());
        for (index, record) in records.iter().enumerate() {
            record
                .descriptor
                .check()
                .map_err(|source| InvalidRecord::Descriptor { index, source })?;
            if let Some(expected) = expected.filter(|&e| e != record.descriptor.len()) {
                return Err(InvalidRecord::InconsistentDescriptor {
                    index,
                    expected,
                    found: record.descriptor.len(),
                });
            }
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[FaceRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<FaceRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FaceRecord> {
        self.records.iter()
    }

    /// Descriptor length shared by every record; `None` for an empty database.
    pub fn descriptor_len(&self) -> Option<usize> {
        self.records.first().map(|r| r.descriptor.len())
    }

    /// Number of records per identity, sorted by name.
    pub fn identities(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.name.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

impl<'a> IntoIterator for &'a Database {
    type Item = &'a FaceRecord;
    type IntoIter = std::slice::Iter<'a, FaceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Outcome of matching one query face against a database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub bounding_box: BoundingBox,
    /// Name of the matched identity; `None` when the face is unknown.
    pub name: Option<String>,
    /// Distance to the nearest reference descriptor, absent for an empty database.
    pub distance: Option<f32>,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        self.name.is_some()
    }

    /// Matched name, or [`UNKNOWN_LABEL`].
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}
