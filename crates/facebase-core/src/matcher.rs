//! Nearest-neighbour identification with a rejection threshold.

use crate::types::{Database, Descriptor, DescriptorError, FaceRecord, MatchResult};
use crate::vision::FaceDetection;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("descriptor dimension mismatch: query has {query} values, database has {database}")]
    DimensionMismatch { query: usize, database: usize },
    #[error("invalid distance threshold {0}: must be finite and non-negative")]
    InvalidThreshold(f32),
    #[error("query face {index}: {source}")]
    InvalidQuery {
        index: usize,
        #[source]
        source: DescriptorError,
    },
}

/// Closest reference record to a probe descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Nearest<'a> {
    pub record: &'a FaceRecord,
    pub distance: f32,
}

/// Strategy for finding the closest reference record to a probe.
pub trait Matcher {
    /// Returns `None` only for an empty database.
    fn nearest<'a>(
        &self,
        probe: &Descriptor,
        database: &'a Database,
    ) -> Result<Option<Nearest<'a>>, MatchError>;
}

/// Linear scan over the whole database using Euclidean distance.
///
/// Ties keep the earliest record in scan order.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn nearest<'a>(
        &self,
        probe: &Descriptor,
        database: &'a Database,
    ) -> Result<Option<Nearest<'a>>, MatchError> {
        let mut best: Option<Nearest<'a>> = None;

        for record in database {
            let distance = probe
                .distance_to(&record.descriptor)
                .ok_or(MatchError::DimensionMismatch {
                    query: probe.len(),
                    database: record.descriptor.len(),
                })?;
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Nearest { record, distance });
            }
        }

        Ok(best)
    }
}

/// Label every query face with the nearest reference identity, or unknown.
///
/// A query is matched only when its nearest record lies within
/// `max_dist_thresh` (inclusive). The nearest record is the only candidate:
/// a farther record is never reported even if it is within the threshold.
pub fn recognize(
    queries: &[FaceDetection],
    database: &Database,
    max_dist_thresh: f32,
) -> Result<Vec<MatchResult>, MatchError> {
    recognize_with(&EuclideanMatcher, queries, database, max_dist_thresh)
}

/// [`recognize`] with a caller-supplied matching strategy.
pub fn recognize_with<M: Matcher + ?Sized>(
    matcher: &M,
    queries: &[FaceDetection],
    database: &Database,
    max_dist_thresh: f32,
) -> Result<Vec<MatchResult>, MatchError> {
    if !max_dist_thresh.is_finite() || max_dist_thresh < 0.0 {
        return Err(MatchError::InvalidThreshold(max_dist_thresh));
    }

    queries
        .iter()
        .enumerate()
        .map(|(index, query)| {
            query
                .descriptor
                .check()
                .map_err(|source| MatchError::InvalidQuery { index, source })?;
            let nearest = matcher.nearest(&query.descriptor, database)?;
            let name = nearest
                .filter(|n| n.distance <= max_dist_thresh)
                .map(|n| n.record.name.clone());
            let result = MatchResult {
                bounding_box: query.bounding_box,
                name,
                distance: nearest.map(|n| n.distance),
            };
            tracing::debug!(
                label = result.label(),
                distance = ?result.distance,
                threshold = max_dist_thresh,
                "query face classified"
            );
            Ok(result)
        })
        .collect()
}
