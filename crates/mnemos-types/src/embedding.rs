//! Embedding-space contract.
//!
//! Every vector in a store has the same dimension `D`, fixed when the store
//! is first initialised. Similarity is squared Euclidean distance: lower is
//! more similar, identical vectors are at distance `0.0`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The vector's length differs from the configured dimension.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("embedding dimension mismatch: expected {expected}, got {actual}")]
pub struct DimensionError {
    pub expected: usize,
    pub actual: usize,
}

/// A dense embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Reject the vector unless it has exactly `expected` components.
    pub fn check_dimension(&self, expected: usize) -> Result<(), DimensionError> {
        if self.0.len() == expected {
            Ok(())
        } else {
            Err(DimensionError {
                expected,
                actual: self.0.len(),
            })
        }
    }

    /// Squared L2 distance to `other`. Both vectors must have the same length.
    pub fn distance(&self, other: &Embedding) -> f32 {
        squared_l2(&self.0, &other.0)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// Squared Euclidean distance between two equal-length vectors.
///
/// Callers are responsible for checking dimensions first; extra components
/// of the longer slice are ignored.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
