//! Fixed-length embedding vector.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// A dense `f32` vector produced by an embedding model.
///
/// The dimension is fixed at construction. Vectors from one provider instance
/// always share the same dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Wrap raw values.
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// Number of components.
    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    /// Borrow the components.
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Consume into the raw values.
    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Dot product. Fails if the dimensions differ.
    pub fn dot(&self, other: &Embedding) -> Result<f32> {
        self.check_dimension(other)?;
        Ok(self.0.iter().zip(&other.0).map(|(a, b)| a * b).sum())
    }

    /// Euclidean (L2) norm.
    pub fn norm(&self) -> f32 {
        self.0.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Return a copy scaled to unit length. Zero vectors are returned as-is.
    pub fn normalized(&self) -> Embedding {
        let norm = self.norm();
        if norm > 0.0 && norm.is_finite() {
            Embedding(self.0.iter().map(|x| x / norm).collect())
        } else {
            self.clone()
        }
    }

    /// Cosine similarity: `dot / (|a| * |b|)`.
    ///
    /// Returns [`RagError::DegenerateVector`] when either norm is zero or not
    /// finite, and [`RagError::DimensionMismatch`] when the dimensions differ.
    pub fn cosine_similarity(&self, other: &Embedding) -> Result<f32> {
        let dot = self.dot(other)?;
        let denom = self.norm() * other.norm();
        if denom == 0.0 || !denom.is_finite() {
            return Err(RagError::DegenerateVector);
        }
        Ok(dot / denom)
    }

    /// The first `n` components, for display.
    pub fn preview(&self, n: usize) -> &[f32] {
        &self.0[..n.min(self.0.len())]
    }

    fn check_dimension(&self, other: &Embedding) -> Result<()> {
        if self.0.len() != other.0.len() {
            return Err(RagError::DimensionMismatch {
                expected: self.0.len(),
                actual: other.0.len(),
            });
        }
        Ok(())
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
