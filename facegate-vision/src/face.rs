use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Feature vector produced by the extractor and compared by the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    /// Wraps raw values as-is. No normalization happens here; callers that
    /// accept vectors from the outside must run [`EmbeddingShape::validate`].
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }

    /// Divides every component by the Euclidean norm. A zero vector stays zero.
    pub fn normalized(values: Vec<f32>) -> Self {
        let norm = l2_norm(&values);
        let norm = if norm > 0.0 { norm } else { 1.0 };
        Self::from_vec(values.into_iter().map(|x| x / norm).collect())
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    pub fn norm(&self) -> f32 {
        self.vector.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.iter().copied().collect()
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity of two unit-norm embeddings, i.e. their dot product.
pub fn match_embedding(a: &Embedding, b: &Embedding) -> f32 {
    // Both sides are L2-normalized, so the dot product is the cosine.
    let dot: f32 = a
        .vector
        .iter()
        .zip(b.vector.iter())
        .map(|(x, y)| x * y)
        .sum();

    dot.clamp(-1.0, 1.0)
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShapeError {
    #[error("embedding length mismatch: expected {expected} values, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("embedding value at index {index} is not finite")]
    NonFinite { index: usize },

    #[error("embedding is not unit-norm (norm {norm:.6}, tolerance {tolerance})")]
    NotNormalized { norm: f32, tolerance: f32 },
}

/// Dimension and norm contract shared by enrollment and login.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbeddingShape {
    pub dimension: usize,
    pub norm_tolerance: f32,
}

impl EmbeddingShape {
    pub fn new(dimension: usize, norm_tolerance: f32) -> Self {
        Self {
            dimension,
            norm_tolerance,
        }
    }

    /// Shape produced by a square luminance grid of `grid_size` cells per side.
    pub fn for_grid(grid_size: u32, norm_tolerance: f32) -> Self {
        let side = grid_size as usize;
        Self::new(side * side, norm_tolerance)
    }

    pub fn validate(&self, embedding: &Embedding) -> Result<(), ShapeError> {
        if embedding.dim() != self.dimension {
            return Err(ShapeError::DimensionMismatch {
                expected: self.dimension,
                found: embedding.dim(),
            });
        }

        if let Some(index) = embedding.vector.iter().position(|x| !x.is_finite()) {
            return Err(ShapeError::NonFinite { index });
        }

        let norm = embedding.norm();
        if (norm - 1.0).abs() > self.norm_tolerance {
            return Err(ShapeError::NotNormalized {
                norm,
                tolerance: self.norm_tolerance,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_identical_and_orthogonal() {
        let a = Embedding::normalized(vec![1.0, 0.0, 0.0, 0.0]);
        let b = Embedding::normalized(vec![0.0, 1.0, 0.0, 0.0]);
        assert!((match_embedding(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(match_embedding(&a, &b), 0.0);

        let neg = Embedding::normalized(vec![-1.0, 0.0, 0.0, 0.0]);
        assert!((match_embedding(&a, &neg) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_stays_zero() {
        let zero = Embedding::normalized(vec![0.0; 4]);
        assert_eq!(zero.to_vec(), vec![0.0; 4]);
        assert_eq!(zero.norm(), 0.0);
    }

    #[test]
    fn test_shape_validation() {
        let shape = EmbeddingShape::for_grid(2, 1e-3);
        assert_eq!(shape.dimension, 4);

        let ok = Embedding::normalized(vec![1.0, 2.0, 3.0, 4.0]);
        assert!(shape.validate(&ok).is_ok());

        let short = Embedding::normalized(vec![1.0, 2.0, 3.0]);
        assert_eq!(
            shape.validate(&short),
            Err(ShapeError::DimensionMismatch {
                expected: 4,
                found: 3
            })
        );

        let nan = Embedding::from_vec(vec![f32::NAN, 0.0, 0.0, 0.0]);
        assert_eq!(shape.validate(&nan), Err(ShapeError::NonFinite { index: 0 }));

        let raw = Embedding::from_vec(vec![1.0, 1.0, 0.0, 0.0]);
        assert!(matches!(
            shape.validate(&raw),
            Err(ShapeError::NotNormalized { .. })
        ));

        // A zero vector is never accepted.
        let zero = Embedding::normalized(vec![0.0; 4]);
        assert!(matches!(
            shape.validate(&zero),
            Err(ShapeError::NotNormalized { .. })
        ));
    }
}
