//! In-memory flat vector index with exact inner-product search.
//!
//! Rows are positional: row `i` always belongs to knowledge entry `i`.
//! Vectors are expected to be L2-normalized so scores are cosine similarities.

/// Flat, row-major vector index. Built once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimensions: usize,
    data: Vec<f32>,
}

/// A single scored row from the index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// Row position in the index
    pub position: usize,
    /// Inner product with the query
    pub score: f32,
}

impl FlatIndex {
    /// Build an index from one vector per row.
    pub fn from_vectors(dimensions: usize, vectors: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        let mut data = Vec::with_capacity(dimensions * vectors.len());
        for vector in vectors {
            if vector.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    got: vector.len(),
                });
            }
            data.extend(vector);
        }
        Ok(Self { dimensions, data })
    }

    /// Build an index from an already flattened buffer (used when loading).
    pub fn from_flat(dimensions: usize, data: Vec<f32>) -> Result<Self, IndexError> {
        if dimensions == 0 {
            if !data.is_empty() {
                return Err(IndexError::ZeroDimensions);
            }
        } else if data.len() % dimensions != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                got: data.len() % dimensions,
            });
        }
        Ok(Self { dimensions, data })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.data.len() / self.dimensions
        }
    }

    /// Raw row-major buffer.
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimensions.max(1))
    }

    /// Score every row against `query` and return the `top_k` best.
    ///
    /// Results are sorted by score, highest first; equal scores keep row order.
    /// `top_k` larger than the index is clamped.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Hit>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let k = top_k.min(self.len());
        if k == 0 {
            return Ok(vec![]);
        }

        let mut hits: Vec<Hit> = self
            .rows()
            .enumerate()
            .map(|(position, row)| Hit {
                position,
                score: dot(query, row),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);

        Ok(hits)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Index with zero dimensions cannot hold vectors")]
    ZeroDimensions,
}
