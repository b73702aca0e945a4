//! Exact inner-product vector index with positional ids.
//!
//! Vectors are stored contiguously in insertion order; the position a vector
//! lands at is its id. Search is brute force, which keeps every stored vector
//! exactly reconstructible.

/// Position reported for result rows that have no match.
pub const NO_MATCH: i64 = -1;

/// Search result row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Slot of the matching vector, or [`NO_MATCH`]
    pub position: i64,
    /// Inner product with the query (cosine similarity for normalized vectors)
    pub score: f32,
}

/// Flat, append-only vector index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimensions: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            data: Vec::new(),
        }
    }

    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            dimensions,
            data: Vec::with_capacity(dimensions * capacity),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.data.len() / self.dimensions
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append vectors, assigning them the next positions in order.
    ///
    /// The batch is checked as a whole before anything is appended.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        if self.dimensions == 0 {
            return Err(IndexError::ZeroDimensions);
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: bad.len(),
            });
        }

        self.data.reserve(vectors.len() * self.dimensions);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    /// The `k` highest-scoring positions, best first.
    ///
    /// Always returns `k` rows; rows past the number of stored vectors carry
    /// [`NO_MATCH`] and a score of negative infinity. Equal scores keep
    /// position order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimensions)
            .enumerate()
            .map(|(position, vector)| Neighbor {
                position: position as i64,
                score: inner_product(query, vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        while scored.len() < k {
            scored.push(Neighbor {
                position: NO_MATCH,
                score: f32::NEG_INFINITY,
            });
        }

        Ok(scored)
    }

    /// Exact copy of the vector stored at `position`.
    pub fn reconstruct(&self, position: usize) -> Result<Vec<f32>, IndexError> {
        let len = self.len();
        if position >= len {
            return Err(IndexError::OutOfRange { position, len });
        }
        let start = position * self.dimensions;
        Ok(self.data[start..start + self.dimensions].to_vec())
    }

    /// Raw vector data in position order.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Vector index has zero dimensions")]
    ZeroDimensions,

    #[error("Position {position} is out of range for an index of {len} vectors")]
    OutOfRange { position: usize, len: usize },
}
