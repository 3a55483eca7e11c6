//! Nearest-neighbour search over stored embeddings.
//!
//! The cache policy only talks to [`VectorIndex`]; a flat scan is the
//! default implementation and others (trees, hashed buckets) can be swapped
//! in without touching eviction or TTL logic.

use super::CacheError;
use crate::embedding::cosine_similarity;
use std::collections::HashMap;
use std::sync::Arc;

/// A search result: the exact key of a stored entry and its similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub key: String,
    pub similarity: f32,
}

/// Insert / query / evict capability over embeddings keyed by exact key.
///
/// Implementations must be cheap to clone relative to re-embedding: the
/// cache keeps copy-on-write snapshots so readers never observe a partial
/// write.
pub trait VectorIndex: Clone + Default + Send + Sync + 'static {
    /// Insert or replace the embedding for `key`.
    fn insert(&mut self, key: &str, embedding: Arc<[f32]>) -> Result<(), CacheError>;

    /// Remove the embedding for `key`, returning whether it was present.
    fn remove(&mut self, key: &str) -> bool;

    /// All stored keys whose similarity to `query` is at least `min_similarity`.
    fn search(&self, query: &[f32], min_similarity: f32) -> Vec<Neighbor>;

    /// Number of stored embeddings.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimension established by the first insert, if any.
    fn dimension(&self) -> Option<usize>;
}

/// Exhaustive linear-scan index.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    vectors: Vec<(String, Arc<[f32]>)>,
    positions: HashMap<String, usize>,
    dimension: Option<usize>,
}

impl VectorIndex for FlatIndex {
    fn insert(&mut self, key: &str, embedding: Arc<[f32]>) -> Result<(), CacheError> {
        match self.dimension {
            Some(expected) if expected != embedding.len() => {
                return Err(CacheError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
            Some(_) => {}
            None => self.dimension = Some(embedding.len()),
        }

        if let Some(&pos) = self.positions.get(key) {
            self.vectors[pos].1 = embedding;
        } else {
            self.positions.insert(key.to_string(), self.vectors.len());
            self.vectors.push((key.to_string(), embedding));
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> bool {
        let Some(pos) = self.positions.remove(key) else {
            return false;
        };

        self.vectors.swap_remove(pos);
        // The former last element now lives at `pos`
        if let Some((moved_key, _)) = self.vectors.get(pos) {
            self.positions.insert(moved_key.clone(), pos);
        }
        if self.vectors.is_empty() {
            self.dimension = None;
        }
        true
    }

    fn search(&self, query: &[f32], min_similarity: f32) -> Vec<Neighbor> {
        self.vectors
            .iter()
            .filter_map(|(key, vector)| {
                let similarity = cosine_similarity(query, vector);
                (similarity >= min_similarity).then(|| Neighbor {
                    key: key.clone(),
                    similarity,
                })
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}
