//! Embedding service collaborator.
//!
//! The gateway treats the embedding model as a black box: text in, vector
//! out. Failures are never fatal; the fingerprinter degrades to exact-key
//! caching when this collaborator is unavailable.

mod http;

pub use http::HttpEmbedder;

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by an embedding service.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded deadline
    #[error("Embedding request timeout after {0}ms")]
    Timeout(u64),

    /// Service returned an error response
    #[error("Embedding service error {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Response did not contain a usable vector
    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),

    /// Client could not be constructed
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Text-to-vector capability.
#[async_trait]
pub trait Embedder: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Embed a single text into a fixed-dimension vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 when dimensions differ or either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}
