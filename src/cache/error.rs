//! Error types for the semantic cache.

use thiserror::Error;

/// Errors that can occur while writing to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Embedding dimension differs from the index's established dimension
    #[error("embedding dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Caching is disabled by configuration
    #[error("cache disabled")]
    Disabled,
}
