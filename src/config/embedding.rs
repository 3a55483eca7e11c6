//! Embedding service configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Embedding service used for semantic cache lookups.
///
/// Without a `url` the cache matches exact keys only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible embeddings endpoint
    pub url: Option<String>,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: None,
            model: "text-embedding-3-small".to_string(),
            api_key_env: None,
            timeout_ms: 500,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}
