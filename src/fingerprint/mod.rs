//! Request fingerprinting.
//!
//! A [`Fingerprint`] pairs a deterministic exact key (SHA-256 over the
//! normalized request) with an optional semantic embedding. Normalization
//! folds case and collapses whitespace, and parameters are serialized in a
//! fixed field order, so byte-different requests that normalize to the same
//! text share an exact key. Anything else relies on embedding similarity.

use crate::embedding::Embedder;
use crate::gateway::Degradation;
use crate::request::{GenerationParams, Request};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

/// Identity of a request for caching and coalescing.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    /// Hex SHA-256 of the normalized request text and parameters
    pub exact_key: String,
    /// Normalized model hint; semantic matches never cross models
    pub model: String,
    /// Semantic embedding, absent when the embedding service is unavailable
    pub embedding: Option<Arc<[f32]>>,
}

impl Fingerprint {
    /// Fingerprint without an embedding (exact-key only).
    pub fn exact_only(exact_key: String, model: &str) -> Self {
        Self {
            exact_key,
            model: normalize_text(model),
            embedding: None,
        }
    }
}

/// Canonicalize free text: lowercase, collapse whitespace runs, trim.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn serialize_params(params: &GenerationParams) -> String {
    fn float(value: Option<f32>) -> String {
        value.map_or_else(|| "none".to_string(), |v| format!("{:.4}", v))
    }

    format!(
        "temperature={};max_tokens={};top_p={}",
        float(params.temperature),
        params
            .max_tokens
            .map_or_else(|| "none".to_string(), |v| v.to_string()),
        float(params.top_p),
    )
}

/// Canonical text fed to the exact-key hash.
pub fn canonical_form(request: &Request) -> String {
    let mut out = String::new();
    out.push_str(&normalize_text(&request.model));
    out.push(FIELD_SEP);
    for message in &request.messages {
        let _ = write!(
            out,
            "{}:{}{}",
            normalize_text(&message.role),
            normalize_text(&message.content),
            RECORD_SEP
        );
    }
    out.push(FIELD_SEP);
    out.push_str(&serialize_params(&request.params));
    out
}

/// Text sent to the embedding service: normalized message contents.
pub fn embedding_text(request: &Request) -> String {
    request
        .messages
        .iter()
        .map(|m| normalize_text(&m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Deterministic exact key for a request.
pub fn exact_key(request: &Request) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_form(request).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Produces fingerprints, delegating embeddings to an optional collaborator.
pub struct Fingerprinter {
    embedder: Option<Arc<dyn Embedder>>,
    timeout: Duration,
}

impl Fingerprinter {
    pub fn new(embedder: Option<Arc<dyn Embedder>>, timeout: Duration) -> Self {
        Self { embedder, timeout }
    }

    /// Exact-key only fingerprinter.
    pub fn exact_only() -> Self {
        Self::new(None, Duration::from_millis(0))
    }

    /// Whether semantic embeddings are configured at all.
    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Fingerprint a request.
    ///
    /// Never fails: an embedding error or timeout yields `embedding = None`.
    pub async fn fingerprint(&self, request: &Request) -> Fingerprint {
        let key = exact_key(request);

        let Some(embedder) = &self.embedder else {
            return Fingerprint::exact_only(key, &request.model);
        };

        let text = embedding_text(request);
        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, embedder.embed(&text)).await;

        let embedding = match result {
            Ok(Ok(vector)) if !vector.is_empty() => {
                metrics::histogram!("meridian_embedding_seconds")
                    .record(start.elapsed().as_secs_f64());
                Some(Arc::<[f32]>::from(vector))
            }
            Ok(Ok(_)) => {
                tracing::warn!(
                    request_id = %request.id,
                    embedder = embedder.name(),
                    "Embedding service returned an empty vector, using exact-key caching only"
                );
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    request_id = %request.id,
                    embedder = embedder.name(),
                    error = %e,
                    "Embedding unavailable, using exact-key caching only"
                );
                None
            }
            Err(_) => {
                tracing::warn!(
                    request_id = %request.id,
                    embedder = embedder.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Embedding timed out, using exact-key caching only"
                );
                None
            }
        };

        if embedding.is_none() {
            Degradation::EmbeddingUnavailable.count();
        }

        Fingerprint {
            exact_key: key,
            model: normalize_text(&request.model),
            embedding,
        }
    }
}
