//! OpenAI-compatible embeddings client.

use super::{Embedder, EmbeddingError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedder that calls `POST {base_url}/v1/embeddings`.
pub struct HttpEmbedder {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpEmbedder {
    /// Create an embedder with its own pooled HTTP client.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| EmbeddingError::Configuration(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            client,
            timeout,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/v1/embeddings", self.base_url);

        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout(self.timeout.as_millis() as u64)
            } else {
                EmbeddingError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EmbeddingError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        let vector = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty data array".to_string()))?;

        if vector.is_empty() {
            return Err(EmbeddingError::InvalidResponse("empty vector".to_string()));
        }

        Ok(vector)
    }
}
