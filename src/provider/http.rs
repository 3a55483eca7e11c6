//! OpenAI-compatible chat completions provider.

use super::{Provider, ProviderError, ProviderResponse};
use crate::request::{Message, Request, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Provider that calls `POST {base_url}/v1/chat/completions`.
pub struct HttpProvider {
    id: String,
    base_url: String,
    /// Upstream model name; the request's model hint is used when unset
    model: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProvider {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        model: Option<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;

        Ok(Self {
            id: id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
            api_key,
            client,
            timeout,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout.as_millis() as u64)
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, request: &Request) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let model = self.model.as_deref().unwrap_or(&request.model);

        let body = ChatRequest {
            model,
            messages: &request.messages,
            temperature: request.params.temperature,
            max_tokens: request.params.max_tokens,
            top_p: request.params.top_p,
            stream: false,
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            // 400/422 mean the request itself is unacceptable
            if status.as_u16() == 400 || status.as_u16() == 422 {
                return Err(ProviderError::Rejected(message));
            }
            return Err(ProviderError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_else(|| TokenUsage {
                prompt_tokens: request.estimated_input_tokens(),
                completion_tokens: 0,
            });

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("no choices".to_string()))?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ProviderError::Rejected(
                "response blocked by content filter".to_string(),
            ));
        }

        let content = choice.message.content.unwrap_or_default();
        if choice.finish_reason.as_deref() == Some("length") && content.is_empty() {
            return Err(ProviderError::Incomplete {
                message: "generation truncated before any content".to_string(),
                usage,
            });
        }

        Ok(ProviderResponse {
            content,
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            usage,
        })
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        let url = format!("{}/v1/models", self.base_url);
        let mut builder = self.client.get(&url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| self.map_send_error(e))?;
        if !response.status().is_success() {
            return Err(ProviderError::Upstream {
                status: response.status().as_u16(),
                message: format!("probe failed: {}", response.status()),
            });
        }
        Ok(())
    }
}
