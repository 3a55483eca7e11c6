//! Shared test utilities for Meridian integration tests.
//!
//! Scripted providers, embedders and advisors, plus builders for gateways
//! wired to them.

#![allow(dead_code)]

use async_trait::async_trait;
use meridian::advisory::{Advisor, AdvisoryError, Recommendation};
use meridian::config::GatewayConfig;
use meridian::embedding::{Embedder, EmbeddingError};
use meridian::gateway::{Gateway, GatewayBuilder};
use meridian::provider::{Provider, ProviderError, ProviderResponse};
use meridian::registry::{ProviderCapabilities, ProviderTier};
use meridian::request::{Message, Request, TokenUsage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =============================================================================
// Well-Known Test Constants
// =============================================================================

/// Prompt tokens every mock response reports
pub const PROMPT_TOKENS: u32 = 100;

/// Completion tokens every mock response reports
pub const COMPLETION_TOKENS: u32 = 50;

// =============================================================================
// Providers
// =============================================================================

/// What a mock provider does when called.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(ProviderError),
    Delay(Duration),
    /// Fail only after the delay has elapsed
    FailAfter(Duration, ProviderError),
}

/// Provider whose behavior can be changed mid-test.
pub struct MockProvider {
    id: String,
    behavior: Mutex<Behavior>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(id: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn ok(id: &str) -> Arc<Self> {
        Self::new(id, Behavior::Succeed)
    }

    /// Provider answering with a retryable 503.
    pub fn unavailable(id: &str) -> Arc<Self> {
        Self::new(
            id,
            Behavior::Fail(ProviderError::Upstream {
                status: 503,
                message: "overloaded".to_string(),
            }),
        )
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, request: &Request) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Succeed => {}
            Behavior::Fail(error) => return Err(error),
            Behavior::Delay(delay) => tokio::time::sleep(delay).await,
            Behavior::FailAfter(delay, error) => {
                tokio::time::sleep(delay).await;
                return Err(error);
            }
        }
        Ok(ProviderResponse {
            content: format!("{}: {}", self.id, last_message(request)),
            model: format!("{}-model", self.id),
            usage: TokenUsage {
                prompt_tokens: PROMPT_TOKENS,
                completion_tokens: COMPLETION_TOKENS,
            },
        })
    }
}

fn last_message(request: &Request) -> &str {
    request
        .messages
        .last()
        .map(|m| m.content.as_str())
        .unwrap_or_default()
}

/// Capabilities serving every model at the given per-1k prices.
pub fn caps(input_cost_per_1k: f64, output_cost_per_1k: f64) -> ProviderCapabilities {
    ProviderCapabilities {
        models: vec!["*".to_string()],
        input_cost_per_1k,
        output_cost_per_1k,
        tier: ProviderTier::Standard,
    }
}

pub fn cheap_caps(input_cost_per_1k: f64, output_cost_per_1k: f64) -> ProviderCapabilities {
    ProviderCapabilities {
        tier: ProviderTier::Cheap,
        ..caps(input_cost_per_1k, output_cost_per_1k)
    }
}

/// Cost of one mock response under `caps`.
pub fn response_cost(caps: &ProviderCapabilities) -> f64 {
    caps.estimate_cost(PROMPT_TOKENS, COMPLETION_TOKENS)
}

// =============================================================================
// Embedders and advisors
// =============================================================================

/// Embedder with a fixed text-to-vector table.
///
/// Keys are the normalized embedding text (lowercase, collapsed whitespace).
/// Unknown texts fail like an unavailable service.
pub struct TableEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl TableEmbedder {
    pub fn new(entries: &[(&str, Vec<f32>)]) -> Arc<Self> {
        Arc::new(Self {
            vectors: entries
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    fn name(&self) -> &str {
        "table"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::InvalidResponse(format!("no vector for {:?}", text)))
    }
}

/// Embedder that is always down.
pub struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    fn name(&self) -> &str {
        "down"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Network("connection refused".to_string()))
    }
}

/// Advisor that always recommends the same provider.
pub struct FixedAdvisor {
    pub provider_id: String,
    pub confidence: f64,
}

#[async_trait]
impl Advisor for FixedAdvisor {
    async fn recommend(
        &self,
        _request: &Request,
        _candidates: &[String],
    ) -> Result<Recommendation, AdvisoryError> {
        Ok(Recommendation {
            provider_id: self.provider_id.clone(),
            confidence: self.confidence,
        })
    }
}

// =============================================================================
// Requests and gateways
// =============================================================================

pub fn request(tenant: &str, text: &str) -> Request {
    Request::new(tenant, "chat-model", vec![Message::user(text)])
}

/// Build a gateway over mock providers registered in the given order.
pub async fn gateway(
    config: GatewayConfig,
    providers: &[(Arc<MockProvider>, ProviderCapabilities)],
) -> Gateway {
    builder(config, providers).build().await.unwrap()
}

pub fn builder(
    config: GatewayConfig,
    providers: &[(Arc<MockProvider>, ProviderCapabilities)],
) -> GatewayBuilder {
    providers
        .iter()
        .fold(GatewayBuilder::new(config), |builder, (provider, caps)| {
            builder.provider(Arc::clone(provider) as Arc<dyn Provider>, caps.clone())
        })
}
