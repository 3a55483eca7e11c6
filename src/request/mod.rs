//! Request and response types shared by every stage of the gateway.
//!
//! A [`Request`] is never mutated once accepted. Stages borrow it; the
//! single-flight task and the late-completion watcher each take their own
//! clone because they can outlive the caller.

use serde::{Deserialize, Serialize};

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }
}

/// Sampling parameters forwarded to providers and folded into the exact key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

/// Hard constraints declared by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Requirements {
    /// Maximum estimated cost in USD a provider may charge for this request
    pub max_cost_usd: Option<f64>,
    /// Maximum latency estimate (EMA) in milliseconds a provider may have
    pub max_latency_ms: Option<u64>,
}

/// An inbound generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, generated when absent
    #[serde(default = "new_request_id")]
    pub id: String,
    pub tenant: String,
    /// Model hint; providers that do not serve it are filtered out
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub params: GenerationParams,
    #[serde(default)]
    pub requirements: Requirements,
    /// Request class used to pick a class-specific similarity threshold and TTL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// Skip cache lookup and store for this request
    #[serde(default)]
    pub bypass_cache: bool,
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Request {
    /// Create a request with a fresh id and default parameters.
    pub fn new(tenant: impl Into<String>, model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            id: new_request_id(),
            tenant: tenant.into(),
            model: model.into(),
            messages,
            params: GenerationParams::default(),
            requirements: Requirements::default(),
            class: None,
            bypass_cache: false,
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_requirements(mut self, requirements: Requirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    /// Total characters across all message contents.
    pub fn content_len(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }

    /// Heuristic input token estimate (1 token ≈ 4 characters).
    pub fn estimated_input_tokens(&self) -> u32 {
        (self.content_len() / 4).max(1) as u32
    }

    /// Check the request is well-formed enough to fingerprint and route.
    pub fn validate(&self) -> Result<(), String> {
        if self.tenant.trim().is_empty() {
            return Err("tenant must not be empty".to_string());
        }
        if self.model.trim().is_empty() {
            return Err("model must not be empty".to_string());
        }
        if self.messages.is_empty() {
            return Err("messages must not be empty".to_string());
        }
        if let Some(max_cost) = self.requirements.max_cost_usd {
            if !max_cost.is_finite() || max_cost < 0.0 {
                return Err("requirements.max_cost_usd must be a non-negative number".to_string());
            }
        }
        Ok(())
    }
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_new_generates_id() {
        let a = Request::new("t", "m", vec![Message::user("hi")]);
        let b = Request::new("t", "m", vec![Message::user("hi")]);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 36);
    }

    #[test]
    fn test_request_validate() {
        let ok = Request::new("acme", "gpt", vec![Message::user("hello")]);
        assert!(ok.validate().is_ok());

        let no_tenant = Request::new(" ", "gpt", vec![Message::user("hello")]);
        assert!(no_tenant.validate().is_err());

        let no_messages = Request::new("acme", "gpt", vec![]);
        assert!(no_messages.validate().is_err());

        let bad_cost = ok.clone().with_requirements(Requirements {
            max_cost_usd: Some(-1.0),
            max_latency_ms: None,
        });
        assert!(bad_cost.validate().is_err());
    }

    #[test]
    fn test_estimated_input_tokens() {
        let request = Request::new("acme", "gpt", vec![Message::user("a".repeat(400))]);
        assert_eq!(request.estimated_input_tokens(), 100);

        let tiny = Request::new("acme", "gpt", vec![Message::user("a")]);
        assert_eq!(tiny.estimated_input_tokens(), 1);
    }

    #[test]
    fn test_request_deserialize_defaults() {
        let json = r#"{
            "tenant": "acme",
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        }"#;
        let request: Request = serde_json::from_str(json).unwrap();
        assert_eq!(request.tenant, "acme");
        assert!(!request.id.is_empty());
        assert!(!request.bypass_cache);
        assert_eq!(request.params, GenerationParams::default());
    }
}
