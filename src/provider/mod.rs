//! Provider capability.
//!
//! Every upstream text-generation service is reached through the narrow
//! [`Provider`] trait. Providers share no state; the registry owns their
//! health and the ledger owns their spend.

mod error;
mod http;

pub use error::ProviderError;
pub use http::HttpProvider;

use crate::request::{Request, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A completed generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,
    /// Model that actually served the request
    pub model: String,
    pub usage: TokenUsage,
}

/// Uniform call interface implemented once per upstream protocol.
///
/// Object-safe and used as `Arc<dyn Provider>`. Implementations must be
/// cancellation-safe: dropping the future abandons the in-flight request.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Identifier, unique within the registry.
    fn id(&self) -> &str;

    /// Execute a non-streaming generation.
    async fn call(&self, request: &Request) -> Result<ProviderResponse, ProviderError>;

    /// Lightweight liveness check used by the active prober.
    async fn probe(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
