//! Error types for provider calls.

use crate::request::TokenUsage;
use thiserror::Error;

/// Failure of a single provider call.
///
/// Every variant knows whether another provider may be tried
/// ([`ProviderError::is_retryable`]) and whether the failed call was still
/// billed ([`ProviderError::billed_usage`]).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    /// Network connectivity error (DNS, connection refused, reset)
    #[error("Network error: {0}")]
    Network(String),

    /// Call exceeded its deadline
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    /// Provider returned an error response
    #[error("Provider error {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Response body did not match the expected format
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Provider refused the request itself (content policy, bad input)
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Generation started and was billed but did not complete
    #[error("Incomplete response: {message}")]
    Incomplete { message: String, usage: TokenUsage },

    /// Provider client could not be constructed
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ProviderError {
    /// Whether the orchestrator may fall back to the next candidate.
    ///
    /// Transport failures, timeouts, throttling and 5xx responses are
    /// retryable; a request the provider rejected would be rejected by its
    /// peers as well.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::Incomplete { .. } => true,
            Self::Upstream { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) => true,
            Self::Rejected(_) | Self::Configuration(_) => false,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Upstream { .. } => "upstream",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Rejected(_) => "rejected",
            Self::Incomplete { .. } => "incomplete",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Token usage charged for a failed call, if any.
    pub fn billed_usage(&self) -> Option<TokenUsage> {
        match self {
            Self::Incomplete { usage, .. } => Some(*usage),
            _ => None,
        }
    }
}
