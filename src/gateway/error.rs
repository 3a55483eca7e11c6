//! Gateway error taxonomy.

use crate::embedding::EmbeddingError;
use crate::orchestrator::{AttemptFailure, ExecutionError};
use crate::provider::ProviderError;
use crate::registry::RegistryError;
use crate::routing::decision::Exclusion;
use crate::routing::error::RoutingError;
use crate::store::StoreError;
use std::fmt::Display;
use thiserror::Error;

/// Failures surfaced to the caller of [`Gateway::handle`](super::Gateway::handle).
///
/// Budget rejection ("not allowed to try") is kept distinct from
/// exhaustion ("nothing worked"). Cloned to every single-flight waiter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("tenant {tenant} is over budget (spent ${spent_usd:.4} of ${cap_usd:.4})")]
    BudgetExceeded {
        tenant: String,
        spent_usd: f64,
        cap_usd: f64,
    },

    #[error("all providers exhausted after {} attempt(s)", attempted(.attempts))]
    AllProvidersExhausted { attempts: Vec<AttemptFailure> },

    #[error("provider {provider_id} failed: {error}")]
    ProviderFailure {
        provider_id: String,
        error: ProviderError,
        attempts: Vec<AttemptFailure>,
    },

    #[error("no eligible provider for model {model}")]
    NoEligibleProvider {
        model: String,
        excluded: Vec<Exclusion>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("request cancelled before a result was produced")]
    Cancelled,
}

fn attempted(attempts: &[AttemptFailure]) -> usize {
    attempts.iter().filter(|a| a.attempted).count()
}

impl GatewayError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::AllProvidersExhausted { .. } => "all_providers_exhausted",
            Self::ProviderFailure { .. } => "provider_failure",
            Self::NoEligibleProvider { .. } => "no_eligible_provider",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<RoutingError> for GatewayError {
    fn from(e: RoutingError) -> Self {
        match e {
            RoutingError::NoEligibleProvider { model, excluded } => {
                Self::NoEligibleProvider { model, excluded }
            }
        }
    }
}

impl From<ExecutionError> for GatewayError {
    fn from(e: ExecutionError) -> Self {
        match e {
            ExecutionError::Exhausted { attempts } => Self::AllProvidersExhausted { attempts },
            ExecutionError::ProviderFailure {
                provider_id,
                error,
                attempts,
            } => Self::ProviderFailure {
                provider_id,
                error,
                attempts,
            },
        }
    }
}

/// Failures that lower decision quality but never reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degradation {
    /// Cache lookup or store failed; treated as a miss
    CacheUnavailable,
    /// No embedding; exact-key caching only
    EmbeddingUnavailable,
    /// Advisor failed or timed out; heuristic routing only
    AdvisoryUnavailable,
}

impl Degradation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheUnavailable => "cache_unavailable",
            Self::EmbeddingUnavailable => "embedding_unavailable",
            Self::AdvisoryUnavailable => "advisory_unavailable",
        }
    }

    /// Count the degradation.
    pub fn count(self) {
        metrics::counter!("meridian_degradations_total", "kind" => self.as_str()).increment(1);
    }

    /// Count and log the degradation.
    pub fn report(self, request_id: &str, cause: &dyn Display) {
        self.count();
        tracing::warn!(
            request_id,
            degradation = self.as_str(),
            error = %cause,
            "Continuing in degraded mode"
        );
    }
}

/// Errors assembling a gateway from configuration.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("provider registration failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("provider client error: {0}")]
    Provider(#[from] ProviderError),

    #[error("embedding client error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
