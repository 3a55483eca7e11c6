//! Execution error types

use crate::provider::ProviderError;
use serde::Serialize;
use thiserror::Error;

/// Why one ranked candidate did not produce the response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptFailure {
    pub provider_id: String,
    /// Short failure label (`timeout`, `upstream`, `probe_in_flight`, ...)
    pub kind: String,
    pub reason: String,
    /// False when the candidate was skipped without a call
    pub attempted: bool,
}

impl AttemptFailure {
    pub(crate) fn from_error(provider_id: &str, error: &ProviderError) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            kind: error.kind().to_string(),
            reason: error.to_string(),
            attempted: true,
        }
    }

    pub(crate) fn skipped(provider_id: &str, kind: &str, reason: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            kind: kind.to_string(),
            reason: reason.into(),
            attempted: false,
        }
    }
}

/// Errors from walking the ranked candidates.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    /// Every candidate failed, or the attempt limit was reached
    #[error("all providers exhausted after {} attempt(s)", count_attempted(.attempts))]
    Exhausted { attempts: Vec<AttemptFailure> },

    /// A provider failed in a way another provider would repeat
    #[error("provider {provider_id} failed: {error}")]
    ProviderFailure {
        provider_id: String,
        error: ProviderError,
        attempts: Vec<AttemptFailure>,
    },
}

fn count_attempted(attempts: &[AttemptFailure]) -> usize {
    attempts.iter().filter(|a| a.attempted).count()
}

impl ExecutionError {
    pub fn attempts(&self) -> &[AttemptFailure] {
        match self {
            Self::Exhausted { attempts } | Self::ProviderFailure { attempts, .. } => attempts,
        }
    }
}
