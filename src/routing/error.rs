//! Error types for routing failures

use super::decision::Exclusion;
use thiserror::Error;

/// Errors that can occur during provider ranking
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoutingError {
    /// Every registered provider was filtered out
    #[error("No eligible provider for model '{model}' ({} excluded)", excluded.len())]
    NoEligibleProvider {
        model: String,
        excluded: Vec<Exclusion>,
    },
}
