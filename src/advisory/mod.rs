//! Quality/advisory collaborator.
//!
//! An external recommender may suggest which candidate fits a request best.
//! Its answer is a hint only: routing calls it under a short timeout and
//! falls back to local health and cost scoring whenever it is slow, failing
//! or unsure.

use crate::request::Request;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A provider recommendation with the advisor's confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub provider_id: String,
    pub confidence: f64,
}

/// Errors returned by an advisor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdvisoryError {
    #[error("advisory service unavailable: {0}")]
    Unavailable(String),

    #[error("advisory call timed out after {0}ms")]
    Timeout(u64),

    #[error("advisor recommended unknown provider {0}")]
    UnknownProvider(String),
}

/// Recommendation capability.
#[async_trait]
pub trait Advisor: Send + Sync + 'static {
    /// Recommend one of `candidates` for `request`.
    async fn recommend(
        &self,
        request: &Request,
        candidates: &[String],
    ) -> Result<Recommendation, AdvisoryError>;
}

/// How the advisory step of a routing decision went.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvisoryOutcome {
    /// No advisor configured, or nothing to choose between
    NotConsulted,
    /// Recommendation used in scoring
    Applied { provider_id: String, confidence: f64 },
    /// Recommendation below the confidence floor
    LowConfidence { provider_id: String, confidence: f64 },
    /// Advisor failed or timed out
    Unavailable { reason: String },
}

impl AdvisoryOutcome {
    /// Recommendation that should contribute to scoring, if any.
    pub fn applied(&self) -> Option<(&str, f64)> {
        match self {
            Self::Applied {
                provider_id,
                confidence,
            } => Some((provider_id.as_str(), *confidence)),
            _ => None,
        }
    }
}
