//! Routing decision types.

use super::scoring::ScoreBreakdown;
use crate::advisory::AdvisoryOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Budget state of the requesting tenant as seen by routing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPosture {
    #[default]
    WithinBudget,
    /// Over budget under the `cheap-tier-only` policy
    CheapTierOnly,
}

/// Why a provider was filtered out before scoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    ModelUnsupported,
    CircuitOpen,
    CostExceedsLimit { estimated_usd: f64, limit_usd: f64 },
    LatencyExceedsLimit { estimated_ms: f64, limit_ms: u64 },
    OutsideBudgetTier,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModelUnsupported => write!(f, "model not supported"),
            Self::CircuitOpen => write!(f, "circuit open"),
            Self::CostExceedsLimit {
                estimated_usd,
                limit_usd,
            } => write!(
                f,
                "estimated cost ${:.6} exceeds limit ${:.6}",
                estimated_usd, limit_usd
            ),
            Self::LatencyExceedsLimit {
                estimated_ms,
                limit_ms,
            } => write!(
                f,
                "latency estimate {:.0}ms exceeds limit {}ms",
                estimated_ms, limit_ms
            ),
            Self::OutsideBudgetTier => write!(f, "not in cheap tier while over budget"),
        }
    }
}

/// A provider excluded from ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exclusion {
    pub provider_id: String,
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

/// A ranked, eligible provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub provider_id: String,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub estimated_cost_usd: f64,
    /// Reachable only as the single post-cool-down probe
    pub probe: bool,
}

/// Ordered candidates for one request. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub exact_key: String,
    pub model: String,
    pub candidates: Vec<RankedCandidate>,
    pub excluded: Vec<Exclusion>,
    pub advisory: AdvisoryOutcome,
    pub posture: BudgetPosture,
    pub decided_at: DateTime<Utc>,
}

impl RoutingDecision {
    pub fn provider_ids(&self) -> Vec<&str> {
        self.candidates
            .iter()
            .map(|c| c.provider_id.as_str())
            .collect()
    }

    pub fn top(&self) -> Option<&RankedCandidate> {
        self.candidates.first()
    }
}
