//! Routing engine for ranking providers
//!
//! Providers are hard-filtered on model support, circuit state, budget tier
//! and the request's declared cost/latency limits, then scored by a
//! weighted sum of cost, health and an optional advisory recommendation.
//! The advisory call is bounded by a short timeout and never blocks
//! ranking; any failure falls back to the deterministic cost+health score.

use std::sync::Arc;
use std::time::Duration;

pub mod decision;
pub mod error;
pub mod scoring;

pub use decision::{BudgetPosture, Exclusion, ExclusionReason, RankedCandidate, RoutingDecision};
pub use error::RoutingError;
pub use scoring::{ScoreBreakdown, ScoringWeights};

use crate::advisory::{AdvisoryError, AdvisoryOutcome, Advisor};
use crate::config::RoutingConfig;
use crate::gateway::Degradation;
use crate::health::{HealthSnapshot, HealthTracker, ProviderStatus};
use crate::registry::{ProviderRecord, ProviderRegistry, ProviderTier};
use crate::request::Request;
use tokio::time::Instant;

struct Eligible<'a> {
    record: &'a ProviderRecord,
    health: HealthSnapshot,
    estimated_cost: f64,
}

/// Router ranks providers for each request
pub struct Router {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
    advisor: Option<Arc<dyn Advisor>>,
    weights: ScoringWeights,
    config: RoutingConfig,
}

impl Router {
    /// Create a new router with the given configuration
    pub fn new(
        registry: Arc<ProviderRegistry>,
        health: Arc<HealthTracker>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            registry,
            health,
            advisor: None,
            weights: config.weights.into(),
            config,
        }
    }

    /// Attach an advisory collaborator
    pub fn with_advisor(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Expected completion tokens for cost estimation.
    pub fn estimated_output_tokens(&self, request: &Request) -> u32 {
        request.params.max_tokens.unwrap_or_else(|| {
            let estimate = request.estimated_input_tokens() as f64 * self.config.output_token_ratio;
            estimate.ceil() as u32
        })
    }

    /// Estimated USD cost of sending `request` to `record`.
    pub fn estimate_cost(&self, record: &ProviderRecord, request: &Request) -> f64 {
        record.capabilities.estimate_cost(
            request.estimated_input_tokens(),
            self.estimated_output_tokens(request),
        )
    }

    /// Rank eligible providers for a request.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::NoEligibleProvider` with every exclusion when
    /// no provider survives the hard filters.
    pub async fn rank(
        &self,
        request: &Request,
        exact_key: &str,
        posture: BudgetPosture,
    ) -> Result<RoutingDecision, RoutingError> {
        let (eligible, excluded) = self.filter(request, posture);

        if eligible.is_empty() {
            tracing::warn!(
                model = %request.model,
                excluded = excluded.len(),
                "No eligible provider"
            );
            return Err(RoutingError::NoEligibleProvider {
                model: request.model.clone(),
                excluded,
            });
        }

        let advisory = self.consult_advisor(request, &eligible).await;
        let candidates = self.score(request, &eligible, &advisory);

        tracing::debug!(
            model = %request.model,
            ranked = ?candidates.iter().map(|c| c.provider_id.as_str()).collect::<Vec<_>>(),
            excluded = excluded.len(),
            "Providers ranked"
        );

        Ok(RoutingDecision {
            exact_key: exact_key.to_string(),
            model: request.model.clone(),
            candidates,
            excluded,
            advisory,
            posture,
            decided_at: chrono::Utc::now(),
        })
    }

    fn filter(
        &self,
        request: &Request,
        posture: BudgetPosture,
    ) -> (Vec<Eligible<'_>>, Vec<Exclusion>) {
        let now = Instant::now();
        let mut eligible = Vec::new();
        let mut excluded = Vec::new();

        for record in self.registry.iter() {
            let exclude = |reason| Exclusion {
                provider_id: record.id.clone(),
                reason,
            };

            if !record.capabilities.supports_model(&request.model) {
                excluded.push(exclude(ExclusionReason::ModelUnsupported));
                continue;
            }
            if posture == BudgetPosture::CheapTierOnly
                && record.capabilities.tier != ProviderTier::Cheap
            {
                excluded.push(exclude(ExclusionReason::OutsideBudgetTier));
                continue;
            }

            let health = {
                let state = record.health();
                if !state.is_selectable(now, self.health.config()) {
                    drop(state);
                    excluded.push(exclude(ExclusionReason::CircuitOpen));
                    continue;
                }
                state.snapshot(now)
            };

            let estimated_cost = self.estimate_cost(record, request);
            if let Some(limit) = request.requirements.max_cost_usd {
                if estimated_cost > limit {
                    excluded.push(exclude(ExclusionReason::CostExceedsLimit {
                        estimated_usd: estimated_cost,
                        limit_usd: limit,
                    }));
                    continue;
                }
            }
            if let (Some(limit), Some(latency)) =
                (request.requirements.max_latency_ms, health.latency_ema_ms)
            {
                if latency > limit as f64 {
                    excluded.push(exclude(ExclusionReason::LatencyExceedsLimit {
                        estimated_ms: latency,
                        limit_ms: limit,
                    }));
                    continue;
                }
            }

            eligible.push(Eligible {
                record,
                health,
                estimated_cost,
            });
        }

        (eligible, excluded)
    }

    async fn consult_advisor(&self, request: &Request, eligible: &[Eligible<'_>]) -> AdvisoryOutcome {
        let Some(advisor) = &self.advisor else {
            return AdvisoryOutcome::NotConsulted;
        };
        if eligible.len() < 2 {
            return AdvisoryOutcome::NotConsulted;
        }

        let ids: Vec<String> = eligible.iter().map(|e| e.record.id.clone()).collect();
        let timeout = Duration::from_millis(self.config.advisory_timeout_ms);

        let result = match tokio::time::timeout(timeout, advisor.recommend(request, &ids)).await {
            Ok(result) => result,
            Err(_) => Err(AdvisoryError::Timeout(self.config.advisory_timeout_ms)),
        };

        let outcome = match result {
            Ok(rec) if !ids.contains(&rec.provider_id) => AdvisoryOutcome::Unavailable {
                reason: AdvisoryError::UnknownProvider(rec.provider_id).to_string(),
            },
            Ok(rec) if rec.confidence < self.config.min_advisory_confidence => {
                AdvisoryOutcome::LowConfidence {
                    provider_id: rec.provider_id,
                    confidence: rec.confidence,
                }
            }
            Ok(rec) => AdvisoryOutcome::Applied {
                provider_id: rec.provider_id,
                confidence: rec.confidence.clamp(0.0, 1.0),
            },
            Err(e) => AdvisoryOutcome::Unavailable {
                reason: e.to_string(),
            },
        };

        match &outcome {
            AdvisoryOutcome::Unavailable { reason } => {
                Degradation::AdvisoryUnavailable.count();
                tracing::warn!(
                    request_id = %request.id,
                    reason = %reason,
                    "Advisory unavailable, using heuristic ranking"
                );
            }
            AdvisoryOutcome::LowConfidence {
                provider_id,
                confidence,
            } => {
                tracing::debug!(
                    request_id = %request.id,
                    provider_id = %provider_id,
                    confidence,
                    "Ignoring low-confidence recommendation"
                );
            }
            _ => {}
        }

        outcome
    }

    fn score(
        &self,
        request: &Request,
        eligible: &[Eligible<'_>],
        advisory: &AdvisoryOutcome,
    ) -> Vec<RankedCandidate> {
        let recommended = advisory.applied();
        let weights = self.weights.effective(recommended.is_some());

        let reference_cost = request.requirements.max_cost_usd.unwrap_or_else(|| {
            eligible
                .iter()
                .map(|e| e.estimated_cost)
                .fold(0.0, f64::max)
        });

        let mut scored: Vec<(RankedCandidate, f64, usize)> = eligible
            .iter()
            .map(|e| {
                let quality = match recommended {
                    Some((id, confidence)) if id == e.record.id => confidence,
                    _ => 0.0,
                };
                let breakdown = ScoreBreakdown {
                    cost: scoring::cost_score(e.estimated_cost, reference_cost),
                    health: scoring::health_score(&e.health, self.health.config().latency_ceiling_ms),
                    quality,
                };
                let candidate = RankedCandidate {
                    provider_id: e.record.id.clone(),
                    score: scoring::combine(&breakdown, weights),
                    breakdown,
                    estimated_cost_usd: e.estimated_cost,
                    probe: e.health.status == ProviderStatus::CircuitOpen,
                };
                (candidate, e.health.error_rate, e.record.order)
            })
            .collect();

        scored.sort_by(|(a, a_err, a_order), (b, b_err, b_order)| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a_err.total_cmp(b_err))
                .then_with(|| a_order.cmp(b_order))
        });

        scored.into_iter().map(|(c, _, _)| c).collect()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("weights", &self.weights)
            .field("advisor", &self.advisor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests;
