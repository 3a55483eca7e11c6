//! Scoring function for provider ranking

use crate::health::{HealthSnapshot, ProviderStatus};
use serde::Serialize;

/// Weights for scoring provider candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringWeights {
    /// Weight for estimated cost (0-100)
    pub cost: u32,

    /// Weight for latency and error rate (0-100)
    pub health: u32,

    /// Weight for the advisory recommendation (0-100)
    pub quality: u32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            cost: 40,
            health: 40,
            quality: 20,
        }
    }
}

impl ScoringWeights {
    /// Validate that weights sum to 100
    pub fn validate(&self) -> Result<(), String> {
        let sum = self.cost + self.health + self.quality;
        if sum != 100 {
            Err(format!("Scoring weights must sum to 100, got {}", sum))
        } else {
            Ok(())
        }
    }

    /// Fractional weights, with the quality share redistributed over cost
    /// and health when no recommendation applies.
    pub fn effective(&self, with_quality: bool) -> (f64, f64, f64) {
        if with_quality {
            let sum = (self.cost + self.health + self.quality).max(1) as f64;
            return (
                self.cost as f64 / sum,
                self.health as f64 / sum,
                self.quality as f64 / sum,
            );
        }
        let sum = self.cost + self.health;
        if sum == 0 {
            return (0.5, 0.5, 0.0);
        }
        (
            self.cost as f64 / sum as f64,
            self.health as f64 / sum as f64,
            0.0,
        )
    }
}

/// Per-axis scores in `[0, 1]`, kept on the decision for audit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub cost: f64,
    pub health: f64,
    pub quality: f64,
}

/// Cost score: cheaper is better.
///
/// Relative to the request's declared max cost when present, otherwise to
/// the most expensive eligible candidate.
pub fn cost_score(estimated_cost: f64, reference_cost: f64) -> f64 {
    if reference_cost <= 0.0 {
        return 1.0;
    }
    (1.0 - estimated_cost / reference_cost).clamp(0.0, 1.0)
}

/// Health score from latency and inverse error rate.
///
/// Unknown latency scores as perfect; Degraded providers are halved and a
/// provider only reachable as a probe scores zero.
pub fn health_score(health: &HealthSnapshot, latency_ceiling_ms: u64) -> f64 {
    let latency_score = match health.latency_ema_ms {
        Some(latency) => 1.0 / (1.0 + latency / latency_ceiling_ms.max(1) as f64),
        None => 1.0,
    };
    let reliability = (1.0 - health.error_rate).clamp(0.0, 1.0);
    let base = 0.5 * latency_score + 0.5 * reliability;

    match health.status {
        ProviderStatus::Healthy => base,
        ProviderStatus::Degraded => base * 0.5,
        ProviderStatus::CircuitOpen => 0.0,
    }
}

/// Weighted sum of a breakdown.
pub fn combine(breakdown: &ScoreBreakdown, weights: (f64, f64, f64)) -> f64 {
    breakdown.cost * weights.0 + breakdown.health * weights.1 + breakdown.quality * weights.2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(status: ProviderStatus, latency: Option<f64>, error_rate: f64) -> HealthSnapshot {
        HealthSnapshot {
            status,
            latency_ema_ms: latency,
            error_rate,
            consecutive_failures: 0,
            circuit_open_remaining_ms: None,
            open_count: 0,
            total_successes: 0,
            total_failures: 0,
            last_error: None,
        }
    }

    #[test]
    fn default_weights_sum_to_100() {
        let weights = ScoringWeights::default();
        assert!(weights.validate().is_ok());
    }

    #[test]
    fn validate_rejects_invalid_weights() {
        let weights = ScoringWeights {
            cost: 50,
            health: 50,
            quality: 50,
        };
        assert!(weights.validate().is_err());
    }

    #[test]
    fn effective_weights_drop_quality() {
        let weights = ScoringWeights::default();
        assert_eq!(weights.effective(true), (0.4, 0.4, 0.2));
        assert_eq!(weights.effective(false), (0.5, 0.5, 0.0));

        let quality_only = ScoringWeights {
            cost: 0,
            health: 0,
            quality: 100,
        };
        assert_eq!(quality_only.effective(false), (0.5, 0.5, 0.0));
    }

    #[test]
    fn cost_score_prefers_cheaper() {
        assert_eq!(cost_score(0.0, 1.0), 1.0);
        assert_eq!(cost_score(1.0, 1.0), 0.0);
        assert!(cost_score(0.2, 1.0) > cost_score(0.8, 1.0));
        assert_eq!(cost_score(0.0, 0.0), 1.0);
    }

    #[test]
    fn health_score_prefers_low_latency_and_errors() {
        let fast = snapshot(ProviderStatus::Healthy, Some(100.0), 0.0);
        let slow = snapshot(ProviderStatus::Healthy, Some(5_000.0), 0.0);
        let flaky = snapshot(ProviderStatus::Healthy, Some(100.0), 0.4);

        assert!(health_score(&fast, 10_000) > health_score(&slow, 10_000));
        assert!(health_score(&fast, 10_000) > health_score(&flaky, 10_000));
    }

    #[test]
    fn health_score_penalizes_status() {
        let healthy = snapshot(ProviderStatus::Healthy, None, 0.0);
        let degraded = snapshot(ProviderStatus::Degraded, None, 0.0);
        let open = snapshot(ProviderStatus::CircuitOpen, None, 0.0);

        assert_eq!(health_score(&healthy, 10_000), 1.0);
        assert_eq!(health_score(&degraded, 10_000), 0.5);
        assert_eq!(health_score(&open, 10_000), 0.0);
    }

    #[test]
    fn combine_is_weighted_sum() {
        let breakdown = ScoreBreakdown {
            cost: 1.0,
            health: 0.5,
            quality: 0.0,
        };
        let score = combine(&breakdown, (0.4, 0.4, 0.2));
        assert!((score - 0.6).abs() < 1e-9);
    }
}
