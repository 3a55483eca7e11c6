//! Routing configuration

use serde::{Deserialize, Serialize};

/// Routing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub weights: RoutingWeights,
    /// Upper bound on the advisory call
    pub advisory_timeout_ms: u64,
    /// Recommendations below this confidence are ignored
    pub min_advisory_confidence: f64,
    /// Expected completion tokens per prompt token when `max_tokens` is unset
    pub output_token_ratio: f64,
}

/// Routing weights for provider scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingWeights {
    pub cost: u32,
    pub health: u32,
    pub quality: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            weights: RoutingWeights::default(),
            advisory_timeout_ms: 150,
            min_advisory_confidence: 0.6,
            output_token_ratio: 0.5,
        }
    }
}

impl Default for RoutingWeights {
    fn default() -> Self {
        Self {
            cost: 40,
            health: 40,
            quality: 20,
        }
    }
}

impl From<RoutingWeights> for crate::routing::ScoringWeights {
    fn from(weights: RoutingWeights) -> Self {
        crate::routing::ScoringWeights {
            cost: weights.cost,
            health: weights.health,
            quality: weights.quality,
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<(), String> {
        crate::routing::ScoringWeights::from(self.weights).validate()?;
        if !(0.0..=1.0).contains(&self.min_advisory_confidence) {
            return Err("min_advisory_confidence must be in [0, 1]".to_string());
        }
        if self.output_token_ratio.is_nan() || self.output_token_ratio < 0.0 {
            return Err("output_token_ratio must be >= 0".to_string());
        }
        Ok(())
    }
}
