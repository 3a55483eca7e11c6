use crate::health::{HealthSnapshot, HealthState};
use crate::provider::Provider;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

/// Price tier used by budget enforcement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTier {
    #[default]
    Standard,
    /// Eligible while a tenant is over budget under `cheap-tier-only`
    Cheap,
}

/// Static capability tags of a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Supported model hints; `"*"` accepts any model
    pub models: Vec<String>,
    /// USD per 1000 prompt tokens
    pub input_cost_per_1k: f64,
    /// USD per 1000 completion tokens
    pub output_cost_per_1k: f64,
    pub tier: ProviderTier,
}

impl ProviderCapabilities {
    pub fn supports_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == "*" || m == model)
    }

    /// Estimated USD cost of a call.
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_cost_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_cost_per_1k
    }
}

/// A registered provider: identity, capabilities, the call handle and its
/// independently lockable health state.
pub struct ProviderRecord {
    pub id: String,
    pub capabilities: ProviderCapabilities,
    pub provider: Arc<dyn Provider>,
    /// Position in registration order (tie-breaker for ranking)
    pub order: usize,
    health: Mutex<HealthState>,
}

impl std::fmt::Debug for ProviderRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRecord")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl ProviderRecord {
    pub(crate) fn new(
        id: String,
        capabilities: ProviderCapabilities,
        provider: Arc<dyn Provider>,
        order: usize,
    ) -> Self {
        Self {
            id,
            capabilities,
            provider,
            order,
            health: Mutex::new(HealthState::default()),
        }
    }

    /// Lock this provider's health state.
    ///
    /// Each record has its own lock, so unrelated providers never contend.
    pub fn health(&self) -> MutexGuard<'_, HealthState> {
        self.health.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(provider_id = %self.id, "Health lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Copy of the current health state.
    pub fn health_state(&self) -> HealthState {
        self.health().clone()
    }

    pub fn view(&self, now: Instant) -> ProviderView {
        ProviderView {
            id: self.id.clone(),
            models: self.capabilities.models.clone(),
            input_cost_per_1k: self.capabilities.input_cost_per_1k,
            output_cost_per_1k: self.capabilities.output_cost_per_1k,
            tier: self.capabilities.tier,
            health: self.health().snapshot(now),
        }
    }
}

/// Read-only snapshot of a provider for accessors and the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderView {
    pub id: String,
    pub models: Vec<String>,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub tier: ProviderTier,
    pub health: HealthSnapshot,
}
