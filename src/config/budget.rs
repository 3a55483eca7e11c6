//! Budget enforcement configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Budget enforcement configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Length of the rolling spend window
    pub window_seconds: u64,

    /// Number of buckets the window is split into
    pub bucket_count: u32,

    /// Cap for tenants without an explicit entry (None = unlimited)
    pub default_cap_usd: Option<f64>,

    /// Per-tenant caps in USD over the rolling window
    pub tenants: HashMap<String, f64>,

    /// Action once a tenant's spend reaches its cap
    pub over_budget_action: OverBudgetAction,

    /// How often new usage records are flushed to the store
    pub flush_interval_ms: u64,

    /// Recent usage records kept in memory for inspection
    pub retained_records: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            window_seconds: 86_400,
            bucket_count: 24,
            default_cap_usd: None,
            tenants: HashMap::new(),
            over_budget_action: OverBudgetAction::Reject,
            flush_interval_ms: 1_000,
            retained_records: 10_000,
        }
    }
}

impl BudgetConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// Cap that applies to a tenant.
    pub fn cap_for(&self, tenant: &str) -> Option<f64> {
        self.tenants.get(tenant).copied().or(self.default_cap_usd)
    }

    /// Validate configuration at startup
    pub fn validate(&self) -> Result<(), String> {
        if self.window_seconds == 0 {
            return Err("window_seconds must be greater than 0".to_string());
        }
        if self.bucket_count == 0 || u64::from(self.bucket_count) > self.window_seconds {
            return Err("bucket_count must be between 1 and window_seconds".to_string());
        }
        if let Some(cap) = self.default_cap_usd {
            if cap.is_nan() || cap < 0.0 {
                return Err("default_cap_usd must be >= 0.0".to_string());
            }
        }
        for (tenant, cap) in &self.tenants {
            if cap.is_nan() || *cap < 0.0 {
                return Err(format!("tenants.{} cap must be >= 0.0", tenant));
            }
        }
        Ok(())
    }
}

/// Action to take when a tenant is over budget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverBudgetAction {
    /// Fail with a budget-exceeded error before any provider call
    #[default]
    Reject,

    /// Rank only providers in the cheap tier
    CheapTierOnly,
}
