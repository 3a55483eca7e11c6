//! Configuration for provider health tracking.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health tracking configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Smoothing factor for the latency and error-rate moving averages
    pub ema_alpha: f64,
    /// Error-rate estimate above which a provider is Degraded
    pub error_rate_threshold: f64,
    /// Latency estimate above which a provider is Degraded
    pub latency_ceiling_ms: u64,
    /// Consecutive failures that open the circuit
    pub failure_limit: u32,
    /// First circuit-open backoff; doubles on every re-open
    pub open_backoff_base_seconds: u64,
    /// Upper bound for the circuit-open backoff
    pub open_backoff_cap_seconds: u64,
    /// How long a claimed probe slot stays reserved without an outcome
    pub probe_claim_timeout_seconds: u64,
    pub active_probe: ActiveProbeConfig,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.2,
            error_rate_threshold: 0.5,
            latency_ceiling_ms: 10_000,
            failure_limit: 3,
            open_backoff_base_seconds: 5,
            open_backoff_cap_seconds: 300,
            probe_claim_timeout_seconds: 60,
            active_probe: ActiveProbeConfig::default(),
        }
    }
}

impl HealthConfig {
    /// Backoff for the `opens`-th consecutive circuit opening (1-based).
    pub fn backoff(&self, opens: u32) -> Duration {
        let exponent = opens.saturating_sub(1).min(31);
        let base = Duration::from_secs(self.open_backoff_base_seconds);
        let cap = Duration::from_secs(self.open_backoff_cap_seconds);
        base.saturating_mul(1u32 << exponent).min(cap)
    }

    pub fn probe_claim_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_claim_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err("ema_alpha must be in (0, 1]".to_string());
        }
        if !(self.error_rate_threshold > 0.0 && self.error_rate_threshold <= 1.0) {
            return Err("error_rate_threshold must be in (0, 1]".to_string());
        }
        if self.failure_limit == 0 {
            return Err("failure_limit must be greater than 0".to_string());
        }
        if self.open_backoff_base_seconds > self.open_backoff_cap_seconds {
            return Err("open_backoff_base_seconds must not exceed open_backoff_cap_seconds".to_string());
        }
        Ok(())
    }
}

/// Background probing of providers whose circuit cool-down has elapsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveProbeConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub timeout_ms: u64,
}

impl Default for ActiveProbeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: 10,
            timeout_ms: 2_000,
        }
    }
}
