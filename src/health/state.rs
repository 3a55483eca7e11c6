//! Per-provider health state machine.

use super::config::HealthConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit-breaker status of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    /// Serving normally
    Healthy,
    /// Serving, but error rate or latency is above threshold
    Degraded,
    /// Excluded from selection until cool-down and a successful probe
    CircuitOpen,
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::CircuitOpen => write!(f, "circuit_open"),
        }
    }
}

/// Whether an attempt may be sent to a provider right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Normal attempt
    Allowed,
    /// The single post-cool-down probe; the caller owns the probe slot
    Probe,
    /// Circuit open, or another caller holds the probe slot
    Rejected,
}

/// A status change produced by applying an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ProviderStatus,
    pub to: ProviderStatus,
}

/// Mutable health record for one provider.
///
/// Owned by the provider's registry record and only mutated under that
/// record's lock.
#[derive(Debug, Clone)]
pub struct HealthState {
    pub status: ProviderStatus,
    /// Exponential moving average of attempt latency
    pub latency_ema_ms: Option<f64>,
    /// Exponential moving average of the failure indicator
    pub error_rate: f64,
    pub consecutive_failures: u32,
    pub circuit_open_until: Option<Instant>,
    /// Consecutive circuit openings without a recovery in between
    pub open_count: u32,
    /// Set while a probe attempt is in flight
    pub probe_claimed_at: Option<Instant>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            status: ProviderStatus::Healthy,
            latency_ema_ms: None,
            error_rate: 0.0,
            consecutive_failures: 0,
            circuit_open_until: None,
            open_count: 0,
            probe_claimed_at: None,
            total_successes: 0,
            total_failures: 0,
            last_error: None,
        }
    }
}

impl HealthState {
    fn probe_slot_held(&self, now: Instant, config: &HealthConfig) -> bool {
        self.probe_claimed_at
            .is_some_and(|at| now.saturating_duration_since(at) < config.probe_claim_timeout())
    }

    fn cooled_down(&self, now: Instant) -> bool {
        self.circuit_open_until.is_none_or(|until| now >= until)
    }

    /// Whether routing may consider this provider at `now`.
    ///
    /// A CircuitOpen provider is selectable only once its cool-down has
    /// elapsed and nobody holds the probe slot.
    pub fn is_selectable(&self, now: Instant, config: &HealthConfig) -> bool {
        match self.status {
            ProviderStatus::Healthy | ProviderStatus::Degraded => true,
            ProviderStatus::CircuitOpen => {
                self.cooled_down(now) && !self.probe_slot_held(now, config)
            }
        }
    }

    /// Claim the right to send an attempt.
    pub fn admit(&mut self, now: Instant, config: &HealthConfig) -> Admission {
        match self.status {
            ProviderStatus::Healthy | ProviderStatus::Degraded => Admission::Allowed,
            ProviderStatus::CircuitOpen => {
                if !self.cooled_down(now) || self.probe_slot_held(now, config) {
                    Admission::Rejected
                } else {
                    self.probe_claimed_at = Some(now);
                    Admission::Probe
                }
            }
        }
    }

    /// Give back a probe slot that produced no outcome.
    pub fn release_probe(&mut self) {
        self.probe_claimed_at = None;
    }

    fn update_latency(&mut self, latency: Duration, alpha: f64) {
        let sample = latency.as_secs_f64() * 1000.0;
        self.latency_ema_ms = Some(match self.latency_ema_ms {
            Some(prev) => alpha * sample + (1.0 - alpha) * prev,
            None => sample,
        });
    }

    fn over_thresholds(&self, config: &HealthConfig) -> bool {
        self.error_rate > config.error_rate_threshold
            || self
                .latency_ema_ms
                .is_some_and(|l| l > config.latency_ceiling_ms as f64)
    }

    fn set_status(&mut self, to: ProviderStatus) -> Option<Transition> {
        let from = self.status;
        if from == to {
            return None;
        }
        self.status = to;
        Some(Transition { from, to })
    }

    /// Only refresh the latency estimate.
    ///
    /// Used for completions that arrive after their attempt already counted
    /// as a timeout.
    pub fn record_latency(&mut self, latency: Duration, config: &HealthConfig) {
        self.update_latency(latency, config.ema_alpha);
    }

    /// Apply a successful attempt.
    pub fn record_success(
        &mut self,
        latency: Duration,
        probe: bool,
        config: &HealthConfig,
    ) -> Option<Transition> {
        let alpha = config.ema_alpha;
        self.update_latency(latency, alpha);
        self.error_rate *= 1.0 - alpha;
        self.consecutive_failures = 0;
        self.total_successes += 1;

        match self.status {
            ProviderStatus::CircuitOpen if probe => {
                self.circuit_open_until = None;
                self.probe_claimed_at = None;
                self.open_count = 0;
                self.set_status(ProviderStatus::Healthy)
            }
            // A straggler that started before the circuit opened
            ProviderStatus::CircuitOpen => None,
            ProviderStatus::Healthy if self.over_thresholds(config) => {
                self.set_status(ProviderStatus::Degraded)
            }
            ProviderStatus::Degraded if !self.over_thresholds(config) => {
                self.set_status(ProviderStatus::Healthy)
            }
            _ => None,
        }
    }

    /// Apply a failed attempt (timeouts included).
    pub fn record_failure(
        &mut self,
        reason: String,
        latency: Option<Duration>,
        probe: bool,
        now: Instant,
        config: &HealthConfig,
    ) -> Option<Transition> {
        let alpha = config.ema_alpha;
        if let Some(latency) = latency {
            self.update_latency(latency, alpha);
        }
        self.error_rate = alpha + (1.0 - alpha) * self.error_rate;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.total_failures += 1;
        self.last_error = Some(reason);

        match self.status {
            ProviderStatus::CircuitOpen if probe => {
                self.probe_claimed_at = None;
                self.open_circuit(now, config);
                None
            }
            ProviderStatus::CircuitOpen => None,
            _ if self.consecutive_failures >= config.failure_limit => {
                self.open_circuit(now, config);
                self.set_status(ProviderStatus::CircuitOpen)
            }
            ProviderStatus::Healthy if self.over_thresholds(config) => {
                self.set_status(ProviderStatus::Degraded)
            }
            _ => None,
        }
    }

    fn open_circuit(&mut self, now: Instant, config: &HealthConfig) {
        self.open_count = self.open_count.saturating_add(1);
        self.circuit_open_until = Some(now + config.backoff(self.open_count));
    }

    /// Serializable view relative to `now`.
    pub fn snapshot(&self, now: Instant) -> HealthSnapshot {
        HealthSnapshot {
            status: self.status,
            latency_ema_ms: self.latency_ema_ms,
            error_rate: self.error_rate,
            consecutive_failures: self.consecutive_failures,
            circuit_open_remaining_ms: self
                .circuit_open_until
                .filter(|_| self.status == ProviderStatus::CircuitOpen)
                .map(|until| until.saturating_duration_since(now).as_millis() as u64),
            open_count: self.open_count,
            total_successes: self.total_successes,
            total_failures: self.total_failures,
            last_error: self.last_error.clone(),
        }
    }
}

/// Read-only health view for accessors and the HTTP surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: ProviderStatus,
    pub latency_ema_ms: Option<f64>,
    pub error_rate: f64,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_open_remaining_ms: Option<u64>,
    pub open_count: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
