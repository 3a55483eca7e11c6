//! Health tracking module for provider circuit breaking.
//!
//! Every completed attempt feeds the provider's [`HealthState`]: latency and
//! error-rate moving averages, consecutive failures, and the
//! `Healthy -> Degraded -> CircuitOpen -> Healthy` state machine. Updates
//! take only the owning record's lock.
//!
//! An optional background prober checks CircuitOpen providers whose
//! cool-down has elapsed, using the same single probe slot that a routed
//! attempt would claim.

mod config;
mod state;


pub use config::*;
pub use state::*;

use crate::provider::ProviderError;
use crate::registry::{ProviderRecord, ProviderRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Applies attempt outcomes to provider health records.
pub struct HealthTracker {
    registry: Arc<ProviderRegistry>,
    config: HealthConfig,
}

impl HealthTracker {
    pub fn new(registry: Arc<ProviderRegistry>, config: HealthConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Whether routing may rank this provider right now.
    pub fn is_selectable(&self, record: &ProviderRecord) -> bool {
        record.health().is_selectable(Instant::now(), &self.config)
    }

    /// Claim an attempt slot, taking the probe slot for a cooled-down circuit.
    pub fn try_begin_attempt(&self, record: &ProviderRecord) -> Admission {
        let admission = record.health().admit(Instant::now(), &self.config);
        if admission == Admission::Probe {
            tracing::info!(provider_id = %record.id, "Circuit cool-down elapsed, sending probe");
        }
        admission
    }

    /// Release a probe slot whose attempt was abandoned without an outcome.
    pub fn release_probe(&self, record: &ProviderRecord) {
        record.health().release_probe();
    }

    /// Record a successful attempt.
    pub fn record_success(&self, record: &ProviderRecord, latency: Duration, probe: bool) {
        let transition = record.health().record_success(latency, probe, &self.config);

        metrics::counter!("meridian_provider_attempts_total",
            "provider" => record.id.clone(),
            "outcome" => "success"
        )
        .increment(1);
        metrics::histogram!("meridian_provider_latency_seconds",
            "provider" => record.id.clone()
        )
        .record(latency.as_secs_f64());

        if let Some(t) = transition {
            self.log_transition(record, t, None);
        }
    }

    /// Record a failed attempt. Timeouts count as failures.
    pub fn record_failure(
        &self,
        record: &ProviderRecord,
        error: &ProviderError,
        latency: Option<Duration>,
        probe: bool,
    ) {
        let now = Instant::now();
        let (transition, reopened_until) = {
            let mut health = record.health();
            let transition =
                health.record_failure(error.to_string(), latency, probe, now, &self.config);
            let reopened = (probe && transition.is_none())
                .then_some(health.circuit_open_until)
                .flatten();
            (transition, reopened)
        };

        metrics::counter!("meridian_provider_attempts_total",
            "provider" => record.id.clone(),
            "outcome" => error.kind()
        )
        .increment(1);

        if let Some(t) = transition {
            self.log_transition(record, t, Some(error));
        } else if let Some(until) = reopened_until {
            tracing::warn!(
                provider_id = %record.id,
                error = %error,
                backoff_ms = until.saturating_duration_since(now).as_millis() as u64,
                "Probe failed, circuit re-opened"
            );
        }
    }

    /// Record a success that arrived after its attempt already timed out.
    ///
    /// The timeout was already counted, so only latency is refreshed.
    pub fn record_late_success(&self, record: &ProviderRecord, latency: Duration) {
        record.health().record_latency(latency, &self.config);
        tracing::debug!(
            provider_id = %record.id,
            latency_ms = latency.as_millis() as u64,
            "Late completion updated latency"
        );
    }

    fn log_transition(
        &self,
        record: &ProviderRecord,
        transition: Transition,
        error: Option<&ProviderError>,
    ) {
        metrics::counter!("meridian_provider_transitions_total",
            "provider" => record.id.clone(),
            "to" => transition.to.to_string()
        )
        .increment(1);

        match transition.to {
            ProviderStatus::CircuitOpen => {
                let health = record.health_state();
                tracing::warn!(
                    provider_id = %record.id,
                    old_status = %transition.from,
                    consecutive_failures = health.consecutive_failures,
                    open_count = health.open_count,
                    error = ?error,
                    "Provider circuit opened"
                );
            }
            ProviderStatus::Degraded => {
                tracing::warn!(
                    provider_id = %record.id,
                    old_status = %transition.from,
                    "Provider degraded"
                );
            }
            ProviderStatus::Healthy => {
                tracing::info!(
                    provider_id = %record.id,
                    old_status = %transition.from,
                    "Provider recovered"
                );
            }
        }
    }

    /// Probe every CircuitOpen provider whose cool-down has elapsed.
    ///
    /// Returns the ids that were probed.
    pub async fn probe_open_circuits(&self) -> Vec<String> {
        let timeout = Duration::from_millis(self.config.active_probe.timeout_ms);
        let mut probed = Vec::new();

        for record in self.registry.iter() {
            if record.health().status != ProviderStatus::CircuitOpen {
                continue;
            }
            if self.try_begin_attempt(record) != Admission::Probe {
                continue;
            }

            let started = Instant::now();
            let outcome = match tokio::time::timeout(timeout, record.provider.probe()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(timeout.as_millis() as u64)),
            };

            match outcome {
                Ok(()) => self.record_success(record, started.elapsed(), true),
                Err(e) => self.record_failure(record, &e, None, true),
            }
            probed.push(record.id.clone());
        }

        probed
    }

    /// Start the active prober background task.
    /// Returns a JoinHandle that resolves when the prober stops.
    pub fn start(self: Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(self.config.active_probe.interval_seconds.max(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            tracing::info!(
                interval_seconds = period.as_secs(),
                "Active health prober started"
            );

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        tracing::info!("Active health prober shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let probed = self.probe_open_circuits().await;
                        if !probed.is_empty() {
                            tracing::debug!(providers_probed = probed.len(), "Probe cycle completed");
                        }
                    }
                }
            }
        })
    }
}
