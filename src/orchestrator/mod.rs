//! Execution orchestrator.
//!
//! Walks a routing decision's candidates in order until one answers:
//!
//! - each attempt claims admission from the health tracker (and the probe
//!   slot for a cooled-down circuit)
//! - each call runs in its own task under the per-attempt timeout
//! - success records usage, health and the cache entry
//! - a retryable failure moves on to the next candidate, a non-retryable
//!   one stops the walk
//! - at most `max_attempts` calls are made
//!
//! A call that times out is counted as a failure at once. Its task keeps
//! running for the late-completion grace period, and a late success still
//! updates latency, usage and the cache.

mod config;
mod error;
mod single_flight;

#[cfg(test)]
mod tests;

pub use config::OrchestratorConfig;
pub use error::{AttemptFailure, ExecutionError};
pub use single_flight::{FlightAbandoned, Shared, SingleFlight};

use crate::cache::{CacheError, CachedResponse, SemanticCache};
use crate::fingerprint::Fingerprint;
use crate::gateway::Degradation;
use crate::health::{Admission, HealthTracker};
use crate::ledger::{UsageLedger, UsageRecord};
use crate::provider::{ProviderError, ProviderResponse};
use crate::registry::{ProviderRecord, ProviderRegistry};
use crate::request::{Request, TokenUsage};
use crate::routing::decision::RoutingDecision;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

type CallResult = Result<ProviderResponse, ProviderError>;

/// A successful execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub provider_id: String,
    pub response: ProviderResponse,
    pub cost_usd: f64,
    /// Calls made, including the successful one
    pub attempts: u32,
    /// Candidates that failed or were skipped before the answer
    pub fallbacks: Vec<AttemptFailure>,
}

/// Aborts the provider call and gives back an unused probe slot if the
/// attempt is dropped before it settles.
struct CallGuard {
    abort: Option<AbortHandle>,
    probe: Option<(Arc<HealthTracker>, Arc<ProviderRecord>)>,
}

impl CallGuard {
    fn settle(&mut self) {
        self.abort = None;
        self.probe = None;
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
        if let Some((health, record)) = self.probe.take() {
            health.release_probe(&record);
        }
    }
}

/// Executes ranked provider attempts and records their outcomes.
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
    cache: Arc<SemanticCache>,
    ledger: Arc<UsageLedger>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        health: Arc<HealthTracker>,
        cache: Arc<SemanticCache>,
        ledger: Arc<UsageLedger>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry: Arc::clone(health.registry()),
            health,
            cache,
            ledger,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Walk the ranked candidates until one succeeds.
    ///
    /// # Errors
    ///
    /// - `ExecutionError::ProviderFailure` on the first non-retryable failure
    /// - `ExecutionError::Exhausted` when candidates or attempts run out
    pub async fn execute(
        &self,
        request: &Request,
        fingerprint: &Fingerprint,
        decision: &RoutingDecision,
    ) -> Result<Completion, ExecutionError> {
        let mut failures = Vec::new();
        let mut attempts = 0u32;

        for candidate in &decision.candidates {
            if attempts >= self.config.max_attempts {
                tracing::warn!(
                    request_id = %request.id,
                    max_attempts = self.config.max_attempts,
                    "Attempt limit reached with candidates remaining"
                );
                break;
            }

            let Some(record) = self.registry.get(&candidate.provider_id) else {
                continue;
            };

            let probe = match self.health.try_begin_attempt(record) {
                Admission::Allowed => false,
                Admission::Probe => true,
                Admission::Rejected => {
                    tracing::debug!(
                        request_id = %request.id,
                        provider_id = %record.id,
                        "Circuit open since ranking, skipping"
                    );
                    failures.push(AttemptFailure::skipped(
                        &record.id,
                        "circuit_open",
                        "circuit open or probe already in flight",
                    ));
                    continue;
                }
            };
            attempts += 1;

            match self.attempt(request, fingerprint, record, probe).await {
                Ok(response) => {
                    let cost_usd = self.complete(request, fingerprint, record, &response);
                    tracing::info!(
                        request_id = %request.id,
                        provider_id = %record.id,
                        attempts,
                        cost_usd,
                        "Request served"
                    );
                    return Ok(Completion {
                        provider_id: record.id.clone(),
                        response,
                        cost_usd,
                        attempts,
                        fallbacks: failures,
                    });
                }
                Err(error) => {
                    failures.push(AttemptFailure::from_error(&record.id, &error));
                    if !error.is_retryable() {
                        tracing::warn!(
                            request_id = %request.id,
                            provider_id = %record.id,
                            error = %error,
                            "Non-retryable provider failure"
                        );
                        return Err(ExecutionError::ProviderFailure {
                            provider_id: record.id.clone(),
                            error,
                            attempts: failures,
                        });
                    }
                    metrics::counter!("meridian_fallbacks_total",
                        "from" => record.id.clone()
                    )
                    .increment(1);
                    tracing::warn!(
                        request_id = %request.id,
                        provider_id = %record.id,
                        error = %error,
                        "Provider attempt failed, trying next candidate"
                    );
                }
            }
        }

        tracing::warn!(
            request_id = %request.id,
            attempts,
            "All providers exhausted"
        );
        Err(ExecutionError::Exhausted {
            attempts: failures,
        })
    }

    /// One provider call under the attempt timeout, with health recorded.
    async fn attempt(
        &self,
        request: &Request,
        fingerprint: &Fingerprint,
        record: &Arc<ProviderRecord>,
        probe: bool,
    ) -> CallResult {
        let started = Instant::now();
        let provider = Arc::clone(&record.provider);
        let call_request = request.clone();
        let mut handle: JoinHandle<CallResult> =
            tokio::spawn(async move { provider.call(&call_request).await });

        let mut guard = CallGuard {
            abort: Some(handle.abort_handle()),
            probe: probe.then(|| (Arc::clone(&self.health), Arc::clone(record))),
        };

        let timeout = self.config.attempt_timeout();
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(joined) => {
                guard.settle();
                let latency = started.elapsed();
                let result = joined.unwrap_or_else(|e| {
                    Err(ProviderError::InvalidResponse(format!(
                        "provider task failed: {}",
                        e
                    )))
                });
                match &result {
                    Ok(_) => self.health.record_success(record, latency, probe),
                    Err(error) => {
                        self.health
                            .record_failure(record, error, Some(latency), probe);
                        self.record_billed_failure(request, record, error);
                    }
                }
                result
            }
            Err(_) => {
                guard.settle();
                let error = ProviderError::Timeout(timeout.as_millis() as u64);
                self.health.record_failure(record, &error, None, probe);
                self.watch_late(handle, request, fingerprint, record, started);
                Err(error)
            }
        }
    }

    /// Record usage and cache the response. Returns the cost.
    fn complete(
        &self,
        request: &Request,
        fingerprint: &Fingerprint,
        record: &ProviderRecord,
        response: &ProviderResponse,
    ) -> f64 {
        let cost = cost_of(record, response.usage);
        self.ledger
            .record(usage_record(request, record, &response.model, response.usage, cost, false));
        if !request.bypass_cache {
            cache_response(&self.cache, fingerprint, request, record, response, false);
        }
        cost
    }

    fn record_billed_failure(&self, request: &Request, record: &ProviderRecord, error: &ProviderError) {
        if let Some(usage) = error.billed_usage() {
            let cost = cost_of(record, usage);
            self.ledger
                .record(usage_record(request, record, &request.model, usage, cost, true));
        }
    }

    /// Keep a timed-out call alive for the grace period and record a late
    /// outcome.
    fn watch_late(
        &self,
        mut handle: JoinHandle<CallResult>,
        request: &Request,
        fingerprint: &Fingerprint,
        record: &Arc<ProviderRecord>,
        started: Instant,
    ) {
        let grace = self.config.late_completion_grace();
        if grace.is_zero() {
            handle.abort();
            return;
        }

        let health = Arc::clone(&self.health);
        let ledger = Arc::clone(&self.ledger);
        let cache = Arc::clone(&self.cache);
        let record = Arc::clone(record);
        let request = request.clone();
        let fingerprint = fingerprint.clone();

        tokio::spawn(async move {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(Ok(response))) => {
                    let latency = started.elapsed();
                    health.record_late_success(&record, latency);
                    let cost = cost_of(&record, response.usage);
                    ledger.record(usage_record(
                        &request,
                        &record,
                        &response.model,
                        response.usage,
                        cost,
                        false,
                    ));
                    if !request.bypass_cache {
                        cache_response(&cache, &fingerprint, &request, &record, &response, true);
                    }
                    tracing::info!(
                        request_id = %request.id,
                        provider_id = %record.id,
                        latency_ms = latency.as_millis() as u64,
                        "Late completion recorded"
                    );
                }
                Ok(Ok(Err(error))) => {
                    if let Some(usage) = error.billed_usage() {
                        let cost = cost_of(&record, usage);
                        ledger.record(usage_record(
                            &request,
                            &record,
                            &request.model,
                            usage,
                            cost,
                            true,
                        ));
                    }
                    tracing::debug!(
                        request_id = %request.id,
                        provider_id = %record.id,
                        error = %error,
                        "Timed-out call failed late"
                    );
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    handle.abort();
                    tracing::debug!(
                        request_id = %request.id,
                        provider_id = %record.id,
                        grace_ms = grace.as_millis() as u64,
                        "Timed-out call abandoned after grace period"
                    );
                }
            }
        });
    }
}

fn cost_of(record: &ProviderRecord, usage: TokenUsage) -> f64 {
    record
        .capabilities
        .estimate_cost(usage.prompt_tokens, usage.completion_tokens)
}

fn usage_record(
    request: &Request,
    record: &ProviderRecord,
    model: &str,
    usage: TokenUsage,
    cost_usd: f64,
    billed_failure: bool,
) -> UsageRecord {
    UsageRecord {
        tenant: request.tenant.clone(),
        provider_id: record.id.clone(),
        request_id: request.id.clone(),
        model: model.to_string(),
        usage,
        cost_usd,
        billed_failure,
        timestamp: Utc::now(),
    }
}

/// Store a provider response. Late completions never replace a live entry.
fn cache_response(
    cache: &SemanticCache,
    fingerprint: &Fingerprint,
    request: &Request,
    record: &ProviderRecord,
    response: &ProviderResponse,
    late: bool,
) {
    let cached = CachedResponse {
        content: response.content.clone(),
        model: response.model.clone(),
        usage: response.usage,
    };
    let class = request.class.as_deref();
    let result = if late {
        cache
            .store_if_absent(fingerprint, cached, &record.id, class)
            .map(|_| ())
    } else {
        cache
            .store(fingerprint, cached, &record.id, class)
            .map(|_| ())
    };

    match result {
        Ok(()) | Err(CacheError::Disabled) => {}
        Err(e) => Degradation::CacheUnavailable.report(&request.id, &e),
    }
}

