//! Gateway entry point.
//!
//! `Gateway::handle` is the single call the surrounding system makes per
//! request: validate, fingerprint, look up the cache, check the tenant's
//! budget, then route and execute under single-flight coalescing. The
//! remaining methods are read-only accessors and lifecycle hooks
//! (background tasks, warm start, shutdown persistence).

mod builder;
mod error;


pub use builder::GatewayBuilder;
pub use error::{BuildError, Degradation, GatewayError};

use crate::cache::{CacheHit, CacheStats, HitKind, SemanticCache};
use crate::config::{GatewayConfig, OverBudgetAction};
use crate::fingerprint::Fingerprinter;
use crate::health::HealthTracker;
use crate::ledger::{BudgetVerdict, ProviderUsage, TenantUsage, UsageLedger};
use crate::orchestrator::{Completion, Orchestrator, SingleFlight};
use crate::registry::{ProviderRegistry, ProviderView};
use crate::request::{Request, Requirements, TokenUsage};
use crate::routing::{BudgetPosture, Router};
use crate::store::{PersistentStore, StoreError};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type FlightResult = Result<Arc<Completion>, GatewayError>;

/// Where a response came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseSource {
    ExactCache,
    SemanticCache {
        similarity: f32,
    },
    Upstream {
        /// Provider calls made for this flight
        attempts: u32,
        /// Served from another request's in-flight call
        coalesced: bool,
    },
}

/// A successful answer to [`Gateway::handle`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayResponse {
    pub request_id: String,
    pub content: String,
    pub model: String,
    pub provider_id: String,
    pub source: ResponseSource,
    pub usage: TokenUsage,
    /// Cost charged to this request; zero for cache hits and coalesced waiters
    pub cost_usd: f64,
}

impl GatewayResponse {
    fn from_hit(request: &Request, hit: &CacheHit) -> Self {
        let source = match hit.kind {
            HitKind::Exact => ResponseSource::ExactCache,
            HitKind::Semantic { similarity } => ResponseSource::SemanticCache { similarity },
        };
        Self {
            request_id: request.id.clone(),
            content: hit.entry.response.content.clone(),
            model: hit.entry.response.model.clone(),
            provider_id: hit.entry.provider_id.clone(),
            source,
            usage: hit.entry.response.usage,
            cost_usd: 0.0,
        }
    }

    fn from_completion(request: &Request, completion: &Completion, leader: bool) -> Self {
        Self {
            request_id: request.id.clone(),
            content: completion.response.content.clone(),
            model: completion.response.model.clone(),
            provider_id: completion.provider_id.clone(),
            source: ResponseSource::Upstream {
                attempts: completion.attempts,
                coalesced: !leader,
            },
            usage: completion.response.usage,
            cost_usd: if leader { completion.cost_usd } else { 0.0 },
        }
    }

    /// True when no provider was called on behalf of this request.
    pub fn is_cached(&self) -> bool {
        matches!(
            self.source,
            ResponseSource::ExactCache | ResponseSource::SemanticCache { .. }
        )
    }
}

/// What a warm start brought back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub usage_records: usize,
    pub cache_entries: usize,
}

/// Routing and semantic-cache decision engine.
pub struct Gateway {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
    cache: Arc<SemanticCache>,
    fingerprinter: Arc<Fingerprinter>,
    router: Arc<Router>,
    orchestrator: Arc<Orchestrator>,
    ledger: Arc<UsageLedger>,
    flights: SingleFlight<FlightResult>,
    store: Option<Arc<dyn PersistentStore>>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Answer a request from the cache or an upstream provider.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` when the request is malformed
    /// - `BudgetExceeded` when the tenant is over its cap under the reject policy
    /// - `NoEligibleProvider` when filtering leaves nothing to call
    /// - `AllProvidersExhausted` / `ProviderFailure` when calls fail
    /// - `Timeout` when the request deadline passes
    /// - `Cancelled` when the shared flight was cancelled or crashed
    pub async fn handle(&self, request: Request) -> Result<GatewayResponse, GatewayError> {
        let started = Instant::now();
        let result = self.process(&request).await;

        let outcome = match &result {
            Ok(response) if response.is_cached() => "cache_hit",
            Ok(_) => "upstream",
            Err(e) => e.kind(),
        };
        metrics::counter!("meridian_requests_total", "outcome" => outcome).increment(1);
        metrics::histogram!("meridian_request_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(response) => tracing::debug!(
                request_id = %request.id,
                tenant = %request.tenant,
                provider_id = %response.provider_id,
                outcome,
                latency_ms = started.elapsed().as_millis() as u64,
                "Request handled"
            ),
            Err(e) => tracing::warn!(
                request_id = %request.id,
                tenant = %request.tenant,
                error = %e,
                outcome,
                latency_ms = started.elapsed().as_millis() as u64,
                "Request failed"
            ),
        }

        result
    }

    async fn process(&self, request: &Request) -> Result<GatewayResponse, GatewayError> {
        request.validate().map_err(GatewayError::InvalidRequest)?;

        let fingerprint = self.fingerprinter.fingerprint(request).await;

        if !request.bypass_cache {
            if let Some(hit) = self.cache.lookup(&fingerprint, request.class.as_deref()) {
                return Ok(GatewayResponse::from_hit(request, &hit));
            }
        }

        let posture = self.budget_posture(request)?;
        let key = flight_key(&fingerprint.exact_key, posture, request);

        let router = Arc::clone(&self.router);
        let orchestrator = Arc::clone(&self.orchestrator);
        let flight_request = request.clone();
        let flight_fingerprint = fingerprint.clone();
        let flight = self.flights.run(&key, move || async move {
            let decision = router
                .rank(&flight_request, &flight_fingerprint.exact_key, posture)
                .await?;
            let completion = orchestrator
                .execute(&flight_request, &flight_fingerprint, &decision)
                .await?;
            Ok::<_, GatewayError>(Arc::new(completion))
        });

        let deadline = self.orchestrator.config().request_timeout();
        let shared = match tokio::time::timeout(deadline, flight).await {
            Ok(Ok(shared)) => shared,
            Ok(Err(abandoned)) => {
                tracing::warn!(
                    request_id = %request.id,
                    error = %abandoned,
                    "Shared flight ended without a result"
                );
                return Err(GatewayError::Cancelled);
            }
            Err(_) => return Err(GatewayError::Timeout(deadline.as_millis() as u64)),
        };

        let completion = shared.value?;
        Ok(GatewayResponse::from_completion(
            request,
            &completion,
            shared.leader,
        ))
    }

    fn budget_posture(&self, request: &Request) -> Result<BudgetPosture, GatewayError> {
        let BudgetVerdict::Over { spent_usd, cap_usd } = self.ledger.check_budget(&request.tenant)
        else {
            return Ok(BudgetPosture::WithinBudget);
        };

        match self.ledger.config().over_budget_action {
            OverBudgetAction::Reject => {
                metrics::counter!("meridian_budget_rejections_total").increment(1);
                tracing::warn!(
                    request_id = %request.id,
                    tenant = %request.tenant,
                    spent_usd,
                    cap_usd,
                    "Tenant over budget, rejecting"
                );
                Err(GatewayError::BudgetExceeded {
                    tenant: request.tenant.clone(),
                    spent_usd,
                    cap_usd,
                })
            }
            OverBudgetAction::CheapTierOnly => {
                tracing::info!(
                    request_id = %request.id,
                    tenant = %request.tenant,
                    spent_usd,
                    cap_usd,
                    "Tenant over budget, restricting to cheap tier"
                );
                Ok(BudgetPosture::CheapTierOnly)
            }
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn cache(&self) -> &Arc<SemanticCache> {
        &self.cache
    }

    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.ledger
    }

    /// Snapshot of every provider with its current health.
    pub fn provider_health(&self) -> Vec<ProviderView> {
        self.registry.views()
    }

    /// True when at least one provider can currently be selected.
    pub fn is_ready(&self) -> bool {
        self.registry
            .iter()
            .any(|record| self.health.is_selectable(record))
    }

    pub fn tenant_usage(&self, tenant: &str) -> TenantUsage {
        self.ledger.tenant_usage(tenant)
    }

    pub fn provider_usage(&self) -> Vec<ProviderUsage> {
        self.ledger.provider_usage()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of distinct upstream flights currently running.
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    /// Drop the cached response for one exact key.
    pub fn invalidate_cache(&self, exact_key: &str) -> bool {
        self.cache.invalidate(exact_key)
    }

    /// Drop every cached response served by a provider.
    pub fn invalidate_provider_cache(&self, provider_id: &str) -> usize {
        self.cache.invalidate_provider(provider_id)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Spawn the cache sweeper, the active prober and the usage flusher as
    /// configured.
    pub fn start_background(&self, cancel_token: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if self.cache.is_enabled() && self.config.cache.sweep_interval_seconds > 0 {
            handles.push(Arc::clone(&self.cache).start_sweeper(cancel_token.clone()));
        }
        if self.config.health.active_probe.enabled {
            handles.push(Arc::clone(&self.health).start(cancel_token.clone()));
        }
        if let Some(store) = &self.store {
            handles.push(
                Arc::clone(&self.ledger).start_flusher(Arc::clone(store), cancel_token.clone()),
            );
        }

        tracing::debug!(tasks = handles.len(), "Background tasks started");
        handles
    }

    /// Reload in-window usage and unexpired cache entries from the store.
    ///
    /// A missing or failing store means a cold start; nothing here is fatal.
    pub async fn restore(&self) -> RestoreSummary {
        let Some(store) = &self.store else {
            return RestoreSummary::default();
        };
        let mut summary = RestoreSummary::default();

        let window = chrono::Duration::from_std(self.ledger.config().window())
            .unwrap_or_else(|_| chrono::Duration::days(1));
        match store.load_usage(Utc::now() - window).await {
            Ok(records) => summary.usage_records = self.ledger.restore(records),
            Err(e) => tracing::warn!(error = %e, "Usage restore failed, starting with empty windows"),
        }

        match store.load_cache_entries().await {
            Ok(entries) => summary.cache_entries = self.cache.import(entries),
            Err(e) => tracing::warn!(error = %e, "Cache restore failed, starting cold"),
        }

        tracing::info!(
            usage_records = summary.usage_records,
            cache_entries = summary.cache_entries,
            "Warm start complete"
        );
        summary
    }

    /// Flush pending usage and snapshot the cache to the store.
    ///
    /// Called once at shutdown, after background tasks have stopped.
    pub async fn persist(&self) -> Result<(), StoreError> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let flushed = self.ledger.flush(store.as_ref()).await?;
        let entries = self.cache.export();
        store.save_cache_entries(&entries).await?;

        tracing::info!(
            usage_records = flushed,
            cache_entries = entries.len(),
            "Gateway state persisted"
        );
        Ok(())
    }
}

/// Single-flight key for a request.
///
/// Only requests that would be routed and stored identically may share a
/// flight. Anything that changes candidate selection (budget posture and
/// declared requirements) or the cache store (bypass and class) is folded
/// into the key after the exact key.
fn flight_key(exact_key: &str, posture: BudgetPosture, request: &Request) -> String {
    let mut key = exact_key.to_string();
    if posture == BudgetPosture::CheapTierOnly {
        key.push_str("#cheap");
    }
    if request.bypass_cache {
        key.push_str("#bypass");
    }
    if let Some(class) = &request.class {
        key.push_str("#class=");
        key.push_str(class);
    }
    let Requirements {
        max_cost_usd,
        max_latency_ms,
    } = &request.requirements;
    if let Some(cost) = max_cost_usd {
        // Bit pattern keeps distinct ceilings distinct without float formatting
        key.push_str(&format!("#cost={:016x}", cost.to_bits()));
    }
    if let Some(latency) = max_latency_ms {
        key.push_str(&format!("#latency={}", latency));
    }
    key
}
