//! Usage ledger.
//!
//! Append-only usage records aggregated into per-tenant rolling spend
//! windows and per-provider totals. Budget checks only ever read the
//! aggregates. Each tenant's window has its own lock and provider totals
//! are atomics, so concurrent writers never lose updates.
//!
//! New records are queued for the background flusher, which appends them to
//! the persistent store in bounded batches.

mod window;

pub use window::SpendWindow;

use crate::config::BudgetConfig;
use crate::request::TokenUsage;
use crate::store::{PersistentStore, StoreError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const MICROS_PER_USD: f64 = 1_000_000.0;
const FLUSH_BATCH: usize = 1_000;

fn to_micros(usd: f64) -> u64 {
    if usd.is_finite() && usd > 0.0 {
        (usd * MICROS_PER_USD).round() as u64
    } else {
        0
    }
}

fn to_usd(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_USD
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One completed (or billed-failed) provider call. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub tenant: String,
    pub provider_id: String,
    pub request_id: String,
    pub model: String,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    /// The call failed but the provider still charged for it
    #[serde(default)]
    pub billed_failure: bool,
    pub timestamp: DateTime<Utc>,
}

/// Result of a budget check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetVerdict {
    /// No cap configured for the tenant
    Unlimited,
    Within { spent_usd: f64, cap_usd: f64 },
    Over { spent_usd: f64, cap_usd: f64 },
}

impl BudgetVerdict {
    pub fn is_over(&self) -> bool {
        matches!(self, Self::Over { .. })
    }
}

/// Aggregated usage for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantUsage {
    pub tenant: String,
    /// Spend inside the rolling window
    pub window_spend_usd: f64,
    pub window_seconds: u64,
    pub cap_usd: Option<f64>,
    /// Spend since startup (plus restored window)
    pub total_spend_usd: f64,
    pub requests: u64,
}

/// Aggregated usage for one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderUsage {
    pub provider_id: String,
    pub spend_usd: f64,
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

struct TenantSpend {
    window: Mutex<SpendWindow>,
    total_micros: AtomicU64,
    requests: AtomicU64,
}

#[derive(Default)]
struct ProviderTotals {
    micros: AtomicU64,
    requests: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

/// Per-tenant and per-provider usage aggregation.
pub struct UsageLedger {
    config: BudgetConfig,
    origin: Instant,
    tenants: DashMap<String, Arc<TenantSpend>>,
    providers: DashMap<String, Arc<ProviderTotals>>,
    recent: Mutex<VecDeque<UsageRecord>>,
    pending: Mutex<VecDeque<UsageRecord>>,
}

impl UsageLedger {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            origin: Instant::now(),
            tenants: DashMap::new(),
            providers: DashMap::new(),
            recent: Mutex::new(VecDeque::new()),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    fn tenant(&self, tenant: &str) -> Arc<TenantSpend> {
        if let Some(existing) = self.tenants.get(tenant) {
            return Arc::clone(existing.value());
        }
        let entry = self.tenants.entry(tenant.to_string()).or_insert_with(|| {
            Arc::new(TenantSpend {
                window: Mutex::new(SpendWindow::new(
                    self.config.window(),
                    self.config.bucket_count,
                    self.origin,
                )),
                total_micros: AtomicU64::new(0),
                requests: AtomicU64::new(0),
            })
        });
        Arc::clone(entry.value())
    }

    fn provider(&self, provider_id: &str) -> Arc<ProviderTotals> {
        if let Some(existing) = self.providers.get(provider_id) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.providers
                .entry(provider_id.to_string())
                .or_default()
                .value(),
        )
    }

    fn aggregate(&self, record: &UsageRecord, age: Option<Duration>) -> bool {
        let micros = to_micros(record.cost_usd);
        let now = Instant::now();
        let tenant = self.tenant(&record.tenant);

        let in_window = {
            let mut window = lock(&tenant.window);
            match age {
                None => {
                    window.add(micros, now);
                    true
                }
                Some(age) => window.add_aged(micros, age, now),
            }
        };
        tenant.total_micros.fetch_add(micros, Ordering::Relaxed);
        tenant.requests.fetch_add(1, Ordering::Relaxed);

        let provider = self.provider(&record.provider_id);
        provider.micros.fetch_add(micros, Ordering::Relaxed);
        provider.requests.fetch_add(1, Ordering::Relaxed);
        provider
            .prompt_tokens
            .fetch_add(u64::from(record.usage.prompt_tokens), Ordering::Relaxed);
        provider
            .completion_tokens
            .fetch_add(u64::from(record.usage.completion_tokens), Ordering::Relaxed);

        in_window
    }

    fn retain(&self, queue: &Mutex<VecDeque<UsageRecord>>, record: UsageRecord) -> bool {
        let mut queue = lock(queue);
        queue.push_back(record);
        if queue.len() > self.config.retained_records.max(1) {
            queue.pop_front();
            return false;
        }
        true
    }

    /// Append a usage record and update aggregates.
    pub fn record(&self, record: UsageRecord) {
        self.aggregate(&record, None);

        metrics::counter!("meridian_usage_cost_micros_total",
            "provider" => record.provider_id.clone()
        )
        .increment(to_micros(record.cost_usd));

        tracing::debug!(
            tenant = %record.tenant,
            provider_id = %record.provider_id,
            cost_usd = record.cost_usd,
            billed_failure = record.billed_failure,
            "Usage recorded"
        );

        self.retain(&self.recent, record.clone());
        if !self.retain(&self.pending, record) {
            tracing::warn!("Usage flush queue full, dropping oldest unflushed record");
        }
    }

    /// Rolling-window spend for a tenant.
    pub fn tenant_spend(&self, tenant: &str) -> f64 {
        match self.tenants.get(tenant) {
            Some(spend) => to_usd(lock(&spend.window).total(Instant::now())),
            None => 0.0,
        }
    }

    /// Compare a tenant's rolling spend against its cap.
    ///
    /// A tenant whose spend has reached the cap is over budget.
    pub fn check_budget(&self, tenant: &str) -> BudgetVerdict {
        let Some(cap_usd) = self.config.cap_for(tenant) else {
            return BudgetVerdict::Unlimited;
        };
        let spent_usd = self.tenant_spend(tenant);
        if spent_usd >= cap_usd {
            BudgetVerdict::Over { spent_usd, cap_usd }
        } else {
            BudgetVerdict::Within { spent_usd, cap_usd }
        }
    }

    pub fn tenant_usage(&self, tenant: &str) -> TenantUsage {
        let (total, requests) = match self.tenants.get(tenant) {
            Some(spend) => (
                spend.total_micros.load(Ordering::Relaxed),
                spend.requests.load(Ordering::Relaxed),
            ),
            None => (0, 0),
        };
        TenantUsage {
            tenant: tenant.to_string(),
            window_spend_usd: self.tenant_spend(tenant),
            window_seconds: self.config.window_seconds,
            cap_usd: self.config.cap_for(tenant),
            total_spend_usd: to_usd(total),
            requests,
        }
    }

    /// Totals for every provider that has recorded usage, sorted by id.
    pub fn provider_usage(&self) -> Vec<ProviderUsage> {
        let mut usage: Vec<ProviderUsage> = self
            .providers
            .iter()
            .map(|entry| {
                let t = entry.value();
                ProviderUsage {
                    provider_id: entry.key().clone(),
                    spend_usd: to_usd(t.micros.load(Ordering::Relaxed)),
                    requests: t.requests.load(Ordering::Relaxed),
                    prompt_tokens: t.prompt_tokens.load(Ordering::Relaxed),
                    completion_tokens: t.completion_tokens.load(Ordering::Relaxed),
                }
            })
            .collect();
        usage.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        usage
    }

    /// Most recent records, newest last.
    pub fn recent(&self, limit: usize) -> Vec<UsageRecord> {
        let recent = lock(&self.recent);
        let skip = recent.len().saturating_sub(limit);
        recent.iter().skip(skip).cloned().collect()
    }

    /// Records not yet handed to the store.
    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Rebuild aggregates from persisted records.
    ///
    /// Records outside the rolling window still count toward totals but not
    /// toward budget. They are not re-queued for flushing.
    pub fn restore(&self, records: Vec<UsageRecord>) -> usize {
        let now_wall = Utc::now();
        let mut in_window = 0;
        for record in records {
            let age = (now_wall - record.timestamp)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if self.aggregate(&record, Some(age)) {
                in_window += 1;
            }
            self.retain(&self.recent, record);
        }
        in_window
    }

    /// Hand queued records to the store in batches.
    ///
    /// On failure the unsent batch is put back at the front of the queue.
    pub async fn flush(&self, store: &dyn PersistentStore) -> Result<usize, StoreError> {
        let mut flushed = 0;
        loop {
            let batch: Vec<UsageRecord> = {
                let mut pending = lock(&self.pending);
                let n = pending.len().min(FLUSH_BATCH);
                pending.drain(..n).collect()
            };
            if batch.is_empty() {
                return Ok(flushed);
            }

            if let Err(e) = store.append_usage(&batch).await {
                let mut pending = lock(&self.pending);
                for record in batch.into_iter().rev() {
                    pending.push_front(record);
                }
                return Err(e);
            }
            flushed += batch.len();
        }
    }

    /// Start the background flusher.
    /// Performs a final flush when cancelled.
    pub fn start_flusher(
        self: Arc<Self>,
        store: Arc<dyn PersistentStore>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_millis(self.config.flush_interval_ms.max(10));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            tracing::info!(
                interval_ms = period.as_millis() as u64,
                "Usage flusher started"
            );

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        if let Err(e) = self.flush(store.as_ref()).await {
                            tracing::warn!(error = %e, "Final usage flush failed");
                        }
                        tracing::info!("Usage flusher shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        match self.flush(store.as_ref()).await {
                            Ok(0) => {}
                            Ok(n) => tracing::debug!(records = n, "Flushed usage records"),
                            Err(e) => tracing::warn!(error = %e, "Usage flush failed, will retry"),
                        }
                    }
                }
            }
        })
    }
}
