//! Semantic response cache.
//!
//! Lookups try the exact key first and fall back to nearest-neighbour search
//! over live entries. Readers work on an immutable snapshot loaded from an
//! [`ArcSwap`], so they never block on writers and never observe a partially
//! written entry. Writers serialize on a mutex, clone the snapshot, apply
//! their change and publish the new snapshot.
//!
//! Semantic matches are confined to entries stored for the same model
//! hint. Sampling parameters are not compared: two prompts that differ only
//! in temperature may share a semantic hit, but never an exact one.
//!
//! Eviction removes TTL-expired entries first and only then the
//! least-recently-hit entry when the capacity bound is reached.

mod config;
mod entry;
mod error;
mod index;


pub use config::*;
pub use entry::*;
pub use error::*;
pub use index::*;

use crate::fingerprint::Fingerprint;
use crate::gateway::Degradation;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct Snapshot<I> {
    entries: HashMap<String, Arc<CacheEntry>>,
    index: I,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub exact_hits: u64,
    pub semantic_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Stores whose embedding was dropped for a dimension mismatch
    pub dimension_mismatches: u64,
}

/// Semantic cache over a pluggable vector index.
pub struct SemanticCache<I: VectorIndex = FlatIndex> {
    snapshot: ArcSwap<Snapshot<I>>,
    writer: Mutex<()>,
    config: CacheConfig,
    exact_hits: AtomicU64,
    semantic_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    dimension_mismatches: AtomicU64,
}

impl SemanticCache<FlatIndex> {
    /// Create a cache backed by a flat-scan index.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_index(config)
    }
}

impl<I: VectorIndex> SemanticCache<I> {
    /// Create a cache backed by the index type `I`.
    pub fn with_index(config: CacheConfig) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            writer: Mutex::new(()),
            config,
            exact_hits: AtomicU64::new(0),
            semantic_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            dimension_mismatches: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.snapshot.load().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find a reusable response for a fingerprint.
    ///
    /// The exact key wins regardless of the similarity threshold. Otherwise
    /// the single best live neighbour at or above the class threshold is
    /// returned; ties go to the most recently hit entry. Only entries stored
    /// for the fingerprint's model are semantic candidates.
    pub fn lookup(&self, fingerprint: &Fingerprint, class: Option<&str>) -> Option<CacheHit> {
        if !self.config.enabled {
            return None;
        }
        let exact_key = fingerprint.exact_key.as_str();

        let now = Instant::now();
        let snapshot = self.snapshot.load();

        if let Some(entry) = snapshot.entries.get(exact_key) {
            if entry.is_live(now) {
                entry.touch(now);
                self.exact_hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("meridian_cache_lookups_total", "result" => "exact_hit")
                    .increment(1);
                tracing::debug!(exact_key, "Cache exact hit");
                return Some(CacheHit {
                    entry: Arc::clone(entry),
                    kind: HitKind::Exact,
                });
            }
        }

        if let Some(query) = fingerprint.embedding.as_deref() {
            let threshold = self.config.threshold_for(class);
            let best = snapshot
                .index
                .search(query, threshold)
                .into_iter()
                .filter_map(|n| {
                    let entry = snapshot.entries.get(&n.key)?;
                    (entry.is_live(now) && entry.model == fingerprint.model)
                        .then_some((n.similarity, entry))
                })
                .max_by(|(sim_a, a), (sim_b, b)| {
                    sim_a
                        .total_cmp(sim_b)
                        .then_with(|| a.last_hit().cmp(&b.last_hit()))
                });

            if let Some((similarity, entry)) = best {
                entry.touch(now);
                self.semantic_hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("meridian_cache_lookups_total", "result" => "semantic_hit")
                    .increment(1);
                tracing::debug!(
                    exact_key,
                    matched_key = %entry.exact_key,
                    similarity,
                    threshold,
                    "Cache semantic hit"
                );
                return Some(CacheHit {
                    entry: Arc::clone(entry),
                    kind: HitKind::Semantic { similarity },
                });
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("meridian_cache_lookups_total", "result" => "miss").increment(1);
        tracing::debug!(exact_key, "Cache miss");
        None
    }

    /// Store a provider response under a fingerprint.
    ///
    /// Storing an exact key that already exists replaces the entry, so
    /// concurrent stores for one fingerprint never produce duplicates.
    pub fn store(
        &self,
        fingerprint: &Fingerprint,
        response: CachedResponse,
        provider_id: &str,
        class: Option<&str>,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        if !self.config.enabled {
            return Err(CacheError::Disabled);
        }

        let entry = Arc::new(CacheEntry::new(
            fingerprint.exact_key.clone(),
            fingerprint.model.clone(),
            fingerprint.embedding.clone(),
            response,
            provider_id.to_string(),
            self.config.ttl_for(class),
        ));
        let entry = self.insert_entry(entry)?;

        tracing::debug!(
            exact_key = %entry.exact_key,
            provider_id,
            semantic = entry.embedding.is_some(),
            "Cached response"
        );
        Ok(entry)
    }

    /// Store only when no live entry exists for the key.
    ///
    /// Used for late completions so they never clobber a fresher response.
    pub fn store_if_absent(
        &self,
        fingerprint: &Fingerprint,
        response: CachedResponse,
        provider_id: &str,
        class: Option<&str>,
    ) -> Result<Option<Arc<CacheEntry>>, CacheError> {
        let now = Instant::now();
        let exists = self
            .snapshot
            .load()
            .entries
            .get(&fingerprint.exact_key)
            .is_some_and(|e| e.is_live(now));
        if exists {
            return Ok(None);
        }
        self.store(fingerprint, response, provider_id, class).map(Some)
    }

    /// Publish an entry, returning the entry as actually stored.
    ///
    /// An embedding whose dimension disagrees with the index is dropped and
    /// the entry is kept exact-only.
    fn insert_entry(&self, entry: Arc<CacheEntry>) -> Result<Arc<CacheEntry>, CacheError> {
        let _guard = self.writer.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Cache writer lock poisoned, recovering");
            poisoned.into_inner()
        });

        let mut next: Snapshot<I> = (**self.snapshot.load()).clone();
        let key = entry.exact_key.clone();

        let entry = match entry.embedding.clone() {
            Some(embedding) => match next.index.insert(&key, embedding) {
                Ok(()) => entry,
                Err(CacheError::DimensionMismatch { expected, actual }) => {
                    next.index.remove(&key);
                    self.dimension_mismatches.fetch_add(1, Ordering::Relaxed);
                    Degradation::EmbeddingUnavailable.count();
                    tracing::warn!(
                        exact_key = %key,
                        expected,
                        actual,
                        "Embedding dimension differs from the index, caching exact-key only"
                    );
                    Arc::new(entry.without_embedding())
                }
                Err(e) => return Err(e),
            },
            None => {
                next.index.remove(&key);
                entry
            }
        };

        if !next.entries.contains_key(&key) && next.entries.len() >= self.config.max_entries {
            let now = Instant::now();
            self.remove_expired(&mut next, now);
            while next.entries.len() >= self.config.max_entries {
                if !self.evict_lru(&mut next) {
                    break;
                }
            }
        }

        next.entries.insert(key, Arc::clone(&entry));
        self.snapshot.store(Arc::new(next));
        Ok(entry)
    }

    fn remove_expired(&self, snapshot: &mut Snapshot<I>, now: Instant) -> usize {
        let expired: Vec<String> = snapshot
            .entries
            .iter()
            .filter(|(_, e)| !e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            snapshot.entries.remove(key);
            snapshot.index.remove(key);
        }

        if !expired.is_empty() {
            self.expirations
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            metrics::counter!("meridian_cache_evictions_total", "reason" => "expired")
                .increment(expired.len() as u64);
        }
        expired.len()
    }

    fn evict_lru(&self, snapshot: &mut Snapshot<I>) -> bool {
        let victim = snapshot
            .entries
            .values()
            .min_by(|a, b| {
                a.last_hit()
                    .cmp(&b.last_hit())
                    .then_with(|| a.created_at.cmp(&b.created_at))
            })
            .map(|e| e.exact_key.clone());

        let Some(key) = victim else {
            return false;
        };

        snapshot.entries.remove(&key);
        snapshot.index.remove(&key);
        self.evictions.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("meridian_cache_evictions_total", "reason" => "capacity").increment(1);
        tracing::debug!(exact_key = %key, "Evicted least recently hit cache entry");
        true
    }

    fn mutate(&self, f: impl FnOnce(&mut Snapshot<I>) -> usize) -> usize {
        let _guard = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next: Snapshot<I> = (**self.snapshot.load()).clone();
        let changed = f(&mut next);
        if changed > 0 {
            self.snapshot.store(Arc::new(next));
        }
        changed
    }

    /// Evict all TTL-expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let has_expired = self
            .snapshot
            .load()
            .entries
            .values()
            .any(|e| !e.is_live(now));
        if !has_expired {
            return 0;
        }
        self.mutate(|snapshot| self.remove_expired(snapshot, now))
    }

    /// Remove the entry for an exact key.
    pub fn invalidate(&self, exact_key: &str) -> bool {
        self.mutate(|snapshot| {
            snapshot.index.remove(exact_key);
            usize::from(snapshot.entries.remove(exact_key).is_some())
        }) > 0
    }

    /// Remove every entry served by a provider.
    pub fn invalidate_provider(&self, provider_id: &str) -> usize {
        self.mutate(|snapshot| {
            let keys: Vec<String> = snapshot
                .entries
                .values()
                .filter(|e| e.provider_id == provider_id)
                .map(|e| e.exact_key.clone())
                .collect();
            for key in &keys {
                snapshot.entries.remove(key);
                snapshot.index.remove(key);
            }
            keys.len()
        })
    }

    /// Drop all entries.
    pub fn clear(&self) {
        let _guard = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.snapshot.store(Arc::new(Snapshot::default()));
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            exact_hits: self.exact_hits.load(Ordering::Relaxed),
            semantic_hits: self.semantic_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            dimension_mismatches: self.dimension_mismatches.load(Ordering::Relaxed),
        }
    }

    /// Live entries in persistable form.
    pub fn export(&self) -> Vec<PersistedEntry> {
        let now = Instant::now();
        self.snapshot
            .load()
            .entries
            .values()
            .filter(|e| e.is_live(now))
            .map(|e| e.to_persisted())
            .collect()
    }

    /// Restore persisted entries, skipping expired or incompatible ones.
    ///
    /// Returns the number of entries restored.
    pub fn import(&self, entries: Vec<PersistedEntry>) -> usize {
        let now_wall = chrono::Utc::now();
        let now = Instant::now();
        let mut restored = 0;

        for persisted in entries {
            let ttl = Duration::from_secs(persisted.ttl_seconds);
            let age = (now_wall - persisted.created_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if age >= ttl {
                continue;
            }
            let Some(created_at) = now.checked_sub(age) else {
                continue;
            };

            let entry = Arc::new(CacheEntry::restored(
                persisted.exact_key,
                persisted.model,
                persisted.embedding.map(Arc::from),
                persisted.response,
                persisted.provider_id,
                created_at,
                persisted.created_at,
                ttl,
                persisted.hit_count,
            ));

            match self.insert_entry(entry) {
                Ok(_) => restored += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping persisted cache entry");
                }
            }
        }

        restored
    }

    /// Start the background sweeper that evicts expired entries.
    pub fn start_sweeper(self: Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.sweep_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            tracing::info!(
                interval_seconds = period.as_secs(),
                "Cache sweeper started"
            );

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        tracing::info!("Cache sweeper shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let removed = self.purge_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "Swept expired cache entries");
                        }
                    }
                }
            }
        })
    }
}
