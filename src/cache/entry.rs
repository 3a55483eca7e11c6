//! Cache entry types.

use crate::request::TokenUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Canonical response payload stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub content: String,
    /// Model that produced the response
    pub model: String,
    pub usage: TokenUsage,
}

/// A cached response with its embedding and bookkeeping.
///
/// Everything except the hit counters is immutable after creation.
#[derive(Debug)]
pub struct CacheEntry {
    pub exact_key: String,
    /// Normalized model hint of the request; semantic hits stay within it
    pub model: String,
    pub embedding: Option<Arc<[f32]>>,
    pub response: CachedResponse,
    /// Provider that served the original request
    pub provider_id: String,
    /// Monotonic creation time (drives TTL)
    pub created_at: Instant,
    /// Wall-clock creation time (for persistence and display)
    pub created_wall: DateTime<Utc>,
    pub ttl: Duration,
    hit_count: AtomicU64,
    /// Milliseconds after `created_at` of the most recent hit
    last_hit_offset_ms: AtomicU64,
}

impl CacheEntry {
    pub fn new(
        exact_key: String,
        model: String,
        embedding: Option<Arc<[f32]>>,
        response: CachedResponse,
        provider_id: String,
        ttl: Duration,
    ) -> Self {
        Self::restored(
            exact_key,
            model,
            embedding,
            response,
            provider_id,
            Instant::now(),
            Utc::now(),
            ttl,
            0,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restored(
        exact_key: String,
        model: String,
        embedding: Option<Arc<[f32]>>,
        response: CachedResponse,
        provider_id: String,
        created_at: Instant,
        created_wall: DateTime<Utc>,
        ttl: Duration,
        hit_count: u64,
    ) -> Self {
        Self {
            exact_key,
            model,
            embedding,
            response,
            provider_id,
            created_at,
            created_wall,
            ttl,
            hit_count: AtomicU64::new(hit_count),
            last_hit_offset_ms: AtomicU64::new(0),
        }
    }

    /// Age of the entry on the monotonic clock.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// An entry is live while its age is strictly below its TTL.
    pub fn is_live(&self, now: Instant) -> bool {
        self.age(now) < self.ttl
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    /// Time of the most recent hit (creation time when never hit).
    pub fn last_hit(&self) -> Instant {
        self.created_at + Duration::from_millis(self.last_hit_offset_ms.load(Ordering::Relaxed))
    }

    /// Record a hit at `now`.
    pub fn touch(&self, now: Instant) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
        let offset = self.age(now).as_millis() as u64;
        self.last_hit_offset_ms.fetch_max(offset, Ordering::Relaxed);
    }

    /// Copy of this entry with the embedding dropped, keeping its clock and
    /// hit bookkeeping.
    pub(crate) fn without_embedding(&self) -> Self {
        let entry = Self::restored(
            self.exact_key.clone(),
            self.model.clone(),
            None,
            self.response.clone(),
            self.provider_id.clone(),
            self.created_at,
            self.created_wall,
            self.ttl,
            self.hit_count(),
        );
        entry
            .last_hit_offset_ms
            .store(self.last_hit_offset_ms.load(Ordering::Relaxed), Ordering::Relaxed);
        entry
    }

    /// Serializable copy for the persistent store.
    pub fn to_persisted(&self) -> PersistedEntry {
        PersistedEntry {
            exact_key: self.exact_key.clone(),
            model: self.model.clone(),
            embedding: self.embedding.as_ref().map(|e| e.to_vec()),
            response: self.response.clone(),
            provider_id: self.provider_id.clone(),
            created_at: self.created_wall,
            ttl_seconds: self.ttl.as_secs(),
            hit_count: self.hit_count(),
        }
    }
}

/// Wall-clock representation of a cache entry for durable storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub exact_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub response: CachedResponse,
    pub provider_id: String,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    #[serde(default)]
    pub hit_count: u64,
}

/// How a lookup matched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HitKind {
    /// Exact-key fast path
    Exact,
    /// Nearest-neighbour match at or above the threshold
    Semantic { similarity: f32 },
}

/// A successful cache lookup.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub entry: Arc<CacheEntry>,
    pub kind: HitKind,
}
