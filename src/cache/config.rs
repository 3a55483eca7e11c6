//! Configuration for the semantic cache.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Semantic cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether response caching is enabled
    pub enabled: bool,
    /// Minimum cosine similarity for a semantic hit
    pub similarity_threshold: f32,
    /// Per request-class threshold overrides (e.g. "creative" = 0.98)
    pub class_thresholds: HashMap<String, f32>,
    /// Default time-to-live for entries
    pub ttl_seconds: u64,
    /// Per request-class TTL overrides
    pub class_ttl_seconds: HashMap<String, u64>,
    /// Capacity bound; least-recently-hit entries are evicted beyond it
    pub max_entries: usize,
    /// Seconds between background sweeps of expired entries (0 disables)
    pub sweep_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.95,
            class_thresholds: HashMap::new(),
            ttl_seconds: 3600,
            class_ttl_seconds: HashMap::new(),
            max_entries: 10_000,
            sweep_interval_seconds: 60,
        }
    }
}

impl CacheConfig {
    /// Similarity threshold for a request class, falling back to the default.
    pub fn threshold_for(&self, class: Option<&str>) -> f32 {
        class
            .and_then(|c| self.class_thresholds.get(c))
            .copied()
            .unwrap_or(self.similarity_threshold)
    }

    /// TTL for a request class, falling back to the default.
    pub fn ttl_for(&self, class: Option<&str>) -> Duration {
        let secs = class
            .and_then(|c| self.class_ttl_seconds.get(c))
            .copied()
            .unwrap_or(self.ttl_seconds);
        Duration::from_secs(secs)
    }

    /// Validate thresholds and capacity.
    pub fn validate(&self) -> Result<(), String> {
        let valid = |t: f32| t > 0.0 && t <= 1.0;

        if !valid(self.similarity_threshold) {
            return Err("similarity_threshold must be in (0, 1]".to_string());
        }
        for (class, threshold) in &self.class_thresholds {
            if !valid(*threshold) {
                return Err(format!("class_thresholds.{} must be in (0, 1]", class));
            }
        }
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }
        Ok(())
    }
}
