//! Persistent store configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where usage records and cache snapshots survive restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub enabled: bool,
    /// Directory holding `usage.jsonl` and `cache.json`
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("./meridian-data"),
        }
    }
}
