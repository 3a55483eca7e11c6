//! Directory-backed store: `usage.jsonl` plus a `cache.json` snapshot.

use super::{PersistentStore, StoreError};
use crate::cache::PersistedEntry;
use crate::ledger::UsageRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const USAGE_FILE: &str = "usage.jsonl";
const CACHE_FILE: &str = "cache.json";

/// Stores state as JSON files in one directory.
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (and create if needed) the store directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn usage_path(&self) -> PathBuf {
        self.dir.join(USAGE_FILE)
    }

    fn cache_path(&self) -> PathBuf {
        self.dir.join(CACHE_FILE)
    }
}

#[async_trait]
impl PersistentStore for FileStore {
    async fn append_usage(&self, records: &[UsageRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.usage_path())
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }

    async fn load_usage(&self, since: DateTime<Utc>) -> Result<Vec<UsageRecord>, StoreError> {
        let content = match tokio::fs::read_to_string(self.usage_path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<UsageRecord>(line) {
                Ok(record) if record.timestamp >= since => records.push(record),
                Ok(_) => {}
                // A torn final line from a crash must not block startup
                Err(e) => {
                    tracing::warn!(line = line_no + 1, error = %e, "Skipping corrupt usage record");
                }
            }
        }
        Ok(records)
    }

    async fn save_cache_entries(&self, entries: &[PersistedEntry]) -> Result<(), StoreError> {
        let json = serde_json::to_vec(entries)?;
        let tmp = self.dir.join(format!("{}.tmp", CACHE_FILE));

        let _guard = self.write_lock.lock().await;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, self.cache_path()).await?;
        Ok(())
    }

    async fn load_cache_entries(&self) -> Result<Vec<PersistedEntry>, StoreError> {
        match tokio::fs::read(self.cache_path()).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachedResponse;
    use crate::request::TokenUsage;

    fn usage(tenant: &str, timestamp: DateTime<Utc>) -> UsageRecord {
        UsageRecord {
            tenant: tenant.to_string(),
            provider_id: "p1".to_string(),
            request_id: "r1".to_string(),
            model: "m".to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
            cost_usd: 0.01,
            billed_failure: false,
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_usage_append_and_load_since() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        let now = Utc::now();
        let old = now - chrono::Duration::hours(2);
        store
            .append_usage(&[usage("old", old), usage("new", now)])
            .await
            .unwrap();
        store.append_usage(&[usage("newer", now)]).await.unwrap();

        let loaded = store
            .load_usage(now - chrono::Duration::hours(1))
            .await
            .unwrap();
        let tenants: Vec<_> = loaded.iter().map(|r| r.tenant.as_str()).collect();
        assert_eq!(tenants, vec!["new", "newer"]);
    }

    #[tokio::test]
    async fn test_missing_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("nested")).await.unwrap();

        assert!(store.load_usage(Utc::now()).await.unwrap().is_empty());
        assert!(store.load_cache_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_usage_line_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let now = Utc::now();
        store.append_usage(&[usage("a", now)]).await.unwrap();
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(USAGE_FILE))
            .await
            .unwrap()
            .write_all(b"{\"tenant\": \"trunc")
            .await
            .unwrap();

        let loaded = store
            .load_usage(now - chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_snapshot_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        let entry = |key: &str| PersistedEntry {
            exact_key: key.to_string(),
            model: "m".to_string(),
            embedding: Some(vec![1.0, 0.0]),
            response: CachedResponse {
                content: "hi".to_string(),
                model: "m".to_string(),
                usage: TokenUsage::default(),
            },
            provider_id: "p1".to_string(),
            created_at: Utc::now(),
            ttl_seconds: 60,
            hit_count: 2,
        };

        store.save_cache_entries(&[entry("a"), entry("b")]).await.unwrap();
        store.save_cache_entries(&[entry("c")]).await.unwrap();

        let loaded = store.load_cache_entries().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].exact_key, "c");
        assert_eq!(loaded[0].embedding, Some(vec![1.0, 0.0]));
    }
}
