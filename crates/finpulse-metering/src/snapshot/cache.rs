//! Snapshot cache with DashMap
//!
//! Keeps the last successfully parsed response per endpoint key and persists
//! the whole map to one JSON file. Each flush fully replaces the previous file
//! through a temp file and rename, so readers never see a partial write.

use chrono::Utc;
use dashmap::DashMap;
use finpulse_common::{FinPulseError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Default location of the snapshot file
pub const DEFAULT_SNAPSHOT_PATH: &str = "data/latest-snapshot.json";

/// Point-in-time copy of the cache, also the on-disk format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotView {
    /// RFC 3339 time the view was taken
    pub timestamp: String,
    pub endpoints: BTreeMap<String, Value>,
}

/// Concurrent last-known-good response store
pub struct SnapshotCache {
    entries: DashMap<String, Value>,
    path: PathBuf,
    /// Serializes flushes from concurrent poll cycles
    flush_lock: Mutex<()>,
    flushes: AtomicU64,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            entries: DashMap::new(),
            path: path.into(),
            flush_lock: Mutex::new(()),
            flushes: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse and store a raw response body
    ///
    /// Returns the parsed value. Empty bodies are ignored and malformed JSON
    /// is logged and dropped; in both cases the cached value is unchanged.
    pub fn put(&self, key: &str, raw: &str) -> Option<Value> {
        if raw.trim().is_empty() {
            debug!(key = %key, "Ignoring empty response body");
            return None;
        }

        match serde_json::from_str::<Value>(raw) {
            Ok(value) => {
                self.entries.insert(key.to_string(), value.clone());
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Dropping malformed JSON response");
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of completed flushes
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Read-only view of the current entries
    pub fn snapshot(&self) -> SnapshotView {
        let endpoints = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        SnapshotView {
            timestamp: Utc::now().to_rfc3339(),
            endpoints,
        }
    }

    /// Write the whole map to the snapshot file
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock().await;

        let view = self.snapshot();
        let body = serde_json::to_vec_pretty(&view)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = temp_path(&self.path)?;
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        self.flushes.fetch_add(1, Ordering::Relaxed);
        info!(entries = view.endpoints.len(), "Snapshot flushed");
        Ok(())
    }

    /// Load a previously flushed snapshot file
    pub async fn read_file(path: &Path) -> Result<SnapshotView> {
        let body = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn temp_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| FinPulseError::Storage(format!("invalid snapshot path: {}", path.display())))?;
    let mut tmp_name = name.to_os_string();
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_put_parses_and_overwrites() {
        let cache = SnapshotCache::new("unused.json");

        assert!(cache.put("list_sessions", r#"{"items":[1]}"#).is_some());
        assert!(cache.put("list_sessions", r#"{"items":[2]}"#).is_some());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("list_sessions"), Some(json!({"items":[2]})));
    }

    #[test]
    fn test_malformed_and_empty_bodies_keep_previous_value() {
        let cache = SnapshotCache::new("unused.json");
        cache.put("audit_logs", r#"[1,2]"#);

        assert!(cache.put("audit_logs", "{not json").is_none());
        assert!(cache.put("audit_logs", "   ").is_none());
        assert_eq!(cache.get("audit_logs"), Some(json!([1, 2])));
    }

    #[tokio::test]
    async fn test_flush_creates_parent_and_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("latest-snapshot.json");
        let cache = SnapshotCache::new(&path);

        cache.put("a", r#"{"v":1}"#);
        cache.flush().await.unwrap();
        cache.put("a", r#"{"v":2}"#);
        cache.put("b__tenant_org-1", r#"[]"#);
        cache.flush().await.unwrap();

        let view = SnapshotCache::read_file(&path).await.unwrap();
        assert_eq!(view.endpoints.len(), 2);
        assert_eq!(view.endpoints["a"], json!({"v":2}));
        assert_eq!(cache.flush_count(), 2);
        assert!(!dir.path().join("nested").join("latest-snapshot.json.tmp").exists());

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(raw.contains("\n  \"endpoints\""));
    }

    #[tokio::test]
    async fn test_concurrent_flushes_leave_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        let cache = Arc::new(SnapshotCache::new(&path));

        let mut handles = Vec::new();
        for i in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.put(&format!("key{}", i), "1");
                cache.flush().await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let view = SnapshotCache::read_file(&path).await.unwrap();
        assert_eq!(view.endpoints.len(), 8);
    }
}
