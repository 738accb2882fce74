use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ReconError, Result};

/// Key-value storage behind the staged cache.
///
/// Implementations never fail loudly: a write that did not happen returns
/// `false`, a missing or expired entry reads as `None`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool;

    async fn get(&self, key: &str) -> Option<String>;

    /// Returns whether an entry was removed.
    async fn delete(&self, key: &str) -> bool;

    async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }
}

struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

/// Process-local store, used by tests and `--cache memory` runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        let entry = MemoryEntry {
            value: value.to_owned(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.lock().await.insert(key.to_owned(), entry);
        true
    }

    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.lock().await.remove(key).is_some()
    }
}

/// On-disk entry: the payload plus its absolute expiry.
#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// One JSON file per key in the platform cache directory:
/// - Linux: `~/.cache/release-recon/`
/// - macOS: `~/Library/Caches/release-recon/`
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// Opens (and creates if needed) the cache directory.
    ///
    /// Uses `directory` when given, otherwise the platform cache directory.
    ///
    /// # Errors
    ///
    /// Returns error if no cache directory can be determined or created.
    pub fn new(directory: Option<PathBuf>) -> Result<Self> {
        let directory = match directory {
            Some(directory) => directory,
            None => dirs::cache_dir()
                .ok_or_else(|| ReconError::Cache("No cache directory found".into()))?
                .join("release-recon"),
        };

        std::fs::create_dir_all(&directory)?;
        info!("Stage cache at: {}", directory.display());

        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    // "recon:abc:work_items" -> "recon_3aabc_3awork_5fitems.json"
    // Every byte outside [A-Za-z0-9.-] is escaped as `_xx`, so distinct keys never share a file.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut file_name = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
                file_name.push(char::from(byte));
            } else {
                let _ = write!(file_name, "_{byte:02x}");
            }
        }
        self.directory.join(file_name + ".json")
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        let expires_at = match ttl.map(chrono::Duration::from_std).transpose() {
            Ok(ttl) => ttl.map(|ttl| Utc::now() + ttl),
            Err(e) => {
                warn!("Ignoring out-of-range cache TTL: {e}");
                None
            }
        };
        let entry = FileEntry {
            value: value.to_owned(),
            expires_at,
        };

        let content = match serde_json::to_string(&entry) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to encode cache entry {key}: {e}");
                return false;
            }
        };

        let path = self.path_for(key);
        match tokio::fs::write(&path, content).await {
            Ok(()) => {
                debug!("Saved cache entry: {}", path.display());
                true
            }
            Err(e) => {
                warn!("Failed to write cache file {}: {e}", path.display());
                false
            }
        }
    }

    async fn get(&self, key: &str) -> Option<String> {
        let path = self.path_for(key);
        let content = tokio::fs::read_to_string(&path).await.ok()?;

        let Ok(entry) = serde_json::from_str::<FileEntry>(&content) else {
            warn!("Discarding unreadable cache file: {}", path.display());
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        };

        if entry.expires_at.is_some_and(|at| at <= Utc::now()) {
            debug!("Cache entry expired: {}", path.display());
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }

        Some(entry.value)
    }

    async fn delete(&self, key: &str) -> bool {
        tokio::fs::remove_file(self.path_for(key)).await.is_ok()
    }
}
