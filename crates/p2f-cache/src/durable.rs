//! Durable artifact index.
//!
//! Maps a prompt + quality tag to a rendered artifact on disk. All entries are
//! persisted as one JSON document that is rewritten after every mutation.
//! Readers use an in-memory mirror; writers serialize through a single
//! persist lock so the document is never written by two tasks at once.
//!
//! Only metadata is managed here. Backing files are deleted by the render
//! retention sweep, never by this cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{CacheError, CacheResult};
use crate::key::cache_key;
use crate::names;

/// Default metadata document name, stored under the cache root.
pub const METADATA_FILE: &str = "cache_metadata.json";

const TIER: &str = "durable";

/// Durable tier configuration.
#[derive(Debug, Clone)]
pub struct DurableCacheConfig {
    /// Directory holding the metadata document
    pub root: PathBuf,
    /// Entry lifetime, measured from creation
    pub ttl: Duration,
    pub metadata_file: String,
}

impl DurableCacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ttl: Duration::from_secs(7 * 24 * 3600),
            metadata_file: METADATA_FILE.to_string(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(&self.metadata_file)
    }
}

/// One persisted entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableEntry {
    /// Prompt as supplied by the caller
    pub prompt: String,
    /// Path of the retained artifact
    pub video_path: PathBuf,
    /// Quality tag the artifact was rendered at
    pub quality: String,
    /// Creation time, seconds since the Unix epoch
    pub created_at: f64,
}

impl DurableEntry {
    fn is_expired(&self, now: f64, ttl: Duration) -> bool {
        now - self.created_at >= ttl.as_secs_f64()
    }
}

/// Durable tier statistics.
#[derive(Debug, Clone, Serialize)]
pub struct DurableCacheStats {
    pub entries: usize,
    /// Combined size of the backing files that still exist
    pub total_size_bytes: u64,
    pub ttl_secs: u64,
    pub metadata_path: PathBuf,
}

/// JSON-backed registry of rendered artifacts.
pub struct DurableCache {
    config: DurableCacheConfig,
    metadata_path: PathBuf,
    entries: RwLock<HashMap<String, DurableEntry>>,
    persist_lock: Mutex<()>,
}

impl DurableCache {
    /// Open the cache, loading any existing metadata document.
    ///
    /// A missing or unreadable document yields an empty cache; the error is
    /// logged and the process keeps running.
    pub async fn open(config: DurableCacheConfig) -> Self {
        let metadata_path = config.metadata_path();

        let entries = match load_metadata(&metadata_path).await {
            Ok(entries) => {
                info!(
                    path = %metadata_path.display(),
                    entries = entries.len(),
                    "Loaded durable cache metadata"
                );
                entries
            }
            Err(e) => {
                warn!(error = %e, "Durable cache metadata unusable, starting empty");
                HashMap::new()
            }
        };

        Self {
            config,
            metadata_path,
            entries: RwLock::new(entries),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &DurableCacheConfig {
        &self.config
    }

    /// Artifact path for `prompt` at `tag`, if the entry is fresh and its
    /// file still exists. Stale entries are removed from the metadata.
    pub async fn get(&self, prompt: &str, tag: &str) -> Option<PathBuf> {
        self.get_at(prompt, tag, now_epoch()).await
    }

    /// Register `video_path` as the artifact for `prompt` at `tag`.
    ///
    /// The in-memory mirror is updated even when persisting fails.
    pub async fn set(&self, prompt: &str, video_path: &Path, tag: &str) -> CacheResult<()> {
        self.set_at(prompt, video_path, tag, now_epoch()).await
    }

    /// Remove every entry that is expired or whose file is gone.
    ///
    /// Returns the number of removed entries. Backing files are untouched.
    pub async fn cleanup_expired(&self) -> CacheResult<usize> {
        self.cleanup_expired_at(now_epoch()).await
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub async fn stats(&self) -> DurableCacheStats {
        let paths: Vec<PathBuf> = self
            .read()
            .values()
            .map(|entry| entry.video_path.clone())
            .collect();

        let mut total_size_bytes = 0;
        for path in &paths {
            if let Ok(meta) = tokio::fs::metadata(path).await {
                total_size_bytes += meta.len();
            }
        }

        DurableCacheStats {
            entries: paths.len(),
            total_size_bytes,
            ttl_secs: self.config.ttl.as_secs(),
            metadata_path: self.metadata_path.clone(),
        }
    }

    pub(crate) async fn get_at(&self, prompt: &str, tag: &str, now: f64) -> Option<PathBuf> {
        let key = cache_key(prompt, tag);
        let entry = self.read().get(&key).cloned();

        let Some(entry) = entry else {
            counter!(names::CACHE_MISSES_TOTAL, "tier" => TIER).increment(1);
            return None;
        };

        let expired = entry.is_expired(now, self.config.ttl);
        let missing = !file_exists(&entry.video_path).await;

        if expired || missing {
            debug!(
                cache_key = %key,
                expired,
                missing,
                "Dropping stale durable cache entry"
            );
            if self.remove_if_unchanged(&key, &entry) {
                if let Err(e) = self.persist().await {
                    warn!(error = %e, "Failed to persist durable cache after eviction");
                }
                counter!(names::CACHE_EVICTIONS_TOTAL, "tier" => TIER).increment(1);
            }
            counter!(names::CACHE_MISSES_TOTAL, "tier" => TIER).increment(1);
            return None;
        }

        counter!(names::CACHE_HITS_TOTAL, "tier" => TIER).increment(1);
        debug!(cache_key = %key, path = %entry.video_path.display(), "Durable cache hit");
        Some(entry.video_path)
    }

    pub(crate) async fn set_at(
        &self,
        prompt: &str,
        video_path: &Path,
        tag: &str,
        now: f64,
    ) -> CacheResult<()> {
        let key = cache_key(prompt, tag);
        let entry = DurableEntry {
            prompt: prompt.to_string(),
            video_path: video_path.to_path_buf(),
            quality: tag.to_string(),
            created_at: now,
        };

        self.write().insert(key.clone(), entry);
        debug!(cache_key = %key, path = %video_path.display(), "Registered durable cache entry");

        self.persist().await
    }

    pub(crate) async fn cleanup_expired_at(&self, now: f64) -> CacheResult<usize> {
        let snapshot: Vec<(String, DurableEntry)> = self
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut stale = Vec::new();
        for (key, entry) in snapshot {
            if entry.is_expired(now, self.config.ttl) || !file_exists(&entry.video_path).await {
                stale.push((key, entry));
            }
        }

        if stale.is_empty() {
            return Ok(0);
        }

        let removed = stale
            .iter()
            .filter(|(key, entry)| self.remove_if_unchanged(key, entry))
            .count();

        counter!(names::CACHE_EVICTIONS_TOTAL, "tier" => TIER).increment(removed as u64);
        info!(removed, "Cleaned up durable cache entries");

        self.persist().await?;
        Ok(removed)
    }

    /// Remove `key` only if it still maps to the entry that was checked.
    ///
    /// Staleness is checked off the lock, so a `set` may replace the entry
    /// in between; the replacement must survive.
    fn remove_if_unchanged(&self, key: &str, checked: &DurableEntry) -> bool {
        let mut entries = self.write();
        if entries.get(key) != Some(checked) {
            return false;
        }
        entries.remove(key).is_some()
    }

    /// Rewrite the metadata document from the current mirror.
    async fn persist(&self) -> CacheResult<()> {
        let _guard = self.persist_lock.lock().await;

        // Snapshot under the persist lock so the last writer always writes
        // the newest mirror.
        let json = {
            let entries = self.read();
            serde_json::to_vec_pretty(&*entries)?
        };

        if let Some(parent) = self.metadata_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CacheError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let tmp_path = self.metadata_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|source| CacheError::Write {
                path: tmp_path.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp_path, &self.metadata_path)
            .await
            .map_err(|source| CacheError::Write {
                path: self.metadata_path.clone(),
                source,
            })?;

        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, DurableEntry>> {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, DurableEntry>> {
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

async fn load_metadata(path: &Path) -> CacheResult<HashMap<String, DurableEntry>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(source) => {
            return Err(CacheError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    Ok(serde_json::from_slice(&bytes)?)
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn now_epoch() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
