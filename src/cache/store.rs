// src/cache/store.rs
//! Persistent, TTL-aware namespaces backing the enrichment data.
//!
//! Each namespace lives in memory as a `DashMap` and is mirrored to one JSON file under the
//! data directory. Writes never wait on disk: `set` schedules a best-effort persist of the
//! whole namespace, and persists are serialized so the last one on disk carries the newest
//! snapshot. Pruning at load time is coarse: when the file itself is older than the TTL the
//! whole namespace is discarded, even if some entries inside it would still be fresh.

use super::entry::{CacheEntry, CachedValue};
use super::CacheKind;
use crate::adapters::feed::FeedContent;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::utils::{modified_millis, now_millis};
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Counters for one namespace
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceStats {
    pub entries: usize,
    pub empty_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub persist_failures: u64,
}

pub struct Namespace<T> {
    kind: CacheKind,
    ttl: Duration,
    path: PathBuf,
    entries: Arc<DashMap<String, CacheEntry<T>>>,
    persist_lock: Arc<Mutex<()>>,
    hits: AtomicU64,
    misses: AtomicU64,
    persist_failures: Arc<AtomicU64>,
    read_only: bool,
}

impl<T> Namespace<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Opens the namespace file in `dir`. A missing or corrupt file yields an empty
    /// namespace; a file whose mtime is older than `ttl` is deleted.
    pub fn load(kind: CacheKind, dir: &Path, ttl: Duration) -> Self {
        Self::open(kind, dir, ttl, false)
    }

    /// Like `load`, but the file is never modified: a stale file is only skipped, and
    /// `set` and `flush` stay in memory.
    pub fn load_read_only(kind: CacheKind, dir: &Path, ttl: Duration) -> Self {
        Self::open(kind, dir, ttl, true)
    }

    fn open(kind: CacheKind, dir: &Path, ttl: Duration, read_only: bool) -> Self {
        let path = dir.join(kind.file_name());
        let entries = DashMap::new();

        match modified_millis(&path) {
            None => debug!("[Cache] No {} cache at {}", kind, path.display()),
            Some(mtime) if is_file_stale(mtime, ttl, now_millis()) && read_only => {
                info!(
                    "[Cache] {} cache file {} is older than {:?}, ignoring",
                    kind,
                    path.display(),
                    ttl
                );
            }
            Some(mtime) if is_file_stale(mtime, ttl, now_millis()) => {
                info!(
                    "[Cache] {} cache file {} is older than {:?}, discarding",
                    kind,
                    path.display(),
                    ttl
                );
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("[Cache] Failed to remove stale {}: {}", path.display(), e);
                }
            }
            Some(_) => match read_entries::<T>(&path) {
                Ok(loaded) => {
                    info!("[Cache] Loaded {} {} entries", loaded.len(), kind);
                    for (key, entry) in loaded {
                        entries.insert(key, entry);
                    }
                }
                Err(e) => warn!(
                    "[Cache] Ignoring unreadable {} cache {}: {}",
                    kind,
                    path.display(),
                    e
                ),
            },
        }

        Self {
            kind,
            ttl,
            path,
            entries: Arc::new(entries),
            persist_lock: Arc::new(Mutex::new(())),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            persist_failures: Arc::new(AtomicU64::new(0)),
            read_only,
        }
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        match self.entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value().clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Records a fetch result; `None` is stored as `Empty`. Persists in the background.
    pub fn set(&self, key: &str, value: Option<T>) {
        self.insert_entry(key, CacheEntry::new(value, now_millis()));
    }

    pub fn insert_entry(&self, key: &str, entry: CacheEntry<T>) {
        self.entries.insert(key.to_string(), entry);
        self.schedule_persist();
    }

    pub fn is_fresh(&self, entry: &CacheEntry<T>) -> bool {
        entry.is_fresh_at(self.ttl, now_millis())
    }

    /// True iff an entry exists and is fresh, `Empty` included.
    pub fn should_skip_refresh(&self, key: &str) -> bool {
        self.should_skip_refresh_at(key, now_millis())
    }

    pub fn should_skip_refresh_at(&self, key: &str, now_ms: i64) -> bool {
        self.entries
            .get(key)
            .map(|entry| entry.is_fresh_at(self.ttl, now_ms))
            .unwrap_or(false)
    }

    /// The value if the entry is fresh and not `Empty`.
    pub fn fresh_value(&self, key: &str) -> Option<T> {
        let entry = self.get(key)?;
        if !self.is_fresh(&entry) {
            return None;
        }
        match entry.value {
            CachedValue::Present(value) => Some(value),
            CachedValue::Empty => None,
        }
    }

    pub fn stats(&self) -> NamespaceStats {
        NamespaceStats {
            entries: self.entries.len(),
            empty_entries: self.entries.iter().filter(|e| e.value().value.is_empty()).count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }

    /// Writes the current snapshot and waits for it.
    pub async fn flush(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        persist(&self.path, &self.persist_lock, &self.entries).await
    }

    fn schedule_persist(&self) {
        if self.read_only {
            return;
        }
        let path = self.path.clone();
        let lock = Arc::clone(&self.persist_lock);
        let entries = Arc::clone(&self.entries);
        let failures = Arc::clone(&self.persist_failures);
        let kind = self.kind;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = persist(&path, &lock, &entries).await {
                        failures.fetch_add(1, Ordering::Relaxed);
                        warn!("[Cache] Failed to save {} cache: {}", kind, e);
                    }
                });
            }
            Err(_) => {
                let _guard = lock.blocking_lock();
                if let Err(e) = write_snapshot_blocking(&path, &entries) {
                    failures.fetch_add(1, Ordering::Relaxed);
                    warn!("[Cache] Failed to save {} cache: {}", kind, e);
                }
            }
        }
    }
}

fn is_file_stale(mtime_ms: i64, ttl: Duration, now_ms: i64) -> bool {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    mtime_ms < now_ms.saturating_sub(ttl_ms)
}

fn read_entries<T: DeserializeOwned>(path: &Path) -> Result<HashMap<String, CacheEntry<T>>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn snapshot<T: Clone>(entries: &DashMap<String, CacheEntry<T>>) -> BTreeMap<String, CacheEntry<T>> {
    entries
        .iter()
        .map(|e| (e.key().clone(), e.value().clone()))
        .collect()
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

async fn persist<T: Clone + Serialize>(
    path: &Path,
    lock: &Mutex<()>,
    entries: &DashMap<String, CacheEntry<T>>,
) -> Result<()> {
    let _guard = lock.lock().await;
    // snapshot under the lock so the last writer has the newest state
    let json = serde_json::to_vec(&snapshot(entries))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn write_snapshot_blocking<T: Clone + Serialize>(
    path: &Path,
    entries: &DashMap<String, CacheEntry<T>>,
) -> Result<()> {
    let json = serde_json::to_vec(&snapshot(entries))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Per-kind cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStoreStats {
    pub image: NamespaceStats,
    pub video: NamespaceStats,
    pub feed: NamespaceStats,
}

/// The three enrichment namespaces.
pub struct CacheStore {
    pub image: Namespace<String>,
    /// bilibili bvid of the preview video
    pub video: Namespace<String>,
    pub feed: Namespace<FeedContent>,
}

impl CacheStore {
    pub fn load(config: &CacheConfig) -> Self {
        info!(
            "[Cache] Loading caches from {}{}",
            config.data_dir.display(),
            if config.read_only { " (read-only)" } else { "" }
        );
        let dir = &config.data_dir;
        let read_only = config.read_only;
        Self {
            image: Namespace::open(CacheKind::Image, dir, config.image_ttl, read_only),
            video: Namespace::open(CacheKind::Video, dir, config.video_ttl, read_only),
            feed: Namespace::open(CacheKind::Feed, dir, config.feed_ttl, read_only),
        }
    }

    pub fn should_skip_refresh(&self, kind: CacheKind, key: &str) -> bool {
        match kind {
            CacheKind::Image => self.image.should_skip_refresh(key),
            CacheKind::Video => self.video.should_skip_refresh(key),
            CacheKind::Feed => self.feed.should_skip_refresh(key),
        }
    }

    pub fn should_skip_refresh_at(&self, kind: CacheKind, key: &str, now_ms: i64) -> bool {
        match kind {
            CacheKind::Image => self.image.should_skip_refresh_at(key, now_ms),
            CacheKind::Video => self.video.should_skip_refresh_at(key, now_ms),
            CacheKind::Feed => self.feed.should_skip_refresh_at(key, now_ms),
        }
    }

    pub fn stats(&self) -> CacheStoreStats {
        CacheStoreStats {
            image: self.image.stats(),
            video: self.video.stats(),
            feed: self.feed.stats(),
        }
    }

    /// Flushes all namespaces; failures are logged and the first one returned.
    pub async fn flush(&self) -> Result<()> {
        let (image, video, feed) =
            tokio::join!(self.image.flush(), self.video.flush(), self.feed.flush());
        let mut first_error = None;
        for (kind, result) in [
            (CacheKind::Image, image),
            (CacheKind::Video, video),
            (CacheKind::Feed, feed),
        ] {
            if let Err(e) = result {
                warn!("[Cache] Flush of {} cache failed: {}", kind, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
