// src/context.rs
//! The enrichment subsystem as one explicitly constructed object.
//!
//! `EnrichmentContext` owns the cache store, the fetch worker, the orchestrator, the retry
//! engine and (after `init`) the scheduler. Read paths go through it; none of them block on
//! the network.

use crate::adapters::ProviderAdapters;
use crate::cache::{CacheStore, CacheStoreStats};
use crate::catalog::{catalog_offset, Catalog};
use crate::config::{CacheConfig, Config};
use crate::enrichment::{
    self, EnrichedItem, ItemCacheStatus, RecentSeasonsStatus,
};
use crate::error::{EnrichError, Result};
use crate::refresh::{
    CatalogHandle, FailedItemsStatus, FetchWorker, ItemRefreshReport, RefreshOrchestrator,
    RefreshOutcome, RefreshScheduler, RetryEngine, RetryPassReport,
};
use chrono::Utc;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

pub struct EnrichmentContext {
    config: Arc<Config>,
    cache: Arc<CacheStore>,
    orchestrator: Arc<RefreshOrchestrator>,
    retry: Arc<RetryEngine>,
    catalog: CatalogHandle,
    scheduler: Mutex<Option<RefreshScheduler>>,
    shut_down: AtomicBool,
}

impl EnrichmentContext {
    /// Wires the subsystem around an already loaded cache store.
    pub fn new(
        config: Arc<Config>,
        catalog: Catalog,
        cache: Arc<CacheStore>,
        adapters: ProviderAdapters,
    ) -> Self {
        let worker = Arc::new(FetchWorker::new(cache.clone(), adapters));
        let retry = Arc::new(RetryEngine::new(config.retry_config(), worker.clone()));
        let orchestrator = Arc::new(RefreshOrchestrator::new(
            config.refresh_config(),
            cache.clone(),
            worker,
            retry.clone(),
        ));

        Self {
            config,
            cache,
            orchestrator,
            retry,
            catalog: Arc::new(RwLock::new(Arc::new(catalog))),
            scheduler: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Loads the caches and the catalog file named by `config`, with the HTTP adapters.
    /// A missing catalog file starts the context with an empty catalog.
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let cache_config = config.cache_config();
        Self::open(config, cache_config)
    }

    /// Same as `from_config`, but the cache files are left as they are on disk: stale files
    /// are skipped rather than deleted and nothing is persisted. For inspection commands.
    pub fn from_config_read_only(config: Arc<Config>) -> Result<Self> {
        let cache_config = CacheConfig {
            read_only: true,
            ..config.cache_config()
        };
        Self::open(config, cache_config)
    }

    fn open(config: Arc<Config>, cache_config: CacheConfig) -> Result<Self> {
        let offset = catalog_offset(config.catalog_utc_offset_hours);
        let path = config.catalog_path();
        let catalog = if path.exists() {
            Catalog::load(&path, offset)?
        } else {
            warn!(
                "[Context] Catalog {} not found, starting with an empty catalog",
                path.display()
            );
            Catalog::from_items(Vec::new(), offset)
        };

        let cache = Arc::new(CacheStore::load(&cache_config));
        let adapters = ProviderAdapters::from_config(&config.http_config())?;
        Ok(Self::new(config, catalog, cache, adapters))
    }

    /// Starts the scheduler (startup refresh, daily refresh, manual triggers).
    pub async fn init(&self) -> Result<()> {
        self.ensure_running()?;
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.is_some() {
            warn!("[Context] Already initialized");
            return Ok(());
        }
        *scheduler = Some(RefreshScheduler::start(
            self.config.schedule_config(),
            self.orchestrator.clone(),
            self.catalog.clone(),
        ));
        info!(
            "[Context] Enrichment context initialized with {} catalog items",
            self.catalog().len()
        );
        Ok(())
    }

    /// Stops the timers and flushes every cache namespace. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("[Context] Shutting down...");
        if let Some(mut scheduler) = self.scheduler.lock().await.take() {
            scheduler.stop().await;
        }
        self.retry.shutdown();
        let flushed = self.cache.flush().await;
        match &flushed {
            Ok(()) => info!("[Context] Caches flushed"),
            Err(e) => error!("[Context] Cache flush failed: {}", e),
        }
        flushed
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(EnrichError::ShutDown)
        } else {
            Ok(())
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        match self.catalog.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swaps in a new catalog; passes already running keep the one they started with.
    pub fn set_catalog(&self, catalog: Catalog) {
        let catalog = Arc::new(catalog);
        info!("[Context] Catalog replaced (version {})", catalog.version());
        match self.catalog.write() {
            Ok(mut guard) => *guard = catalog,
            Err(poisoned) => *poisoned.into_inner() = catalog,
        }
    }

    pub async fn refresh_working_set(&self) -> Result<RefreshOutcome> {
        self.ensure_running()?;
        let catalog = self.catalog();
        Ok(self.orchestrator.refresh_working_set(&catalog).await)
    }

    /// Asks the scheduler for an immediate full refresh, or spawns one when the scheduler is
    /// not running.
    pub async fn trigger_refresh(&self) -> Result<()> {
        self.ensure_running()?;
        if let Some(scheduler) = self.scheduler.lock().await.as_ref() {
            scheduler.trigger();
            return Ok(());
        }
        let orchestrator = self.orchestrator.clone();
        let catalog = self.catalog();
        tokio::spawn(async move {
            orchestrator.refresh_working_set(&catalog).await;
        });
        Ok(())
    }

    pub async fn refresh_one(&self, item_id: &str) -> Result<ItemRefreshReport> {
        self.ensure_running()?;
        let catalog = self.catalog();
        let item = catalog
            .get(item_id)
            .ok_or_else(|| EnrichError::NotFound(item_id.to_string()))?;
        Ok(self.orchestrator.refresh_one(item).await)
    }

    pub async fn run_retry_pass(&self) -> RetryPassReport {
        self.retry.run_pass().await
    }

    pub fn failed_items_status(&self) -> FailedItemsStatus {
        self.retry.status()
    }

    pub fn is_refreshing_cache(&self) -> bool {
        self.orchestrator.is_refreshing()
    }

    pub fn cache_stats(&self) -> CacheStoreStats {
        self.cache.stats()
    }

    /// Enriched view of every catalog item. Never fetches.
    pub fn enrich_all(&self) -> Vec<EnrichedItem> {
        let catalog = self.catalog();
        enrichment::enrich_all(catalog.items(), &self.cache)
    }

    /// Enriched view of the given items; unknown ids are skipped. Never fetches.
    pub fn enrich_items(&self, ids: &[&str]) -> Vec<EnrichedItem> {
        let catalog = self.catalog();
        enrichment::enrich_all(ids.iter().filter_map(|id| catalog.get(id)), &self.cache)
    }

    /// Cached view of one item, without side effects.
    pub fn peek_item(&self, item_id: &str) -> Option<EnrichedItem> {
        let catalog = self.catalog();
        catalog
            .get(item_id)
            .map(|item| enrichment::enrich(item, &self.cache))
    }

    /// Cached view of one item; also starts a background refresh of that item. Reads right
    /// after the refresh completes see the new data.
    pub fn get_item(&self, item_id: &str) -> Option<EnrichedItem> {
        let catalog = self.catalog();
        let item = catalog.get(item_id)?;
        let enriched = enrichment::enrich(item, &self.cache);

        if !self.is_shut_down() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let orchestrator = self.orchestrator.clone();
                    let catalog = catalog.clone();
                    let item_id = item_id.to_string();
                    handle.spawn(async move {
                        if let Some(item) = catalog.get(&item_id) {
                            orchestrator.refresh_one(item).await;
                        }
                    });
                }
                Err(_) => warn!("[Context] No async runtime, skipping refresh of {}", item_id),
            }
        }
        Some(enriched)
    }

    pub fn recent_seasons_status(&self) -> RecentSeasonsStatus {
        let catalog = self.catalog();
        enrichment::recent_seasons_status(&catalog, &self.cache, Utc::now())
    }

    pub fn item_cache_status(&self, item_id: &str) -> Option<ItemCacheStatus> {
        let catalog = self.catalog();
        catalog
            .get(item_id)
            .map(|item| enrichment::item_cache_status(item, &self.cache))
    }
}
