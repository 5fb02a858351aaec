use super::retry::{FailedItem, RetryEngine};
use super::worker::{FetchOutcome, FetchWorker};
use crate::cache::{CacheKind, CacheStore};
use crate::catalog::{recent_seasons, Catalog, Item};
use crate::config::RefreshConfig;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    /// Working-set items
    pub selected: usize,
    pub fetched: usize,
    pub empty: usize,
    /// Fresh cache entries (values and empties) left alone
    pub skipped: usize,
    pub in_flight: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RefreshOutcome {
    /// Another full pass holds the refresh flag; nothing was done
    AlreadyRunning,
    Completed(RefreshSummary),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "camelCase")]
pub enum KindStatus {
    NoKey,
    Stored,
    StoredEmpty,
    AlreadyInFlight,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindReport {
    pub kind: CacheKind,
    pub key: Option<String>,
    pub result: KindStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRefreshReport {
    pub item_id: String,
    pub kinds: Vec<KindReport>,
}

impl ItemRefreshReport {
    pub fn has_failures(&self) -> bool {
        self.kinds
            .iter()
            .any(|k| matches!(k.result, KindStatus::Failed(_)))
    }
}

/// Resets the in-progress flag however the pass ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One unit of work in a pass: fetch `kind` of `item` under `key`.
struct RefreshTask {
    item_id: String,
    kind: CacheKind,
    key: String,
}

enum TaskResult {
    Skipped,
    Done(FetchOutcome),
    /// Someone else is fetching the key; queued so the retry engine checks on it
    InFlight(FailedItem),
    Failed(FailedItem),
}

pub struct RefreshOrchestrator {
    config: RefreshConfig,
    cache: Arc<CacheStore>,
    worker: Arc<FetchWorker>,
    retry: Arc<RetryEngine>,
    refreshing: AtomicBool,
}

impl RefreshOrchestrator {
    pub fn new(
        config: RefreshConfig,
        cache: Arc<CacheStore>,
        worker: Arc<FetchWorker>,
        retry: Arc<RetryEngine>,
    ) -> Self {
        Self {
            config,
            cache,
            worker,
            retry,
            refreshing: AtomicBool::new(false),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    pub async fn refresh_working_set(&self, catalog: &Catalog) -> RefreshOutcome {
        self.refresh_working_set_at(catalog, Utc::now()).await
    }

    /// Refreshes the current and previous seasons as of `now`. A call made while another
    /// pass is running returns `AlreadyRunning` immediately.
    pub async fn refresh_working_set_at(&self, catalog: &Catalog, now: DateTime<Utc>) -> RefreshOutcome {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("[Refresh] Cache refresh already in progress, skipping");
            return RefreshOutcome::AlreadyRunning;
        }
        let _guard = RefreshGuard(&self.refreshing);

        let started = Instant::now();
        let (current, previous) = recent_seasons(now, &catalog.offset());
        let items = catalog.working_set(now);
        info!(
            "[Refresh] Starting cache refresh for {} items of {} and {}",
            items.len(),
            current,
            previous
        );

        let mut summary = RefreshSummary {
            selected: items.len(),
            ..RefreshSummary::default()
        };
        let mut failed = Vec::new();
        let chunk_size = self.config.chunk_size.max(1);
        let chunk_count = (items.len() + chunk_size - 1) / chunk_size;

        for (index, chunk) in items.chunks(chunk_size).enumerate() {
            let tasks: Vec<RefreshTask> = chunk.iter().flat_map(|item| tasks_for(item)).collect();
            let results = join_all(tasks.into_iter().map(|task| self.run_task(task))).await;

            for result in results {
                match result {
                    TaskResult::Skipped => summary.skipped += 1,
                    TaskResult::Done(FetchOutcome::Stored) => summary.fetched += 1,
                    TaskResult::Done(FetchOutcome::StoredEmpty) => summary.empty += 1,
                    TaskResult::Done(FetchOutcome::AlreadyInFlight) => summary.in_flight += 1,
                    TaskResult::InFlight(item) => {
                        summary.in_flight += 1;
                        failed.push(item);
                    }
                    TaskResult::Failed(item) => {
                        summary.failed += 1;
                        failed.push(item);
                    }
                }
            }

            debug!(
                "[Refresh] Progress: {}/{} chunks",
                index + 1,
                chunk_count
            );
            if index + 1 < chunk_count {
                sleep(self.config.chunk_delay).await;
            }
        }

        self.retry.replace_failed(failed);

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "[Refresh] Cache refresh completed in {}ms: {} fetched, {} empty, {} skipped, {} failed",
            summary.duration_ms, summary.fetched, summary.empty, summary.skipped, summary.failed
        );
        RefreshOutcome::Completed(summary)
    }

    async fn run_task(&self, task: RefreshTask) -> TaskResult {
        if self.cache.should_skip_refresh(task.kind, &task.key) {
            return TaskResult::Skipped;
        }
        match self.worker.fetch_and_store(task.kind, &task.key).await {
            Ok(FetchOutcome::AlreadyInFlight) => {
                debug!(
                    "[Refresh] {} for {} ({}) is being fetched elsewhere, queueing a check",
                    task.kind, task.item_id, task.key
                );
                TaskResult::InFlight(FailedItem::new(
                    &task.item_id,
                    task.kind,
                    &task.key,
                    "fetch already in flight",
                ))
            }
            Ok(outcome) => TaskResult::Done(outcome),
            Err(e) => {
                warn!(
                    "[Refresh] Failed to fetch {} for {} ({}) [{:?}]: {}",
                    task.kind,
                    task.item_id,
                    task.key,
                    e.categorize(),
                    e
                );
                TaskResult::Failed(FailedItem::from_error(&task.item_id, task.kind, &task.key, &e))
            }
        }
    }

    /// Refreshes every kind of one item concurrently, ignoring the in-progress flag and
    /// chunking. Failures are reported to the caller, not queued for retry.
    pub async fn refresh_one(&self, item: &Item) -> ItemRefreshReport {
        let futures = CacheKind::ALL.iter().map(|&kind| async move {
            let key = item.provider_key(kind).map(str::to_string);
            let result = match &key {
                None => KindStatus::NoKey,
                Some(key) => match self.worker.fetch_and_store(kind, key).await {
                    Ok(FetchOutcome::Stored) => KindStatus::Stored,
                    Ok(FetchOutcome::StoredEmpty) => KindStatus::StoredEmpty,
                    Ok(FetchOutcome::AlreadyInFlight) => KindStatus::AlreadyInFlight,
                    Err(e) => {
                        error!(
                            "[Refresh] Failed to refresh {} for item {} ({}): {}",
                            kind, item.id, key, e
                        );
                        KindStatus::Failed(e.to_string())
                    }
                },
            };
            KindReport { kind, key, result }
        });

        ItemRefreshReport {
            item_id: item.id.clone(),
            kinds: join_all(futures).await,
        }
    }
}

fn tasks_for(item: &Item) -> Vec<RefreshTask> {
    CacheKind::ALL
        .iter()
        .filter_map(|&kind| {
            item.provider_key(kind).map(|key| RefreshTask {
                item_id: item.id.clone(),
                kind,
                key: key.to_string(),
            })
        })
        .collect()
}
