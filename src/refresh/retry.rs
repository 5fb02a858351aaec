// src/refresh/retry.rs
//! Failed-item queue with a single recurring retry timer.
//!
//! A full refresh pass hands its failures over with `replace_failed`, which replaces the
//! queue wholesale and starts the timer if it is idle. Each firing retries every queued item
//! once, sequentially, and keeps only the ones that still fail with their attempt count
//! bumped. An item that fails again after reaching the ceiling is abandoned. When the queue
//! drains the timer stops.

use super::worker::{FetchOutcome, FetchWorker};
use crate::cache::CacheKind;
use crate::config::RetryConfig;
use crate::error::{EnrichError, ErrorCategory};
use crate::utils::now_millis;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::task::JoinHandle;
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub entity_id: String,
    pub kind: CacheKind,
    pub provider_key: String,
    /// Number of retries already spent
    pub attempt_count: u32,
    pub last_attempt_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_category: Option<ErrorCategory>,
}

impl FailedItem {
    pub fn new(entity_id: &str, kind: CacheKind, provider_key: &str, error: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            kind,
            provider_key: provider_key.to_string(),
            attempt_count: 0,
            last_attempt_at: now_millis(),
            last_error: Some(error.to_string()),
            last_error_category: None,
        }
    }

    pub fn from_error(entity_id: &str, kind: CacheKind, provider_key: &str, error: &EnrichError) -> Self {
        Self {
            last_error_category: Some(error.categorize()),
            ..Self::new(entity_id, kind, provider_key, &error.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItemsStatus {
    pub count: usize,
    pub items: Vec<FailedItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPassReport {
    pub attempted: usize,
    pub resolved: usize,
    pub still_failing: usize,
    pub abandoned: usize,
    /// The queue was replaced by a newer refresh pass meanwhile; this pass's list was dropped
    pub superseded: bool,
}

#[derive(Default)]
struct RetryState {
    items: Vec<FailedItem>,
    generation: u64,
}

pub struct RetryEngine {
    config: RetryConfig,
    worker: Arc<FetchWorker>,
    state: Mutex<RetryState>,
    timer: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl RetryEngine {
    pub fn new(config: RetryConfig, worker: Arc<FetchWorker>) -> Self {
        Self {
            config,
            worker,
            state: Mutex::new(RetryState::default()),
            timer: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> FailedItemsStatus {
        let state = lock(&self.state);
        FailedItemsStatus {
            count: state.items.len(),
            items: state.items.clone(),
        }
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.state).items.len()
    }

    pub fn is_timer_active(&self) -> bool {
        lock(&self.timer).as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Replaces the queue with `items` and starts the timer when there is work.
    pub fn replace_failed(self: &Arc<Self>, items: Vec<FailedItem>) {
        let count = items.len();
        {
            let mut state = lock(&self.state);
            state.items = items;
            state.generation += 1;
        }
        if count > 0 {
            info!(
                "[Retry] {} failed items queued, retrying every {:?}",
                count, self.config.interval
            );
            self.ensure_timer();
        }
    }

    fn ensure_timer(self: &Arc<Self>) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let mut timer = lock(&self.timer);
        if timer.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("[Retry] No async runtime, retry timer not started");
                return;
            }
        };

        let engine: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.interval;
        *timer = Some(handle.spawn(async move {
            loop {
                sleep(interval).await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.run_pass().await;

                // decided under the timer lock so a concurrent hand-off sees either a live
                // timer or none
                let mut timer = lock(&engine.timer);
                if engine.shut_down.load(Ordering::SeqCst) || engine.pending_count() == 0 {
                    *timer = None;
                    debug!("[Retry] Queue drained, timer idle");
                    break;
                }
                debug!(
                    "[Retry] Scheduling next retry for {} items in {:?}",
                    engine.pending_count(),
                    interval
                );
            }
        }));
    }

    /// Retries every queued item once.
    pub async fn run_pass(&self) -> RetryPassReport {
        let (snapshot, generation) = {
            let state = lock(&self.state);
            (state.items.clone(), state.generation)
        };
        let mut report = RetryPassReport::default();
        if snapshot.is_empty() {
            debug!("[Retry] No failed items to retry");
            return report;
        }

        info!("[Retry] Retrying {} failed items...", snapshot.len());
        let mut still_failed = Vec::with_capacity(snapshot.len());

        for (index, mut item) in snapshot.into_iter().enumerate() {
            if self.shut_down.load(Ordering::SeqCst) {
                still_failed.push(item);
                continue;
            }
            // filled in meanwhile, e.g. by a single-item refresh that was in flight
            if self.worker.cache().should_skip_refresh(item.kind, &item.provider_key) {
                report.resolved += 1;
                debug!(
                    "[Retry] {} for {} ({}) is already cached, dropping",
                    item.kind, item.entity_id, item.provider_key
                );
                continue;
            }
            if index > 0 {
                sleep(self.config.item_delay).await;
            }
            report.attempted += 1;

            match self.worker.fetch_and_store(item.kind, &item.provider_key).await {
                Ok(FetchOutcome::Stored) | Ok(FetchOutcome::StoredEmpty) => {
                    report.resolved += 1;
                    info!(
                        "[Retry] Retry success: {} for {} ({})",
                        item.kind, item.entity_id, item.provider_key
                    );
                }
                Ok(FetchOutcome::AlreadyInFlight) => {
                    still_failed.push(item);
                }
                Err(e) => {
                    if item.attempt_count >= self.config.max_attempts {
                        report.abandoned += 1;
                        warn!(
                            "[Retry] Giving up on {} {} ({}) after {} attempts [{:?}]: {}",
                            item.kind,
                            item.entity_id,
                            item.provider_key,
                            item.attempt_count,
                            e.categorize(),
                            e
                        );
                    } else {
                        debug!(
                            "[Retry] {} {} ({}) failed again: {}",
                            item.kind, item.entity_id, item.provider_key, e
                        );
                        item.attempt_count += 1;
                        item.last_attempt_at = now_millis();
                        item.last_error = Some(e.to_string());
                        item.last_error_category = Some(e.categorize());
                        still_failed.push(item);
                    }
                }
            }
        }

        report.still_failing = still_failed.len();
        {
            let mut state = lock(&self.state);
            if state.generation == generation {
                state.items = still_failed;
                state.generation += 1;
            } else {
                report.superseded = true;
                info!("[Retry] Failed list was replaced during the retry pass, keeping the newer list");
            }
        }

        info!(
            "[Retry] Retry completed: {} successful, {} still failed, {} abandoned",
            report.resolved, report.still_failing, report.abandoned
        );
        report
    }

    /// Stops the timer; queued items are kept for status reporting.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
            info!("[Retry] Retry timer cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::testing::{fast_config, MockOutcome, MockProviders};
    use std::time::Duration;

    fn engine(dir: &std::path::Path, mocks: &MockProviders, interval: Duration) -> Arc<RetryEngine> {
        let cache = Arc::new(CacheStore::load(&fast_config(dir).cache_config()));
        let worker = Arc::new(FetchWorker::new(cache, mocks.adapters()));
        Arc::new(RetryEngine::new(
            RetryConfig {
                interval,
                max_attempts: 5,
                item_delay: Duration::from_millis(1),
            },
            worker,
        ))
    }

    #[tokio::test]
    async fn test_pass_resolves_and_bumps() {
        let dir = tempfile::tempdir().unwrap();
        let mocks = MockProviders::new();
        mocks.image.always("ok", MockOutcome::Value("url".to_string()));
        mocks.image.always("bad", MockOutcome::Fail);
        let engine = engine(dir.path(), &mocks, Duration::from_secs(3600));

        engine.replace_failed(vec![
            FailedItem::new("a", CacheKind::Image, "ok", "boom"),
            FailedItem::new("b", CacheKind::Image, "bad", "boom"),
        ]);
        let report = engine.run_pass().await;

        assert_eq!(report.resolved, 1);
        assert_eq!(report.still_failing, 1);
        let status = engine.status();
        assert_eq!(status.count, 1);
        assert_eq!(status.items[0].entity_id, "b");
        assert_eq!(status.items[0].attempt_count, 1);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_failure_category_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mocks = MockProviders::new();
        mocks.video.always("3", MockOutcome::Fail);
        let engine = engine(dir.path(), &mocks, Duration::from_secs(3600));

        engine.replace_failed(vec![FailedItem::new("c", CacheKind::Video, "3", "in flight")]);
        assert_eq!(engine.status().items[0].last_error_category, None);
        engine.run_pass().await;

        let item = &engine.status().items[0];
        assert_eq!(item.last_error_category, Some(ErrorCategory::Network));
        assert!(item.last_error.as_deref().unwrap_or_default().contains("scripted"));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_already_cached_item_resolves_without_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let mocks = MockProviders::new();
        mocks.image.always("1", MockOutcome::Fail);
        let engine = engine(dir.path(), &mocks, Duration::from_secs(3600));
        engine.worker.cache().image.set("1", Some("url".to_string()));

        engine.replace_failed(vec![FailedItem::new("a", CacheKind::Image, "1", "in flight")]);
        let report = engine.run_pass().await;

        assert_eq!(report.resolved, 1);
        assert_eq!(report.attempted, 0);
        assert_eq!(engine.status().count, 0);
        assert_eq!(mocks.image.calls("1"), 0);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_abandoned_after_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let mocks = MockProviders::new();
        mocks.feed.always("7", MockOutcome::Fail);
        let engine = engine(dir.path(), &mocks, Duration::from_secs(3600));

        engine.replace_failed(vec![FailedItem::new("x", CacheKind::Feed, "7", "boom")]);
        for expected in 1..=5 {
            engine.run_pass().await;
            assert_eq!(engine.status().items[0].attempt_count, expected);
        }

        let report = engine.run_pass().await;
        assert_eq!(report.abandoned, 1);
        assert_eq!(engine.status().count, 0);
        assert_eq!(mocks.feed.calls("7"), 6);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_newer_list_wins_over_running_pass() {
        let dir = tempfile::tempdir().unwrap();
        let mocks = MockProviders {
            video: Arc::new(
                crate::testing::MockAdapter::new(CacheKind::Video)
                    .with_delay(Duration::from_millis(50))
                    .with_default(MockOutcome::Fail),
            ),
            ..MockProviders::new()
        };
        let engine = engine(dir.path(), &mocks, Duration::from_secs(3600));
        engine.replace_failed(vec![FailedItem::new("old", CacheKind::Video, "1", "boom")]);

        let pass = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_pass().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.replace_failed(vec![FailedItem::new("new", CacheKind::Video, "2", "boom")]);

        let report = pass.await.unwrap();
        assert!(report.superseded);
        let status = engine.status();
        assert_eq!(status.count, 1);
        assert_eq!(status.items[0].entity_id, "new");
        assert_eq!(status.items[0].attempt_count, 0);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_timer_goes_idle_when_drained() {
        let dir = tempfile::tempdir().unwrap();
        let mocks = MockProviders::new();
        mocks.image.script(
            "1",
            vec![MockOutcome::Fail, MockOutcome::Value("url".to_string())],
        );
        let engine = engine(dir.path(), &mocks, Duration::from_millis(20));

        engine.replace_failed(vec![FailedItem::new("a", CacheKind::Image, "1", "boom")]);
        assert!(engine.is_timer_active());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(engine.status().count, 0);
        assert!(!engine.is_timer_active());
        assert_eq!(mocks.image.calls("1"), 2);
    }

    #[tokio::test]
    async fn test_empty_hand_off_does_not_start_timer() {
        let dir = tempfile::tempdir().unwrap();
        let mocks = MockProviders::new();
        let engine = engine(dir.path(), &mocks, Duration::from_millis(20));
        engine.replace_failed(Vec::new());
        assert!(!engine.is_timer_active());
    }
}
