// End-to-end refresh flows through EnrichmentContext with scripted providers
use bangumi_enricher::cache::CacheStore;
use bangumi_enricher::catalog::catalog_offset;
use bangumi_enricher::config::Config;
use bangumi_enricher::error::ErrorCategory;
use bangumi_enricher::refresh::KindStatus;
use bangumi_enricher::testing::{fast_config, sample_feed, sample_item, MockOutcome, MockProviders};
use bangumi_enricher::{Catalog, CacheKind, EnrichError, EnrichmentContext, Item, RefreshOutcome};
use chrono::{Duration as ChronoDuration, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, timeout, Instant};

fn airing(title: &str, sites: &[(&str, &str)]) -> Item {
    sample_item(title, &Utc::now().to_rfc3339(), sites)
}

fn context_with(config: Config, items: Vec<Item>, providers: &MockProviders) -> EnrichmentContext {
    let config = Arc::new(config);
    let catalog = Catalog::from_items(items, catalog_offset(config.catalog_utc_offset_hours));
    let cache = Arc::new(CacheStore::load(&config.cache_config()));
    EnrichmentContext::new(config, catalog, cache, providers.adapters())
}

fn completed(outcome: RefreshOutcome) -> bangumi_enricher::RefreshSummary {
    match outcome {
        RefreshOutcome::Completed(summary) => summary,
        RefreshOutcome::AlreadyRunning => panic!("expected a completed pass"),
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_full_pass_populates_every_kind() {
    let dir = TempDir::new().unwrap();
    let providers = MockProviders::new();
    providers
        .image
        .always("400602", MockOutcome::Value("https://lain.bgm.tv/l/1.jpg".to_string()));
    providers.video.always("28339123", MockOutcome::Value("BV1pv".to_string()));
    providers.feed.always("3141", MockOutcome::Value(sample_feed("frieren")));

    let items = vec![airing(
        "Frieren",
        &[("bangumi", "400602"), ("bilibili", "28339123"), ("mikan", "3141")],
    )];
    let ctx = context_with(fast_config(dir.path()), items, &providers);

    let summary = completed(ctx.refresh_working_set().await.unwrap());
    assert_eq!(summary.selected, 1);
    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.failed, 0);

    let enriched = ctx.enrich_all();
    assert_eq!(enriched.len(), 1);
    assert_eq!(enriched[0].image.as_deref(), Some("https://lain.bgm.tv/l/1.jpg"));
    assert_eq!(
        enriched[0].preview_embed_link.as_deref(),
        Some(bangumi_enricher::adapters::embed_link("BV1pv").as_str())
    );
    assert_eq!(enriched[0].rss_content.as_ref().map(|f| f.title.as_str()), Some("frieren"));
}

#[tokio::test]
async fn test_item_without_feed_site_never_calls_feed_provider() {
    let dir = TempDir::new().unwrap();
    let providers = MockProviders::new();
    providers.image.always("1", MockOutcome::Value("img".to_string()));
    providers.video.always("2", MockOutcome::Value("BVx".to_string()));

    let items = vec![airing("NoFeed", &[("bangumi", "1"), ("bilibili", "2")])];
    let ctx = context_with(fast_config(dir.path()), items, &providers);

    completed(ctx.refresh_working_set().await.unwrap());

    let enriched = ctx.enrich_all();
    assert!(enriched[0].image.is_some());
    assert!(enriched[0].preview_embed_link.is_some());
    assert_eq!(enriched[0].rss_content, None);
    assert_eq!(providers.feed.total_calls(), 0);
}

#[tokio::test]
async fn test_confirmed_empty_is_not_refetched() {
    let dir = TempDir::new().unwrap();
    let providers = MockProviders::new();
    providers.image.always("404", MockOutcome::Empty);

    let items = vec![airing("NoCover", &[("bangumi", "404")])];
    let ctx = context_with(fast_config(dir.path()), items, &providers);

    let first = completed(ctx.refresh_working_set().await.unwrap());
    assert_eq!(first.empty, 1);
    let entry = ctx.cache().image.get("404").unwrap();
    assert!(entry.value.is_empty());

    let second = completed(ctx.refresh_working_set().await.unwrap());
    assert_eq!(second.skipped, 1);
    assert_eq!(providers.image.calls("404"), 1);
    assert_eq!(ctx.enrich_all()[0].image, None);
}

#[tokio::test]
async fn test_concurrent_passes_collapse_into_one() {
    let dir = TempDir::new().unwrap();
    let mut providers = MockProviders::new();
    providers.image = Arc::new(
        bangumi_enricher::testing::MockAdapter::new(CacheKind::Image)
            .with_default(MockOutcome::Value("img".to_string()))
            .with_delay(Duration::from_millis(100)),
    );

    let items = vec![airing("Slow", &[("bangumi", "1")])];
    let ctx = Arc::new(context_with(fast_config(dir.path()), items, &providers));

    let running = {
        let ctx = ctx.clone();
        tokio::spawn(async move { ctx.refresh_working_set().await })
    };
    assert!(wait_until(|| ctx.is_refreshing_cache(), Duration::from_secs(2)).await);

    assert_eq!(ctx.refresh_working_set().await.unwrap(), RefreshOutcome::AlreadyRunning);

    completed(running.await.unwrap().unwrap());
    assert!(!ctx.is_refreshing_cache());
    assert_eq!(providers.image.calls("1"), 1);
}

#[tokio::test]
async fn test_failures_converge_through_retry_timer() {
    let dir = TempDir::new().unwrap();
    let providers = MockProviders::new();
    let keys = ["11", "12", "13"];
    for key in keys {
        providers.image.script(
            key,
            vec![
                MockOutcome::Fail,
                MockOutcome::Fail,
                MockOutcome::Value(format!("img-{}", key)),
            ],
        );
    }

    let items = keys
        .iter()
        .map(|&key| airing(&format!("Flaky {}", key), &[("bangumi", key)]))
        .collect();
    let ctx = context_with(fast_config(dir.path()), items, &providers);

    let summary = completed(ctx.refresh_working_set().await.unwrap());
    assert_eq!(summary.failed, 3);
    let failed = ctx.failed_items_status();
    assert_eq!(failed.count, 3);
    assert!(failed
        .items
        .iter()
        .all(|item| item.last_error_category == Some(ErrorCategory::Network)));

    // first firing fails again, second one succeeds
    assert!(wait_until(|| ctx.failed_items_status().count == 0, Duration::from_secs(10)).await);
    for key in keys {
        assert_eq!(ctx.cache().image.fresh_value(key), Some(format!("img-{}", key)));
        assert_eq!(providers.image.calls(key), 3);
    }
}

#[tokio::test]
async fn test_permanent_failure_is_abandoned() {
    let dir = TempDir::new().unwrap();
    let providers = MockProviders::new();
    providers.image.always("500", MockOutcome::Fail);

    // passes are driven by hand; the timer must not fire in between
    let config = Config {
        retry_interval_secs: 3600,
        ..fast_config(dir.path())
    };
    let items = vec![airing("Broken", &[("bangumi", "500")])];
    let ctx = context_with(config, items, &providers);
    let max_attempts = ctx.config().retry_max_attempts;

    completed(ctx.refresh_working_set().await.unwrap());

    for _ in 0..max_attempts {
        let report = ctx.run_retry_pass().await;
        assert_eq!(report.still_failing, 1);
    }
    assert_eq!(ctx.failed_items_status().items[0].attempt_count, max_attempts);

    let last = ctx.run_retry_pass().await;
    assert_eq!(last.abandoned, 1);
    assert_eq!(ctx.failed_items_status().count, 0);
    assert!(ctx.cache().image.get("500").is_none());
}

fn slow_image_providers(outcome: MockOutcome<String>) -> MockProviders {
    MockProviders {
        image: Arc::new(
            bangumi_enricher::testing::MockAdapter::new(CacheKind::Image)
                .with_default(outcome)
                .with_delay(Duration::from_millis(100)),
        ),
        ..MockProviders::new()
    }
}

fn manual_retry_config(dir: &TempDir) -> Config {
    Config {
        retry_interval_secs: 3600,
        ..fast_config(dir.path())
    }
}

#[tokio::test]
async fn test_pass_queues_key_held_by_failing_single_refresh() {
    let dir = TempDir::new().unwrap();
    let providers = slow_image_providers(MockOutcome::Fail);
    let items = vec![airing("Contended", &[("bangumi", "8")])];
    let ctx = context_with(manual_retry_config(&dir), items, &providers);
    let id = ctx.catalog().items()[0].id.clone();

    ctx.get_item(&id).unwrap();
    sleep(Duration::from_millis(20)).await;
    let summary = completed(ctx.refresh_working_set().await.unwrap());

    assert_eq!(summary.in_flight, 1);
    assert_eq!(providers.image.calls("8"), 1);
    let failed = ctx.failed_items_status();
    assert_eq!(failed.count, 1);
    assert_eq!(failed.items[0].provider_key, "8");

    // the single-item fetch has failed by now; the retry pass fetches again
    sleep(Duration::from_millis(150)).await;
    assert!(ctx.cache().image.get("8").is_none());
    let report = ctx.run_retry_pass().await;
    assert_eq!(report.attempted, 1);
    assert_eq!(report.still_failing, 1);
    assert_eq!(providers.image.calls("8"), 2);
}

#[tokio::test]
async fn test_pass_queued_key_resolves_when_single_refresh_succeeds() {
    let dir = TempDir::new().unwrap();
    let providers = slow_image_providers(MockOutcome::Value("img-8".to_string()));
    let items = vec![airing("Contended", &[("bangumi", "8")])];
    let ctx = context_with(manual_retry_config(&dir), items, &providers);
    let id = ctx.catalog().items()[0].id.clone();

    ctx.get_item(&id).unwrap();
    sleep(Duration::from_millis(20)).await;
    completed(ctx.refresh_working_set().await.unwrap());
    assert_eq!(ctx.failed_items_status().count, 1);

    assert!(
        wait_until(
            || ctx.peek_item(&id).and_then(|i| i.image).is_some(),
            Duration::from_secs(2)
        )
        .await
    );
    let report = ctx.run_retry_pass().await;
    assert_eq!(report.resolved, 1);
    assert_eq!(ctx.failed_items_status().count, 0);
    assert_eq!(providers.image.calls("8"), 1);
}

#[tokio::test]
async fn test_refresh_one_reports_per_kind() {
    let dir = TempDir::new().unwrap();
    let providers = MockProviders::new();
    providers.image.always("1", MockOutcome::Value("img".to_string()));
    providers.video.always("2", MockOutcome::Fail);

    let items = vec![airing("One", &[("bangumi", "1"), ("bilibili", "2")])];
    let ctx = context_with(fast_config(dir.path()), items, &providers);
    let id = ctx.catalog().items()[0].id.clone();

    let report = ctx.refresh_one(&id).await.unwrap();
    let status = |kind| {
        report
            .kinds
            .iter()
            .find(|k| k.kind == kind)
            .map(|k| k.result.clone())
            .unwrap()
    };
    assert_eq!(status(CacheKind::Image), KindStatus::Stored);
    assert!(matches!(status(CacheKind::Video), KindStatus::Failed(_)));
    assert_eq!(status(CacheKind::Feed), KindStatus::NoKey);
    assert!(report.has_failures());
    // single-item refreshes do not feed the retry queue
    assert_eq!(ctx.failed_items_status().count, 0);

    assert!(matches!(
        ctx.refresh_one("missing").await,
        Err(EnrichError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_get_item_refreshes_in_background() {
    let dir = TempDir::new().unwrap();
    let providers = MockProviders::new();
    providers.image.always("7", MockOutcome::Value("img-7".to_string()));

    let items = vec![airing("Lazy", &[("bangumi", "7")])];
    let ctx = context_with(fast_config(dir.path()), items, &providers);
    let id = ctx.catalog().items()[0].id.clone();

    let first = ctx.get_item(&id).unwrap();
    assert_eq!(first.image, None);

    assert!(
        wait_until(
            || ctx.peek_item(&id).and_then(|i| i.image).is_some(),
            Duration::from_secs(2)
        )
        .await
    );
    assert_eq!(ctx.get_item(&id).unwrap().image.as_deref(), Some("img-7"));
    assert!(ctx.get_item("missing").is_none());
}

#[tokio::test]
async fn test_items_outside_recent_seasons_are_not_refreshed() {
    let dir = TempDir::new().unwrap();
    let providers = MockProviders::new();
    providers.image.always("old", MockOutcome::Value("img".to_string()));

    let long_ago = (Utc::now() - ChronoDuration::days(3 * 365)).to_rfc3339();
    let items = vec![sample_item("Old show", &long_ago, &[("bangumi", "old")])];
    let ctx = context_with(fast_config(dir.path()), items, &providers);

    let summary = completed(ctx.refresh_working_set().await.unwrap());
    assert_eq!(summary.selected, 0);
    assert_eq!(providers.total_calls(), 0);

    let status = ctx.recent_seasons_status();
    assert_eq!(status.total_items, 0);
    assert_eq!(status.image_cached, 0);
    assert_eq!(ctx.enrich_all().len(), 1);
}

#[tokio::test]
async fn test_shutdown_flushes_cache_to_disk() {
    let dir = TempDir::new().unwrap();
    let providers = MockProviders::new();
    providers.image.always("1", MockOutcome::Value("img-1".to_string()));
    providers.video.always("2", MockOutcome::Empty);

    let items = vec![airing("Persisted", &[("bangumi", "1"), ("bilibili", "2")])];
    let config = fast_config(dir.path());
    let ctx = context_with(config.clone(), items, &providers);

    completed(ctx.refresh_working_set().await.unwrap());
    ctx.shutdown().await.unwrap();
    ctx.shutdown().await.unwrap();
    assert!(ctx.is_shut_down());
    assert!(matches!(ctx.refresh_working_set().await, Err(EnrichError::ShutDown)));

    let reloaded = CacheStore::load(&config.cache_config());
    assert_eq!(reloaded.image.fresh_value("1").as_deref(), Some("img-1"));
    let empty = reloaded.video.get("2").unwrap();
    assert!(empty.value.is_empty());
    assert!(reloaded.should_skip_refresh(CacheKind::Video, "2"));
}

#[tokio::test]
async fn test_scheduler_runs_startup_refresh() {
    let dir = TempDir::new().unwrap();
    let providers = MockProviders::new();
    providers.image.always("1", MockOutcome::Value("img".to_string()));

    let items = vec![airing("Scheduled", &[("bangumi", "1")])];
    let ctx = context_with(fast_config(dir.path()), items, &providers);

    ctx.init().await.unwrap();
    let fetched = timeout(Duration::from_secs(2), async {
        while ctx.cache().image.fresh_value("1").is_none() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(fetched.is_ok());

    ctx.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_cancels_running_scheduled_pass() {
    let dir = TempDir::new().unwrap();
    let providers = MockProviders {
        image: Arc::new(
            bangumi_enricher::testing::MockAdapter::new(CacheKind::Image)
                .with_default(MockOutcome::Value("img".to_string()))
                .with_delay(Duration::from_secs(5)),
        ),
        ..MockProviders::new()
    };

    let items = vec![airing("Interrupted", &[("bangumi", "1")])];
    let ctx = context_with(fast_config(dir.path()), items, &providers);

    ctx.init().await.unwrap();
    assert!(wait_until(|| ctx.is_refreshing_cache(), Duration::from_secs(2)).await);

    let stopped = timeout(Duration::from_secs(2), ctx.shutdown()).await;
    assert!(stopped.is_ok());
    // the pass was cancelled before the flush, not left running behind it
    assert!(!ctx.is_refreshing_cache());
    assert!(ctx.cache().image.get("1").is_none());
    assert_eq!(providers.image.calls("1"), 1);
}

#[tokio::test]
async fn test_read_only_context_leaves_cache_files_alone() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("feed-cache.json");
    std::fs::write(&path, r#"{"3141":{"value":null,"fetchedAt":0}}"#).unwrap();
    std::fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(std::time::SystemTime::now() - Duration::from_secs(7 * 60 * 60))
        .unwrap();

    let ctx = EnrichmentContext::from_config_read_only(Arc::new(fast_config(dir.path()))).unwrap();
    assert!(ctx.cache().feed.is_empty());
    assert!(ctx.recent_seasons_status().total_items == 0);
    ctx.shutdown().await.unwrap();

    assert!(path.exists());
    assert!(!dir.path().join("image-cache.json").exists());

    // a writable context prunes the same file
    let ctx = EnrichmentContext::from_config(Arc::new(fast_config(dir.path()))).unwrap();
    assert!(!path.exists());
    ctx.shutdown().await.unwrap();
}
