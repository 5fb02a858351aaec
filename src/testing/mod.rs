//! Test support: scriptable adapters, sample catalog items and fast configurations.

pub mod mock_adapter;

pub use mock_adapter::{MockAdapter, MockOutcome};

use crate::adapters::{FeedContent, FeedItem, ProviderAdapters};
use crate::cache::CacheKind;
use crate::catalog::{Item, SiteRef};
use crate::config::Config;
use std::path::Path;
use std::sync::Arc;

/// Mocks for all three providers, plus the adapter set wired to them.
pub struct MockProviders {
    pub image: Arc<MockAdapter<String>>,
    pub video: Arc<MockAdapter<String>>,
    pub feed: Arc<MockAdapter<FeedContent>>,
}

impl MockProviders {
    pub fn new() -> Self {
        Self {
            image: Arc::new(MockAdapter::new(CacheKind::Image)),
            video: Arc::new(MockAdapter::new(CacheKind::Video)),
            feed: Arc::new(MockAdapter::new(CacheKind::Feed)),
        }
    }

    pub fn adapters(&self) -> ProviderAdapters {
        ProviderAdapters::new(self.image.clone(), self.video.clone(), self.feed.clone())
    }

    pub fn total_calls(&self) -> u32 {
        self.image.total_calls() + self.video.total_calls() + self.feed.total_calls()
    }
}

impl Default for MockProviders {
    fn default() -> Self {
        Self::new()
    }
}

/// A catalog item with the given `{site, id}` references and no id (derived on load).
pub fn sample_item(title: &str, begin: &str, sites: &[(&str, &str)]) -> Item {
    Item {
        title: title.to_string(),
        item_type: "tv".to_string(),
        lang: "ja".to_string(),
        begin: begin.to_string(),
        sites: sites
            .iter()
            .map(|(site, id)| SiteRef {
                site: site.to_string(),
                id: id.to_string(),
                ..SiteRef::default()
            })
            .collect(),
        ..Item::default()
    }
}

pub fn sample_feed(title: &str) -> FeedContent {
    FeedContent {
        title: title.to_string(),
        description: title.to_string(),
        link: format!("https://mikanani.me/RSS/{}", title),
        items: vec![FeedItem {
            title: format!("{} - 01", title),
            link: "https://mikanani.me/Home/Episode/1".to_string(),
            pub_date: "2024-07-06T00:00:00".to_string(),
            ..FeedItem::default()
        }],
    }
}

/// Defaults with millisecond-scale delays, rooted at `data_dir`.
pub fn fast_config(data_dir: &Path) -> Config {
    Config {
        data_dir: data_dir.to_path_buf(),
        refresh_chunk_size: 2,
        refresh_chunk_delay_ms: 5,
        refresh_startup_delay_ms: 10,
        retry_interval_secs: 1,
        retry_item_delay_ms: 1,
        ..Config::default()
    }
}
