// src/adapters/mod.rs
//! Provider fetch adapters, the only code in the crate that touches the network.
//!
//! Every adapter answers `fetch(key)` with the same tri-state result:
//! `Ok(Some(v))` is data, `Ok(None)` means the provider confirmed it has nothing (cached as
//! empty), and `Err(e)` is a transient failure worth retrying later.

pub mod bangumi;
pub mod bilibili;
pub mod feed;
pub mod http_utils;
pub mod mikan;

pub use bangumi::BangumiImageAdapter;
pub use bilibili::{embed_link, BilibiliVideoAdapter};
pub use feed::{FeedContent, FeedEnclosure, FeedItem};
pub use mikan::MikanFeedAdapter;

use crate::cache::CacheKind;
use crate::config::HttpConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait FetchAdapter: Send + Sync {
    type Value: Send + 'static;

    /// Which cache namespace this adapter feeds.
    fn kind(&self) -> CacheKind;

    async fn fetch(&self, key: &str) -> Result<Option<Self::Value>>;
}

pub type ImageAdapter = Arc<dyn FetchAdapter<Value = String>>;
pub type VideoAdapter = Arc<dyn FetchAdapter<Value = String>>;
pub type FeedAdapter = Arc<dyn FetchAdapter<Value = FeedContent>>;

/// One adapter per kind.
#[derive(Clone)]
pub struct ProviderAdapters {
    pub image: ImageAdapter,
    /// resolves a bilibili media id to the preview video's bvid
    pub video: VideoAdapter,
    pub feed: FeedAdapter,
}

impl ProviderAdapters {
    pub fn new(image: ImageAdapter, video: VideoAdapter, feed: FeedAdapter) -> Self {
        Self { image, video, feed }
    }

    /// The HTTP adapters for the real providers.
    pub fn from_config(http: &HttpConfig) -> Result<Self> {
        Ok(Self {
            image: Arc::new(BangumiImageAdapter::new(http)?),
            video: Arc::new(BilibiliVideoAdapter::new(http)?),
            feed: Arc::new(MikanFeedAdapter::new(http)?),
        })
    }
}
