// src/enrichment/mod.rs
//! Read-side overlay of cached enrichment data onto catalog items.
//!
//! Nothing here performs I/O: every field is read from the cache, and anything absent,
//! stale or confirmed empty comes out as `None`.

use crate::adapters::{embed_link, FeedContent};
use crate::cache::{CacheEntry, CacheKind, CacheStore, Namespace};
use crate::catalog::{recent_seasons, Catalog, Item};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A catalog item with its enrichment fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedItem {
    #[serde(flatten)]
    pub item: Item,
    pub image: Option<String>,
    pub preview_embed_link: Option<String>,
    pub rss_content: Option<FeedContent>,
}

fn fresh_entry<T>(ns: &Namespace<T>, key: Option<&str>) -> Option<CacheEntry<T>>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let entry = ns.get(key?)?;
    ns.is_fresh(&entry).then_some(entry)
}

fn fresh_value<T>(ns: &Namespace<T>, key: Option<&str>) -> Option<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fresh_entry(ns, key).and_then(|entry| entry.value.as_option().cloned())
}

pub fn enrich(item: &Item, cache: &CacheStore) -> EnrichedItem {
    EnrichedItem {
        image: fresh_value(&cache.image, item.provider_key(CacheKind::Image)),
        preview_embed_link: fresh_value(&cache.video, item.provider_key(CacheKind::Video))
            .map(|bvid| embed_link(&bvid)),
        rss_content: fresh_value(&cache.feed, item.provider_key(CacheKind::Feed)),
        item: item.clone(),
    }
}

pub fn enrich_all<'a, I>(items: I, cache: &CacheStore) -> Vec<EnrichedItem>
where
    I: IntoIterator<Item = &'a Item>,
{
    items.into_iter().map(|item| enrich(item, cache)).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentSeasonsStatus {
    pub current_season: String,
    pub previous_season: String,
    pub total_items: usize,
    pub current_season_items: usize,
    pub previous_season_items: usize,
    pub image_cached: usize,
    pub video_cached: usize,
    pub feed_cached: usize,
}

/// Counts working-set items and how many of them have a fresh entry per kind.
/// A fresh empty entry counts as cached.
pub fn recent_seasons_status(catalog: &Catalog, cache: &CacheStore, now: DateTime<Utc>) -> RecentSeasonsStatus {
    let offset = catalog.offset();
    let (current, previous) = recent_seasons(now, &offset);
    let items = catalog.working_set(now);

    let mut status = RecentSeasonsStatus {
        current_season: current.to_string(),
        previous_season: previous.to_string(),
        total_items: items.len(),
        current_season_items: 0,
        previous_season_items: 0,
        image_cached: 0,
        video_cached: 0,
        feed_cached: 0,
    };

    for item in items {
        match item.season(&offset) {
            Some(s) if s == current => status.current_season_items += 1,
            Some(s) if s == previous => status.previous_season_items += 1,
            _ => {}
        }
        if fresh_entry(&cache.image, item.provider_key(CacheKind::Image)).is_some() {
            status.image_cached += 1;
        }
        if fresh_entry(&cache.video, item.provider_key(CacheKind::Video)).is_some() {
            status.video_cached += 1;
        }
        if fresh_entry(&cache.feed, item.provider_key(CacheKind::Feed)).is_some() {
            status.feed_cached += 1;
        }
    }
    status
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStatus {
    pub cached: bool,
    pub url: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatus {
    pub cached: bool,
    pub embed_link: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatus {
    pub cached: bool,
    pub content: Option<FeedContent>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCacheStatus {
    pub item_id: String,
    pub title: String,
    pub image: ImageStatus,
    pub video: VideoStatus,
    pub feed: FeedStatus,
}

pub fn item_cache_status(item: &Item, cache: &CacheStore) -> ItemCacheStatus {
    let image_key = item.provider_key(CacheKind::Image);
    let video_key = item.provider_key(CacheKind::Video);
    let feed_key = item.provider_key(CacheKind::Feed);

    let image = fresh_entry(&cache.image, image_key);
    let video = fresh_entry(&cache.video, video_key);
    let feed = fresh_entry(&cache.feed, feed_key);

    ItemCacheStatus {
        item_id: item.id.clone(),
        title: item.title.clone(),
        image: ImageStatus {
            cached: image.is_some(),
            url: image.and_then(|e| e.value.as_option().cloned()),
            key: image_key.map(str::to_string),
        },
        video: VideoStatus {
            cached: video.is_some(),
            embed_link: video.and_then(|e| e.value.as_option().map(|bvid| embed_link(bvid))),
            key: video_key.map(str::to_string),
        },
        feed: FeedStatus {
            cached: feed.is_some(),
            content: feed.and_then(|e| e.value.as_option().cloned()),
            key: feed_key.map(str::to_string),
        },
    }
}
