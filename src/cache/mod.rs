pub mod entry;
pub mod store;

pub use entry::{CacheEntry, CachedValue};
pub use store::{CacheStore, CacheStoreStats, Namespace, NamespaceStats};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The three kinds of enrichment data, one namespace and one provider each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Image,
    Video,
    Feed,
}

impl CacheKind {
    pub const ALL: [CacheKind; 3] = [CacheKind::Image, CacheKind::Video, CacheKind::Feed];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Image => "image",
            CacheKind::Video => "video",
            CacheKind::Feed => "feed",
        }
    }

    /// Catalog site whose id is this kind's provider key.
    pub fn site(&self) -> &'static str {
        match self {
            CacheKind::Image => "bangumi",
            CacheKind::Video => "bilibili",
            CacheKind::Feed => "mikan",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            CacheKind::Image => "image-cache.json",
            CacheKind::Video => "video-cache.json",
            CacheKind::Feed => "feed-cache.json",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
