use crate::adapters::ProviderAdapters;
use crate::cache::{CacheKind, CacheStore};
use crate::error::Result;
use dashmap::DashSet;
use log::debug;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchOutcome {
    /// The provider returned data and it was cached
    Stored,
    /// The provider confirmed there is nothing; cached as empty
    StoredEmpty,
    /// Another task is already fetching this key
    AlreadyInFlight,
}

/// Fetches one `(kind, key)` through its adapter and records the answer in the cache.
///
/// Concurrent requests for the same pair are collapsed: only the first one reaches the
/// provider, the others return `AlreadyInFlight`.
pub struct FetchWorker {
    cache: Arc<CacheStore>,
    adapters: ProviderAdapters,
    in_flight: DashSet<(CacheKind, String)>,
}

struct InFlightGuard<'a> {
    set: &'a DashSet<(CacheKind, String)>,
    slot: (CacheKind, String),
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.slot);
    }
}

impl FetchWorker {
    pub fn new(cache: Arc<CacheStore>, adapters: ProviderAdapters) -> Self {
        Self {
            cache,
            adapters,
            in_flight: DashSet::new(),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Errors leave the cache untouched.
    pub async fn fetch_and_store(&self, kind: CacheKind, key: &str) -> Result<FetchOutcome> {
        let slot = (kind, key.to_string());
        if !self.in_flight.insert(slot.clone()) {
            debug!("[Refresh] {} {} already in flight, skipping", kind, key);
            return Ok(FetchOutcome::AlreadyInFlight);
        }
        let _guard = InFlightGuard {
            set: &self.in_flight,
            slot,
        };

        let found = match kind {
            CacheKind::Image => {
                let value = self.adapters.image.fetch(key).await?;
                let found = value.is_some();
                self.cache.image.set(key, value);
                found
            }
            CacheKind::Video => {
                let value = self.adapters.video.fetch(key).await?;
                let found = value.is_some();
                self.cache.video.set(key, value);
                found
            }
            CacheKind::Feed => {
                let value = self.adapters.feed.fetch(key).await?;
                let found = value.is_some();
                self.cache.feed.set(key, value);
                found
            }
        };

        Ok(if found {
            FetchOutcome::Stored
        } else {
            FetchOutcome::StoredEmpty
        })
    }
}
