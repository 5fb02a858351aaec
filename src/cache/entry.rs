use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// A cached provider answer. `Empty` means the provider was asked and has nothing.
/// On disk `Empty` is `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue<T> {
    Present(T),
    Empty,
}

impl<T> CachedValue<T> {
    pub fn is_empty(&self) -> bool {
        matches!(self, CachedValue::Empty)
    }

    pub fn as_option(&self) -> Option<&T> {
        match self {
            CachedValue::Present(value) => Some(value),
            CachedValue::Empty => None,
        }
    }
}

impl<T> From<Option<T>> for CachedValue<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => CachedValue::Present(value),
            None => CachedValue::Empty,
        }
    }
}

impl<T: Serialize> Serialize for CachedValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CachedValue::Present(value) => serializer.serialize_some(value),
            CachedValue::Empty => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for CachedValue<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(CachedValue::from)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub value: CachedValue<T>,
    /// Unix epoch milliseconds
    pub fetched_at: i64,
}

impl<T> CacheEntry<T> {
    pub fn new(value: Option<T>, fetched_at: i64) -> Self {
        Self {
            value: value.into(),
            fetched_at,
        }
    }

    /// `fetched_at + ttl > now`
    pub fn is_fresh_at(&self, ttl: Duration, now_ms: i64) -> bool {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.fetched_at.saturating_add(ttl_ms) > now_ms
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.fetched_at)
    }
}
