//! Scriptable in-memory provider adapter.

use crate::adapters::FetchAdapter;
use crate::cache::CacheKind;
use crate::error::{EnrichError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// What a mock fetch answers.
#[derive(Debug, Clone, PartialEq)]
pub enum MockOutcome<V> {
    Value(V),
    Empty,
    Fail,
}

/// Per-key scripted adapter. A key's script is consumed front to back and its last outcome
/// repeats; unscripted keys get the default outcome.
pub struct MockAdapter<V> {
    kind: CacheKind,
    scripts: Mutex<HashMap<String, VecDeque<MockOutcome<V>>>>,
    default_outcome: MockOutcome<V>,
    delay: Option<Duration>,
    calls: DashMap<String, u32>,
    total_calls: AtomicU32,
}

impl<V: Clone + Send + Sync + 'static> MockAdapter<V> {
    pub fn new(kind: CacheKind) -> Self {
        Self {
            kind,
            scripts: Mutex::new(HashMap::new()),
            default_outcome: MockOutcome::Empty,
            delay: None,
            calls: DashMap::new(),
            total_calls: AtomicU32::new(0),
        }
    }

    pub fn with_default(mut self, outcome: MockOutcome<V>) -> Self {
        self.default_outcome = outcome;
        self
    }

    /// Every fetch sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn script(&self, key: &str, outcomes: Vec<MockOutcome<V>>) {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        scripts.insert(key.to_string(), outcomes.into());
    }

    pub fn always(&self, key: &str, outcome: MockOutcome<V>) {
        self.script(key, vec![outcome]);
    }

    pub fn calls(&self, key: &str) -> u32 {
        self.calls.get(key).map(|c| *c).unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.total_calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, key: &str) -> MockOutcome<V> {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        match scripts.get_mut(key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(MockOutcome::Fail),
            Some(queue) => queue.front().cloned().unwrap_or(MockOutcome::Fail),
            None => self.default_outcome.clone(),
        }
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> FetchAdapter for MockAdapter<V> {
    type Value = V;

    fn kind(&self) -> CacheKind {
        self.kind
    }

    async fn fetch(&self, key: &str) -> Result<Option<V>> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self.calls.entry(key.to_string()).or_insert(0) += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_outcome(key) {
            MockOutcome::Value(v) => Ok(Some(v)),
            MockOutcome::Empty => Ok(None),
            MockOutcome::Fail => Err(EnrichError::NetworkError(format!(
                "scripted {} failure for {}",
                self.kind, key
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_sticky_last() {
        let mock: MockAdapter<String> = MockAdapter::new(CacheKind::Image);
        mock.script(
            "1",
            vec![MockOutcome::Fail, MockOutcome::Value("url".to_string())],
        );

        assert!(mock.fetch("1").await.is_err());
        assert_eq!(mock.fetch("1").await.unwrap().as_deref(), Some("url"));
        assert_eq!(mock.fetch("1").await.unwrap().as_deref(), Some("url"));
        assert_eq!(mock.fetch("other").await.unwrap(), None);
        assert_eq!(mock.calls("1"), 3);
        assert_eq!(mock.total_calls(), 4);
    }
}
