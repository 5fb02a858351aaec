//! Shared async HTTP utilities for provider adapters: client construction and request pacing.

use crate::error::{EnrichError, Result};
use log::debug;
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::sleep;

/// Caps concurrent requests to one provider and spaces them by `min_delay`.
pub struct HttpRateLimiter {
    pub min_delay: Duration,
    semaphore: Arc<Semaphore>,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl HttpRateLimiter {
    pub fn new(max_concurrent: usize, min_delay: Duration) -> Self {
        Self {
            min_delay,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Waits for a slot and for the minimum spacing since the previous request.
    /// The permit must be held for the duration of the request.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| EnrichError::ShutDown)?;

        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_delay {
                debug!("Pacing request for {:?}", self.min_delay - elapsed);
                sleep(self.min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());

        Ok(permit)
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Builds a reqwest client for one provider.
pub fn build_client(
    user_agent: &str,
    timeout: Duration,
    redirect: Policy,
    proxy: Option<&str>,
) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .redirect(redirect);

    if let Some(proxy_url) = proxy {
        let proxy = Proxy::all(proxy_url)
            .map_err(|e| EnrichError::ConfigError(format!("Invalid proxy {}: {}", proxy_url, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| EnrichError::ConfigError(format!("Failed to build HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = HttpRateLimiter::new(1, Duration::from_millis(50));
        let started = Instant::now();
        {
            let _first = limiter.acquire().await.unwrap();
            assert_eq!(limiter.available_permits(), 0);
        }
        let _second = limiter.acquire().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_invalid_proxy_is_config_error() {
        let result = build_client("ua", Duration::from_secs(1), Policy::none(), Some("::not a url"));
        assert!(matches!(result, Err(EnrichError::ConfigError(_))));
    }
}
