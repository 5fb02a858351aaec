use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Debug, Clone, Error)]
pub enum EnrichError {
    /// Network/connectivity issues talking to a provider
    #[error("Network Error: {0}")]
    NetworkError(String),

    /// Provider did not answer within the adapter timeout
    #[error("Timeout Error: {0}")]
    TimeoutError(String),

    /// Provider answered with HTTP 429
    #[error("Rate Limited: {0}")]
    RateLimited(String),

    /// Provider answered with a status the adapter does not understand
    #[error("Upstream Status: {0}")]
    UpstreamStatus(String),

    /// Response body could not be decoded (JSON, RSS, redirect page)
    #[error("Parse Error: {0}")]
    ParseError(String),

    /// Writing or reading a cache namespace file failed
    #[error("Persistence Error: {0}")]
    PersistenceError(String),

    /// Configuration errors
    #[error("Config Error: {0}")]
    ConfigError(String),

    /// Catalog file missing or malformed
    #[error("Catalog Error: {0}")]
    CatalogError(String),

    /// Requested catalog item does not exist
    #[error("Item Not Found: {0}")]
    NotFound(String),

    /// Invalid input parameters
    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    /// The context has been shut down
    #[error("Enrichment context is shut down")]
    ShutDown,
}

impl From<serde_json::Error> for EnrichError {
    fn from(err: serde_json::Error) -> Self {
        EnrichError::ParseError(format!("JSON serialization/deserialization error: {}", err))
    }
}

impl From<quick_xml::de::DeError> for EnrichError {
    fn from(err: quick_xml::de::DeError) -> Self {
        EnrichError::ParseError(format!("XML deserialization error: {}", err))
    }
}

impl From<std::io::Error> for EnrichError {
    fn from(err: std::io::Error) -> Self {
        EnrichError::PersistenceError(err.to_string())
    }
}

impl From<reqwest::Error> for EnrichError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EnrichError::TimeoutError(err.to_string())
        } else if err.is_decode() {
            EnrichError::ParseError(err.to_string())
        } else if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                EnrichError::RateLimited(err.to_string())
            } else {
                EnrichError::UpstreamStatus(err.to_string())
            }
        } else {
            EnrichError::NetworkError(err.to_string())
        }
    }
}

impl From<anyhow::Error> for EnrichError {
    fn from(err: anyhow::Error) -> Self {
        EnrichError::ConfigError(format!("Anyhow error: {}", err))
    }
}

impl EnrichError {
    /// Builds the error for a non-success HTTP status from a provider.
    pub fn from_status(provider: &str, status: reqwest::StatusCode, url: &str) -> Self {
        if status.as_u16() == 429 {
            EnrichError::RateLimited(format!("{} returned 429 for {}", provider, url))
        } else {
            EnrichError::UpstreamStatus(format!("{} returned {} for {}", provider, status, url))
        }
    }

    /// Determines if an error can go away on its own (worth a FailedItem)
    pub fn is_recoverable(&self) -> bool {
        match self {
            EnrichError::NetworkError(_) => true,
            EnrichError::TimeoutError(_) => true,
            EnrichError::RateLimited(_) => true,
            EnrichError::UpstreamStatus(_) => true,
            EnrichError::ParseError(_) => true, // providers serve challenge pages now and then
            EnrichError::PersistenceError(_) => true,
            EnrichError::ConfigError(_) => false,
            EnrichError::CatalogError(_) => false,
            EnrichError::NotFound(_) => false,
            EnrichError::InvalidInput(_) => false,
            EnrichError::ShutDown => false,
        }
    }

    /// Determines if an adapter should retry immediately (inside its own backoff loop)
    pub fn should_retry(&self) -> bool {
        self.is_recoverable()
            && matches!(
                self,
                EnrichError::NetworkError(_)
                    | EnrichError::TimeoutError(_)
                    | EnrichError::RateLimited(_)
                    | EnrichError::UpstreamStatus(_)
                    | EnrichError::ParseError(_)
            )
    }

    /// Categorizes error for logs and status output
    pub fn categorize(&self) -> ErrorCategory {
        match self {
            EnrichError::NetworkError(_) | EnrichError::TimeoutError(_) => ErrorCategory::Network,
            EnrichError::RateLimited(_) | EnrichError::UpstreamStatus(_) => ErrorCategory::Upstream,
            EnrichError::ParseError(_) => ErrorCategory::Data,
            EnrichError::PersistenceError(_) => ErrorCategory::Storage,
            EnrichError::ConfigError(_) | EnrichError::InvalidInput(_) => {
                ErrorCategory::Configuration
            }
            EnrichError::CatalogError(_) | EnrichError::NotFound(_) => ErrorCategory::Catalog,
            EnrichError::ShutDown => ErrorCategory::Lifecycle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Network,
    Upstream,
    Data,
    Storage,
    Configuration,
    Catalog,
    Lifecycle,
}

/// Retry policy with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Multiplier applied to the delay after a rate-limit answer
    pub rate_limit_factor: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            rate_limit_factor: 3,
        }
    }

    /// Calculate delay for a given attempt (exponential backoff)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let factor = 2_u128.saturating_pow(attempt - 1);
        let delay_ms = self.base_delay.as_millis().saturating_mul(factor);
        let delay = Duration::from_millis(delay_ms.min(self.max_delay.as_millis()) as u64);

        debug!("Retry attempt {}: delay = {:?}", attempt, delay);
        delay
    }

    /// Execute operation with retry logic
    pub async fn execute<F, T, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error: Option<EnrichError> = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let mut delay = self.delay_for_attempt(attempt);
                if matches!(last_error, Some(EnrichError::RateLimited(_))) {
                    delay *= self.rate_limit_factor;
                    warn!("Rate limited, waiting {:?} before retry", delay);
                }
                sleep(delay).await;
            }

            match operation(attempt + 1).await {
                Ok(result) => {
                    if attempt > 0 {
                        info!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if !e.should_retry() {
                        warn!("Non-retryable error on attempt {}: {}", attempt + 1, e);
                        return Err(e);
                    }

                    debug!("Attempt {} failed: {} (retrying...)", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        error!("All {} retry attempts failed", self.max_attempts);
        Err(last_error
            .unwrap_or_else(|| EnrichError::NetworkError("Max retries exceeded".to_string())))
    }
}

// Convenience type alias
pub type Result<T> = std::result::Result<T, EnrichError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_error_classification() {
        assert!(EnrichError::TimeoutError("slow".into()).is_recoverable());
        assert!(EnrichError::RateLimited("429".into()).should_retry());
        assert!(!EnrichError::NotFound("x".into()).is_recoverable());
        assert!(!EnrichError::PersistenceError("disk".into()).should_retry());
        assert_eq!(
            EnrichError::UpstreamStatus("503".into()).categorize(),
            ErrorCategory::Upstream
        );
        assert_eq!(EnrichError::ShutDown.categorize(), ErrorCategory::Lifecycle);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_execute_retries_until_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let calls = AtomicU32::new(0);

        let result = policy
            .execute(|_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(EnrichError::NetworkError("flaky".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_stops_on_non_retryable() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EnrichError::InvalidInput("bad id".into())) }
            })
            .await;

        assert!(matches!(result, Err(EnrichError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
