pub mod settings;

pub use settings::{
    CacheConfig, Config, HttpConfig, RefreshConfig, RetryConfig, ScheduleConfig,
};

use crate::error::EnrichError;
use std::sync::Arc;

/// Loads and returns the application configuration as an `Arc<Config>`.
/// Reads `.env` if present, then the process environment.
pub fn load_config() -> Result<Arc<Config>, EnrichError> {
    dotenv::dotenv().ok(); // Load .env file if present, ignore errors

    let config = Config::from_env();

    if config.data_dir.as_os_str().is_empty() {
        return Err(EnrichError::ConfigError("DATA_DIR cannot be empty".to_string()));
    }
    if config.data_file.trim().is_empty() {
        return Err(EnrichError::ConfigError("DATA_FILE cannot be empty".to_string()));
    }
    if config.retry_max_attempts == 0 {
        return Err(EnrichError::ConfigError(
            "RETRY_MAX_ATTEMPTS must be at least 1".to_string(),
        ));
    }
    for (name, value) in [
        ("BANGUMI_API_BASE", &config.bangumi_api_base),
        ("BILIBILI_API_BASE", &config.bilibili_api_base),
        ("BILIPLUS_API_BASE", &config.biliplus_api_base),
        ("MIKAN_BASE_URL", &config.mikan_base_url),
    ] {
        url::Url::parse(value)
            .map_err(|e| EnrichError::ConfigError(format!("{} is not a URL: {}", name, e)))?;
    }

    std::fs::create_dir_all(&config.data_dir).map_err(|e| {
        EnrichError::ConfigError(format!(
            "Failed to create data dir {}: {}",
            config.data_dir.display(),
            e
        ))
    })?;
    if let Some(log_dir) = &config.log_dir {
        std::fs::create_dir_all(log_dir).map_err(|e| {
            EnrichError::ConfigError(format!("Failed to create log dir {}: {}", log_dir.display(), e))
        })?;
    }

    Ok(Arc::new(config))
}
