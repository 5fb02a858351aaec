use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BANGUMI_API_BASE: &str = "https://api.bgm.tv/v0";
pub const DEFAULT_BILIBILI_API_BASE: &str = "https://api.bilibili.com";
pub const DEFAULT_BILIPLUS_API_BASE: &str = "https://www.biliplus.com/api/bangumi";
pub const DEFAULT_MIKAN_BASE_URL: &str = "https://mikanani.me";
pub const DEFAULT_USER_AGENT: &str = "bangumi-enricher/0.1 (+https://github.com/bangumi-data)";

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub data_file: String,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
    pub log_file: String,
    pub image_cache_ttl_secs: u64,
    pub video_cache_ttl_secs: u64,
    pub feed_cache_ttl_secs: u64,
    pub refresh_chunk_size: usize,
    pub refresh_chunk_delay_ms: u64,
    pub refresh_startup_delay_ms: u64,
    pub refresh_daily_hour: u32,
    pub catalog_utc_offset_hours: i32,
    pub retry_interval_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_item_delay_ms: u64,
    pub bangumi_api_base: String,
    pub bangumi_api_token: Option<String>,
    pub bilibili_api_base: String,
    pub biliplus_api_base: String,
    pub mikan_base_url: String,
    pub user_agent: String,
    pub http_timeout_ms: u64,
    pub rss_timeout_ms: u64,
    pub rss_max_retries: u32,
    pub rss_base_delay_ms: u64,
    pub rss_max_concurrent: usize,
    pub rss_proxy_host: Option<String>,
    pub rss_proxy_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from(".run"),
            data_file: "data.json".to_string(),
            log_level: "info".to_string(),
            log_dir: None,
            log_file: "server.log".to_string(),
            image_cache_ttl_secs: 7 * 24 * 60 * 60,
            video_cache_ttl_secs: 7 * 24 * 60 * 60,
            feed_cache_ttl_secs: 6 * 60 * 60,
            refresh_chunk_size: 2,
            refresh_chunk_delay_ms: 2000,
            refresh_startup_delay_ms: 1000,
            refresh_daily_hour: 2,
            catalog_utc_offset_hours: 8,
            retry_interval_secs: 60,
            retry_max_attempts: 5,
            retry_item_delay_ms: 1000,
            bangumi_api_base: DEFAULT_BANGUMI_API_BASE.to_string(),
            bangumi_api_token: None,
            bilibili_api_base: DEFAULT_BILIBILI_API_BASE.to_string(),
            biliplus_api_base: DEFAULT_BILIPLUS_API_BASE.to_string(),
            mikan_base_url: DEFAULT_MIKAN_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_ms: 5000,
            rss_timeout_ms: 30_000,
            rss_max_retries: 3,
            rss_base_delay_ms: 3000,
            rss_max_concurrent: 1,
            rss_proxy_host: None,
            rss_proxy_port: 7890,
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let d = Config::default();
        Config {
            data_dir: env_opt("DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            data_file: env_opt("DATA_FILE").unwrap_or(d.data_file),
            log_level: env_opt("LOG_LEVEL").unwrap_or(d.log_level),
            log_dir: env_opt("LOG_DIR").map(PathBuf::from),
            log_file: env_opt("LOG_FILE").unwrap_or(d.log_file),
            image_cache_ttl_secs: env_parse("IMAGE_CACHE_TTL_SECS", d.image_cache_ttl_secs),
            video_cache_ttl_secs: env_parse("VIDEO_CACHE_TTL_SECS", d.video_cache_ttl_secs),
            feed_cache_ttl_secs: env_parse("FEED_CACHE_TTL_SECS", d.feed_cache_ttl_secs),
            refresh_chunk_size: env_parse("REFRESH_CHUNK_SIZE", d.refresh_chunk_size),
            refresh_chunk_delay_ms: env_parse("REFRESH_CHUNK_DELAY_MS", d.refresh_chunk_delay_ms),
            refresh_startup_delay_ms: env_parse(
                "REFRESH_STARTUP_DELAY_MS",
                d.refresh_startup_delay_ms,
            ),
            refresh_daily_hour: env_parse("REFRESH_DAILY_HOUR", d.refresh_daily_hour),
            catalog_utc_offset_hours: env_parse(
                "CATALOG_UTC_OFFSET_HOURS",
                d.catalog_utc_offset_hours,
            ),
            retry_interval_secs: env_parse("RETRY_INTERVAL_SECS", d.retry_interval_secs),
            retry_max_attempts: env_parse("RETRY_MAX_ATTEMPTS", d.retry_max_attempts),
            retry_item_delay_ms: env_parse("RETRY_ITEM_DELAY_MS", d.retry_item_delay_ms),
            bangumi_api_base: env_opt("BANGUMI_API_BASE").unwrap_or(d.bangumi_api_base),
            bangumi_api_token: env_opt("BANGUMI_API_TOKEN"),
            bilibili_api_base: env_opt("BILIBILI_API_BASE").unwrap_or(d.bilibili_api_base),
            biliplus_api_base: env_opt("BILIPLUS_API_BASE").unwrap_or(d.biliplus_api_base),
            mikan_base_url: env_opt("MIKAN_BASE_URL").unwrap_or(d.mikan_base_url),
            user_agent: env_opt("USER_AGENT").unwrap_or(d.user_agent),
            http_timeout_ms: env_parse("HTTP_TIMEOUT_MS", d.http_timeout_ms),
            rss_timeout_ms: env_parse("RSS_TIMEOUT_MS", d.rss_timeout_ms),
            rss_max_retries: env_parse("RSS_MAX_RETRIES", d.rss_max_retries),
            rss_base_delay_ms: env_parse("RSS_BASE_DELAY_MS", d.rss_base_delay_ms),
            rss_max_concurrent: env_parse("RSS_MAX_CONCURRENT", d.rss_max_concurrent),
            rss_proxy_host: env_opt("RSS_PROXY_HOST"),
            rss_proxy_port: env_parse("RSS_PROXY_PORT", d.rss_proxy_port),
        }
    }

    /// Path of the catalog file (`DATA_DIR/DATA_FILE`).
    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(&self.data_file)
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| dir.join(&self.log_file))
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            data_dir: self.data_dir.clone(),
            image_ttl: Duration::from_secs(self.image_cache_ttl_secs),
            video_ttl: Duration::from_secs(self.video_cache_ttl_secs),
            feed_ttl: Duration::from_secs(self.feed_cache_ttl_secs),
            read_only: false,
        }
    }

    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            chunk_size: self.refresh_chunk_size.clamp(2, 5),
            chunk_delay: Duration::from_millis(self.refresh_chunk_delay_ms),
            utc_offset_hours: self.catalog_utc_offset_hours,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            interval: Duration::from_secs(self.retry_interval_secs),
            max_attempts: self.retry_max_attempts,
            item_delay: Duration::from_millis(self.retry_item_delay_ms),
        }
    }

    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig {
            startup_delay: Duration::from_millis(self.refresh_startup_delay_ms),
            daily_hour: self.refresh_daily_hour.min(23),
            utc_offset_hours: self.catalog_utc_offset_hours,
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            bangumi_api_base: self.bangumi_api_base.trim_end_matches('/').to_string(),
            bangumi_api_token: self.bangumi_api_token.clone(),
            bilibili_api_base: self.bilibili_api_base.trim_end_matches('/').to_string(),
            biliplus_api_base: self.biliplus_api_base.trim_end_matches('/').to_string(),
            mikan_base_url: self.mikan_base_url.trim_end_matches('/').to_string(),
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_millis(self.http_timeout_ms),
            rss_timeout: Duration::from_millis(self.rss_timeout_ms),
            rss_max_retries: self.rss_max_retries.max(1),
            rss_base_delay: Duration::from_millis(self.rss_base_delay_ms),
            rss_max_concurrent: self.rss_max_concurrent.max(1),
            rss_proxy: self
                .rss_proxy_host
                .as_ref()
                .map(|host| format!("http://{}:{}", host, self.rss_proxy_port)),
        }
    }

    pub fn validate_and_log(&self) {
        let mut shown = self.clone();
        if shown.bangumi_api_token.is_some() {
            shown.bangumi_api_token = Some("<redacted>".to_string());
        }
        log::info!("Application Configuration Loaded: {:?}", shown);
        if !(2..=5).contains(&self.refresh_chunk_size) {
            log::warn!(
                "REFRESH_CHUNK_SIZE={} is outside 2..=5, clamping",
                self.refresh_chunk_size
            );
        }
        if self.refresh_daily_hour > 23 {
            log::warn!(
                "REFRESH_DAILY_HOUR={} is not an hour of the day, using 23",
                self.refresh_daily_hour
            );
        }
    }
}

/// TTLs and location of the persisted cache namespaces
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub data_dir: PathBuf,
    pub image_ttl: Duration,
    pub video_ttl: Duration,
    pub feed_ttl: Duration,
    /// Load only: stale files are ignored instead of deleted and nothing is written back
    pub read_only: bool,
}

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    pub utc_offset_hours: i32,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    pub item_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub startup_delay: Duration,
    pub daily_hour: u32,
    pub utc_offset_hours: i32,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bangumi_api_base: String,
    pub bangumi_api_token: Option<String>,
    pub bilibili_api_base: String,
    pub biliplus_api_base: String,
    pub mikan_base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub rss_timeout: Duration,
    pub rss_max_retries: u32,
    pub rss_base_delay: Duration,
    pub rss_max_concurrent: usize,
    pub rss_proxy: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Config::default().http_config()
    }
}
