use super::feed::{looks_like_html, parse_feed, FeedContent};
use super::http_utils::{build_client, HttpRateLimiter};
use super::FetchAdapter;
use crate::cache::CacheKind;
use crate::config::HttpConfig;
use crate::error::{EnrichError, Result, RetryPolicy};
use async_trait::async_trait;
use log::{debug, info, warn};
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, PRAGMA, REFERER};
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;
use url::Url;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";
const ACCEPT_PAGE: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_RSS: &str = "application/rss+xml, application/xml, text/xml";
const LANGUAGES: &str = "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7";

/// Fetches a mikan bangumi's release feed.
///
/// mikan is aggressive about rate limiting: requests go through a concurrency gate
/// (default 1), failed attempts back off exponentially and three times longer after a 429.
/// Some responses are a script page that redirects to the real feed; that redirect is
/// followed once.
pub struct MikanFeedAdapter {
    client: Client,
    base: String,
    limiter: HttpRateLimiter,
    retry: RetryPolicy,
    redirect_pattern: Regex,
}

impl MikanFeedAdapter {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = build_client(
            BROWSER_USER_AGENT,
            config.rss_timeout,
            Policy::limited(5),
            config.rss_proxy.as_deref(),
        )?;
        if let Some(proxy) = &config.rss_proxy {
            info!("[Feed] Using proxy {}", proxy);
        }

        let backoff_cap = config
            .rss_base_delay
            .saturating_mul(1 << config.rss_max_retries.min(16));

        Ok(Self {
            client,
            base: config.mikan_base_url.clone(),
            limiter: HttpRateLimiter::new(config.rss_max_concurrent, Duration::ZERO),
            retry: RetryPolicy::new(config.rss_max_retries, config.rss_base_delay, backoff_cap),
            redirect_pattern: Regex::new(r"window\.location\.replace\('([^']+)'\)")
                .map_err(|e| EnrichError::ConfigError(e.to_string()))?,
        })
    }

    pub fn feed_url(&self, bangumi_id: &str) -> Result<Url> {
        let mut url = self.base_url()?;
        url.path_segments_mut()
            .map_err(|_| EnrichError::ConfigError("mikan base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(&["RSS", "Bangumi"]);
        url.query_pairs_mut().append_pair("bangumiId", bangumi_id);
        Ok(url)
    }

    fn referer(&self, bangumi_id: &str) -> String {
        format!("{}/Home/Bangumi/{}", self.base, bangumi_id)
    }

    fn base_url(&self) -> Result<Url> {
        Url::parse(&self.base)
            .map_err(|e| EnrichError::ConfigError(format!("Bad mikan base URL: {}", e)))
    }

    fn browser_get(&self, url: &Url, accept: &str, referer: &str) -> RequestBuilder {
        self.client
            .get(url.clone())
            .header(ACCEPT, accept)
            .header(ACCEPT_LANGUAGE, LANGUAGES)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .header(REFERER, referer)
    }

    /// Extracts the target of a `window.location.replace('...')` page, resolved against `page_url`.
    fn script_redirect(&self, body: &str, page_url: &Url) -> Option<Result<Url>> {
        if !body.contains("window.location.replace") {
            return None;
        }
        let target = match self.redirect_pattern.captures(body).and_then(|c| c.get(1)) {
            Some(m) => m.as_str(),
            None => {
                return Some(Err(EnrichError::ParseError(
                    "Could not extract redirect URL from script page".to_string(),
                )))
            }
        };
        Some(page_url.join(target).map_err(|e| {
            EnrichError::ParseError(format!("Bad redirect target {}: {}", target, e))
        }))
    }

    async fn fetch_once(&self, url: &Url, bangumi_id: &str, attempt: u32) -> Result<Option<FeedContent>> {
        debug!("[Feed] Attempt {} GET {}", attempt, url);

        let response = self
            .browser_get(url, ACCEPT_PAGE, &self.referer(bangumi_id))
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(EnrichError::from_status("mikan", status, url.as_str()));
        }
        let mut body = response.text().await?;

        if let Some(target) = self.script_redirect(&body, url) {
            let target = target?;
            debug!("[Feed] Following script redirect to {}", target);
            let redirected = self
                .browser_get(&target, ACCEPT_RSS, url.as_str())
                .send()
                .await?;
            let status = redirected.status();
            if !status.is_success() {
                return Err(EnrichError::from_status("mikan", status, target.as_str()));
            }
            body = redirected.text().await?;
            if looks_like_html(&body) {
                return Err(EnrichError::ParseError(
                    "Redirect response is still HTML, not RSS".to_string(),
                ));
            }
        }

        parse_feed(&body).map(Some)
    }
}

#[async_trait]
impl FetchAdapter for MikanFeedAdapter {
    type Value = FeedContent;

    fn kind(&self) -> CacheKind {
        CacheKind::Feed
    }

    async fn fetch(&self, bangumi_id: &str) -> Result<Option<FeedContent>> {
        let url = self.feed_url(bangumi_id)?;
        let _permit = self.limiter.acquire().await?;

        let result = self
            .retry
            .execute(|attempt| self.fetch_once(&url, bangumi_id, attempt))
            .await;

        match &result {
            Ok(Some(feed)) => debug!("[Feed] {} items for bangumi {}", feed.items.len(), bangumi_id),
            Ok(None) => info!("[Feed] No feed for bangumi {}", bangumi_id),
            Err(e) => warn!(
                "[Feed] Giving up on bangumi {} after {} attempts: {}",
                bangumi_id, self.retry.max_attempts, e
            ),
        }
        result
    }
}
