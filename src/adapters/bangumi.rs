use super::http_utils::build_client;
use super::FetchAdapter;
use crate::cache::CacheKind;
use crate::config::HttpConfig;
use crate::error::{EnrichError, Result};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use url::Url;

/// bangumi serves this image for subjects without a cover
pub const NO_ICON_PLACEHOLDER: &str = "https://lain.bgm.tv/img/no_icon_subject.png";

/// Resolves a bangumi subject id to its large cover image URL.
///
/// The API answers `/subjects/{id}/image` with a redirect to the image; the redirect is not
/// followed, the `Location` header is the value.
pub struct BangumiImageAdapter {
    client: Client,
    base: String,
    token: Option<String>,
}

impl BangumiImageAdapter {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(&config.user_agent, config.timeout, Policy::none(), None)?,
            base: config.bangumi_api_base.clone(),
            token: config.bangumi_api_token.clone(),
        })
    }

    fn image_url(&self, subject_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base)
            .map_err(|e| EnrichError::ConfigError(format!("Bad bangumi base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| EnrichError::ConfigError("bangumi base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(&["subjects", subject_id, "image"]);
        url.query_pairs_mut().append_pair("type", "large");
        Ok(url)
    }
}

#[async_trait]
impl FetchAdapter for BangumiImageAdapter {
    type Value = String;

    fn kind(&self) -> CacheKind {
        CacheKind::Image
    }

    async fn fetch(&self, subject_id: &str) -> Result<Option<String>> {
        let url = self.image_url(subject_id)?;
        debug!("[Bangumi] GET {}", url);

        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();

        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Ok(match location {
                Some(location) if location != NO_ICON_PLACEHOLDER => Some(location),
                _ => {
                    info!("[Bangumi] No valid image found for subject {}", subject_id);
                    None
                }
            });
        }

        if status == StatusCode::NOT_FOUND {
            info!("[Bangumi] Subject {} does not exist", subject_id);
            return Ok(None);
        }

        Err(EnrichError::from_status("bangumi", status, url.as_str()))
    }
}
