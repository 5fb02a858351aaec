use super::http_utils::build_client;
use super::FetchAdapter;
use crate::cache::CacheKind;
use crate::config::HttpConfig;
use crate::error::{EnrichError, Result};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::redirect::Policy;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

pub fn embed_link(bvid: &str) -> String {
    format!(
        "https://player.bilibili.com/player.html?isOutside=true&bvid={}&high_quality=1",
        bvid
    )
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    code: i64,
    #[serde(default)]
    result: Option<ReviewResult>,
}

#[derive(Debug, Deserialize)]
struct ReviewResult {
    #[serde(default)]
    media: Option<ReviewMedia>,
}

#[derive(Debug, Deserialize)]
struct ReviewMedia {
    #[serde(default)]
    season_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SeasonResponse {
    code: i64,
    #[serde(default)]
    result: Option<SeasonResult>,
}

#[derive(Debug, Deserialize)]
struct SeasonResult {
    #[serde(default)]
    section: Vec<SeasonSection>,
}

#[derive(Debug, Deserialize)]
struct SeasonSection {
    #[serde(default)]
    title: String,
    #[serde(default)]
    episodes: Vec<SectionEpisode>,
}

#[derive(Debug, Deserialize)]
struct SectionEpisode {
    #[serde(default)]
    bvid: Option<String>,
}

/// Resolves a bilibili media id to the bvid of its first PV.
///
/// Two lookups: media id to season id on bilibili, then the season's sections on biliplus.
/// Either lookup coming back without data is a confirmed empty.
pub struct BilibiliVideoAdapter {
    client: Client,
    bilibili_base: String,
    biliplus_base: String,
}

impl BilibiliVideoAdapter {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(&config.user_agent, config.timeout, Policy::limited(5), None)?,
            bilibili_base: config.bilibili_api_base.clone(),
            biliplus_base: config.biliplus_api_base.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!("[Bilibili] GET {}", url);
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::from_status("bilibili", status, url.as_str()));
        }
        Ok(response.json::<T>().await?)
    }

    async fn fetch_season_id(&self, media_id: &str) -> Result<Option<u64>> {
        let mut url = parse_base(&self.bilibili_base)?;
        url.path_segments_mut()
            .map_err(|_| EnrichError::ConfigError("bilibili base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(&["pgc", "review", "user"]);
        url.query_pairs_mut().append_pair("media_id", media_id);

        let body: ReviewResponse = self.get_json(url).await?;
        if body.code != 0 {
            return Ok(None);
        }
        Ok(body.result.and_then(|r| r.media).and_then(|m| m.season_id))
    }

    async fn fetch_pv_bvid(&self, season_id: u64) -> Result<Option<String>> {
        let mut url = parse_base(&self.biliplus_base)?;
        url.query_pairs_mut()
            .append_pair("season", &season_id.to_string());

        let body: SeasonResponse = self.get_json(url).await?;
        if body.code != 0 {
            return Ok(None);
        }
        Ok(body.result.and_then(|result| first_pv(result.section)))
    }
}

fn parse_base(base: &str) -> Result<Url> {
    Url::parse(base).map_err(|e| EnrichError::ConfigError(format!("Bad bilibili base URL: {}", e)))
}

fn first_pv(sections: Vec<SeasonSection>) -> Option<String> {
    sections
        .into_iter()
        .find(|s| s.title.contains("PV"))?
        .episodes
        .into_iter()
        .next()?
        .bvid
        .filter(|b| !b.is_empty())
}

#[async_trait]
impl FetchAdapter for BilibiliVideoAdapter {
    type Value = String;

    fn kind(&self) -> CacheKind {
        CacheKind::Video
    }

    async fn fetch(&self, media_id: &str) -> Result<Option<String>> {
        let Some(season_id) = self.fetch_season_id(media_id).await? else {
            info!("[Bilibili] No season for media {}", media_id);
            return Ok(None);
        };

        let bvid = self.fetch_pv_bvid(season_id).await?;
        if bvid.is_none() {
            info!("[Bilibili] No PV section for season {} (media {})", season_id, media_id);
        }
        Ok(bvid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_pv_section_wins() {
        let body: SeasonResponse = serde_json::from_str(
            r#"{"code":0,"result":{"section":[
                {"title":"正片","episodes":[{"bvid":"BVmain"}]},
                {"title":"PV&其他","episodes":[{"bvid":"BVpv1"},{"bvid":"BVpv2"}]},
                {"title":"PV2","episodes":[{"bvid":"BVlater"}]}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(first_pv(body.result.unwrap().section).as_deref(), Some("BVpv1"));
    }

    #[test]
    fn test_pv_section_without_episodes() {
        let body: SeasonResponse =
            serde_json::from_str(r#"{"code":0,"result":{"section":[{"title":"PV","episodes":[]}]}}"#)
                .unwrap();
        assert_eq!(first_pv(body.result.unwrap().section), None);
    }

    #[test]
    fn test_embed_link() {
        assert_eq!(
            embed_link("BV1xx"),
            "https://player.bilibili.com/player.html?isOutside=true&bvid=BV1xx&high_quality=1"
        );
    }
}
