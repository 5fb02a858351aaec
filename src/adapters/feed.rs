//! Release-feed content and the RSS 2.0 decoding behind it.

use crate::error::{EnrichError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedContent {
    pub title: String,
    pub description: String,
    pub link: String,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub title: String,
    pub description: String,
    pub link: String,
    pub pub_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosure: Option<FeedEnclosure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedEnclosure {
    pub url: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub length: String,
}

// Wire shapes for quick-xml. Attributes are `@name`, element text is `$text`.

#[derive(Debug, Deserialize)]
struct RawRss {
    channel: RawChannel,
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "item")]
    items: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(default)]
    guid: Option<RawText>,
    #[serde(default)]
    enclosure: Option<RawEnclosure>,
    /// mikan nests the publish date in a `<torrent>` extension element
    #[serde(default)]
    torrent: Option<RawTorrent>,
}

#[derive(Debug, Deserialize)]
struct RawText {
    #[serde(default, rename = "$text")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct RawEnclosure {
    #[serde(default, rename = "@url")]
    url: String,
    #[serde(default, rename = "@type")]
    mime_type: String,
    #[serde(default, rename = "@length")]
    length: String,
}

#[derive(Debug, Deserialize)]
struct RawTorrent {
    #[serde(default, rename = "pubDate")]
    pub_date: Option<String>,
}

impl From<RawItem> for FeedItem {
    fn from(raw: RawItem) -> Self {
        let pub_date = raw
            .pub_date
            .or_else(|| raw.torrent.and_then(|t| t.pub_date))
            .unwrap_or_default();
        FeedItem {
            title: raw.title,
            description: raw.description,
            link: raw.link,
            pub_date,
            guid: raw.guid.map(|g| g.value).filter(|g| !g.is_empty()),
            enclosure: raw.enclosure.map(|e| FeedEnclosure {
                url: e.url,
                mime_type: e.mime_type,
                length: e.length,
            }),
        }
    }
}

/// Decodes an RSS 2.0 document. A channel without items is valid content.
pub fn parse_feed(xml: &str) -> Result<FeedContent> {
    if looks_like_html(xml) {
        return Err(EnrichError::ParseError(
            "Feed response is an HTML page, not RSS".to_string(),
        ));
    }
    let rss: RawRss = quick_xml::de::from_str(xml)?;
    let channel = rss.channel;
    Ok(FeedContent {
        title: channel.title,
        description: channel.description,
        link: channel.link,
        items: channel.items.into_iter().map(FeedItem::from).collect(),
    })
}

/// True for HTML documents and script redirect pages.
pub fn looks_like_html(body: &str) -> bool {
    let head: String = body.chars().take(2048).collect::<String>().to_ascii_lowercase();
    head.contains("<html") || head.contains("<!doctype html") || body.contains("window.location.replace")
}
