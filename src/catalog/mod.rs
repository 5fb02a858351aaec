// src/catalog/mod.rs
//! Read-only view of the downloaded bangumi-data catalog.
//!
//! The catalog is immutable for the lifetime of a refresh cycle; it is swapped wholesale
//! when a new file is loaded. Items carry `{site, id}` references from which the cache
//! subsystem derives provider keys.

pub mod season;

pub use season::{catalog_offset, recent_seasons, Season};

use crate::cache::CacheKind;
use crate::error::{EnrichError, Result};
use crate::utils::modified_millis;
use chrono::{DateTime, FixedOffset, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRef {
    pub site: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub title_translate: HashMap<String, Vec<String>>,
    #[serde(default, rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub official_site: String,
    #[serde(default)]
    pub begin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<String>,
    #[serde(default)]
    pub end: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub sites: Vec<SiteRef>,
}

impl Item {
    /// External id of this item on the provider backing `kind`, if referenced.
    pub fn provider_key(&self, kind: CacheKind) -> Option<&str> {
        let site = kind.site();
        self.sites
            .iter()
            .find(|s| s.site == site)
            .map(|s| s.id.trim())
            .filter(|id| !id.is_empty())
    }

    pub fn season(&self, offset: &FixedOffset) -> Option<Season> {
        Season::of_begin(&self.begin, offset)
    }

    /// Stable id: hex md5 of the premiere month (`YYYY-MM`) followed by the title.
    pub fn generate_id(&self, offset: &FixedOffset) -> String {
        let month = season::parse_begin(&self.begin, offset)
            .map(|dt| dt.format("%Y-%m").to_string())
            .unwrap_or_default();
        format!("{:x}", md5::compute(format!("{}{}", month, self.title)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogFile {
    #[serde(default)]
    items: Vec<Item>,
    #[serde(default)]
    site_meta: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    items: Vec<Item>,
    index: HashMap<String, usize>,
    site_meta: serde_json::Value,
    version: i64,
    offset: Option<FixedOffset>,
}

impl Catalog {
    pub fn empty() -> Self {
        Catalog::default()
    }

    /// Builds a catalog, filling in missing ids. The first item wins on an id collision.
    pub fn from_items(mut items: Vec<Item>, offset: FixedOffset) -> Self {
        let mut index = HashMap::with_capacity(items.len());
        for (pos, item) in items.iter_mut().enumerate() {
            if item.id.trim().is_empty() {
                item.id = item.generate_id(&offset);
            }
            if index.contains_key(&item.id) {
                warn!("[Catalog] Duplicate item id {} ({})", item.id, item.title);
                continue;
            }
            index.insert(item.id.clone(), pos);
        }

        Catalog {
            items,
            index,
            site_meta: serde_json::Value::Null,
            version: 0,
            offset: Some(offset),
        }
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// Loads a bangumi-data file; the version is the file's mtime in ms.
    pub fn load(path: &Path, offset: FixedOffset) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EnrichError::CatalogError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let file: CatalogFile = serde_json::from_str(&raw).map_err(|e| {
            EnrichError::CatalogError(format!("Malformed catalog {}: {}", path.display(), e))
        })?;

        let mut catalog = Catalog::from_items(file.items, offset)
            .with_version(modified_millis(path).unwrap_or(0));
        catalog.site_meta = file.site_meta;

        info!(
            "[Catalog] Loaded {} items from {} (version {})",
            catalog.len(),
            path.display(),
            catalog.version
        );
        Ok(catalog)
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&Item> {
        self.index.get(id).and_then(|pos| self.items.get(*pos))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn site_meta(&self) -> &serde_json::Value {
        &self.site_meta
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset.unwrap_or_else(|| catalog_offset(0))
    }

    /// Items premiering in the current or previous season at `now`.
    pub fn working_set(&self, now: DateTime<Utc>) -> Vec<&Item> {
        let offset = self.offset();
        let (current, previous) = recent_seasons(now, &offset);
        self.items
            .iter()
            .filter(|item| {
                matches!(item.season(&offset), Some(s) if s == current || s == previous)
            })
            .collect()
    }
}
