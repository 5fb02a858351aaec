pub mod adapters;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod context; // Owns the subsystem; replaces module-level singletons
pub mod enrichment;
pub mod error;
pub mod refresh;
pub mod testing; // Mock adapters and fixtures for tests
pub mod utils;

pub use cache::{CacheEntry, CacheKind, CacheStore, CachedValue};
pub use catalog::{Catalog, Item, Season};
pub use context::EnrichmentContext;
pub use enrichment::EnrichedItem;
pub use error::{EnrichError, Result};
pub use refresh::{FailedItem, RefreshOutcome, RefreshSummary};
