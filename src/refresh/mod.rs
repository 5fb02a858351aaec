//! Keeping the working set warm: per-key fetches, batched passes, retries and scheduling.

pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use orchestrator::{
    ItemRefreshReport, KindReport, KindStatus, RefreshOrchestrator, RefreshOutcome, RefreshSummary,
};
pub use retry::{FailedItem, FailedItemsStatus, RetryEngine, RetryPassReport};
pub use scheduler::{next_daily_run, CatalogHandle, RefreshScheduler};
pub use worker::{FetchOutcome, FetchWorker};
