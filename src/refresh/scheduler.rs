use super::orchestrator::{RefreshOrchestrator, RefreshOutcome};
use crate::catalog::{catalog_offset, Catalog};
use crate::config::ScheduleConfig;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveTime, TimeZone, Utc};
use log::{error, info};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// The catalog currently being served; swapped wholesale on reload.
pub type CatalogHandle = Arc<RwLock<Arc<Catalog>>>;

/// Next occurrence of `hour:00` in `offset` strictly after `now`.
pub fn next_daily_run(now: DateTime<Utc>, hour: u32, offset: &FixedOffset) -> DateTime<Utc> {
    let local = now.with_timezone(offset);
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let mut candidate = local.date_naive().and_time(at);
    if candidate <= local.naive_local() {
        candidate += ChronoDuration::days(1);
    }
    offset
        .from_local_datetime(&candidate)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now + ChronoDuration::days(1))
}

/// Drives full refreshes: once shortly after start, then daily, plus manual triggers.
///
/// Ticks spawn the refresh and return; an overlapping tick is turned away by the
/// orchestrator's in-progress flag.
pub struct RefreshScheduler {
    trigger: Arc<Notify>,
    shutdown_sender: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RefreshScheduler {
    pub fn start(
        config: ScheduleConfig,
        orchestrator: Arc<RefreshOrchestrator>,
        catalog: CatalogHandle,
    ) -> Self {
        let trigger = Arc::new(Notify::new());
        let (shutdown_sender, mut shutdown_receiver) = oneshot::channel::<()>();
        let offset = catalog_offset(config.utc_offset_hours);
        let loop_trigger = trigger.clone();

        let handle = tokio::spawn(async move {
            let mut passes: Vec<JoinHandle<()>> = Vec::new();

            tokio::select! {
                _ = &mut shutdown_receiver => return,
                _ = sleep(config.startup_delay) => {
                    passes.push(spawn_refresh("startup", orchestrator.clone(), catalog.clone()));
                }
            }

            loop {
                let now = Utc::now();
                let next = next_daily_run(now, config.daily_hour, &offset);
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                info!("[Scheduler] Next daily cache refresh at {}", next.with_timezone(&offset));

                let reason = tokio::select! {
                    _ = &mut shutdown_receiver => break,
                    _ = sleep(wait) => "daily",
                    _ = loop_trigger.notified() => "manual",
                };
                passes.retain(|pass| !pass.is_finished());
                passes.push(spawn_refresh(reason, orchestrator.clone(), catalog.clone()));
            }

            // passes still writing to the cache would race the final flush
            for pass in passes {
                if !pass.is_finished() {
                    info!("[Scheduler] Cancelling a running cache refresh");
                    pass.abort();
                }
                let _ = pass.await;
            }
            info!("[Scheduler] Cache refresh scheduler stopped");
        });

        info!(
            "[Scheduler] Started: first refresh in {:?}, then daily at {:02}:00 (UTC{:+})",
            config.startup_delay, config.daily_hour, config.utc_offset_hours
        );

        Self {
            trigger,
            shutdown_sender: Some(shutdown_sender),
            handle: Some(handle),
        }
    }

    /// Requests an immediate full refresh.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Stops the loop and cancels a refresh pass it started that is still running.
    pub async fn stop(&mut self) {
        if let Some(sender) = self.shutdown_sender.take() {
            let _ = sender.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("[Scheduler] Scheduler task ended abnormally: {}", e);
                }
            }
        }
    }
}

fn spawn_refresh(
    reason: &'static str,
    orchestrator: Arc<RefreshOrchestrator>,
    catalog: CatalogHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let catalog = match catalog.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        info!("[Scheduler] Starting {} cache refresh", reason);
        match orchestrator.refresh_working_set(&catalog).await {
            RefreshOutcome::AlreadyRunning => {
                info!("[Scheduler] {} refresh skipped, another pass is running", reason)
            }
            RefreshOutcome::Completed(summary) => info!(
                "[Scheduler] {} refresh finished: {} items, {} failed",
                reason, summary.selected, summary.failed
            ),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_next_daily_run_same_day() {
        let cst = catalog_offset(8);
        // 2024-05-01 01:00 in UTC+8
        let next = next_daily_run(utc("2024-04-30T17:00:00Z"), 2, &cst);
        assert_eq!(next, utc("2024-04-30T18:00:00Z"));
    }

    #[test]
    fn test_next_daily_run_rolls_to_tomorrow() {
        let cst = catalog_offset(8);
        // exactly 02:00 local is not strictly after now
        let next = next_daily_run(utc("2024-04-30T18:00:00Z"), 2, &cst);
        assert_eq!(next, utc("2024-05-01T18:00:00Z"));

        let next = next_daily_run(utc("2024-12-31T20:00:00Z"), 2, &cst);
        assert_eq!(next, utc("2025-01-01T18:00:00Z"));
    }
}
