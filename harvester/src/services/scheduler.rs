use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::crawler::run_crawl;
use crate::utils::normalize_cron;

/// Runs the crawl on `schedule.cron` (UTC) until `cancel` fires.
///
/// At most one crawl is active at a time; a trigger that fires while the
/// previous crawl is still going is dropped.
pub async fn run_scheduled(settings: Settings, cancel: CancellationToken) -> Result<()> {
    let cron = normalize_cron(&settings.schedule.cron)
        .ok_or_else(|| anyhow!("Invalid cron expression '{}'", settings.schedule.cron))?;

    let mut scheduler = JobScheduler::new().await?;
    let settings = Arc::new(settings);
    let active_run = Arc::new(Mutex::new(()));
    let cancel_for_job = cancel.clone();

    let crawl_job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let settings = settings.clone();
        let active_run = active_run.clone();
        let cancel = cancel_for_job.clone();
        Box::pin(async move {
            let Ok(_guard) = active_run.try_lock() else {
                warn!("Previous crawl still running, skipping this trigger");
                return;
            };
            if cancel.is_cancelled() {
                return;
            }

            info!("Scheduled crawl triggered");
            match run_crawl(&settings, &cancel).await {
                Ok(summary) if summary.is_success() => info!("Scheduled crawl completed"),
                Ok(_) => warn!("Scheduled crawl finished with failures"),
                Err(e) => error!("Scheduled crawl could not start: {e:#}"),
            }
        })
    })?;

    scheduler.add(crawl_job).await?;
    scheduler.start().await?;
    info!("Crawler scheduler started with cron '{cron}' (UTC), press Ctrl+C to stop");

    cancel.cancelled().await;
    info!("Stopping scheduler...");
    scheduler.shutdown().await?;
    Ok(())
}

/// Cancels `cancel` on Ctrl+C.
pub fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                cancel.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {e}"),
        }
    });
}
