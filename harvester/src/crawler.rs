use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::Settings;
use crate::services::collector::{Collector, HttpCollector};
use crate::services::export::build_sinks;
use crate::services::extractor::RecordExtractor;
use crate::services::filter::FilterCriteria;
use crate::services::identity_store::SqliteIdentityStore;
use crate::services::pipeline::{PipelineOptions, PipelineRunner, RunSummary};

/// One full crawl over every configured keyword against the session driver.
pub async fn run_crawl(settings: &Settings, cancel: &CancellationToken) -> Result<RunSummary> {
    let collector = HttpCollector::new(&settings.collector, &settings.search.base_url)
        .context("Failed to build collector client")?;
    run_crawl_with(settings, Box::new(collector), cancel).await
}

/// Opens the ledger, runs the pipeline and closes the ledger again.
///
/// Errors are returned only for setup failures; keyword and sink problems
/// are recorded in the summary.
pub async fn run_crawl_with(
    settings: &Settings,
    collector: Box<dyn Collector>,
    cancel: &CancellationToken,
) -> Result<RunSummary> {
    let started = Utc::now();
    let criteria = FilterCriteria::resolve(&settings.filter, started)?;
    let base_url = Url::parse(&settings.search.base_url)
        .with_context(|| format!("Invalid search.baseUrl '{}'", settings.search.base_url))?;

    let sinks = build_sinks(settings)?;
    let store = SqliteIdentityStore::open(&settings.storage.ledger_path)?;

    let mut runner = PipelineRunner::new(
        store,
        collector,
        sinks,
        criteria,
        RecordExtractor::new(base_url, started),
        PipelineOptions::from(&settings.search),
    );

    info!(
        "Crawl started for {} keyword(s), filter: {:?}",
        settings.search.keywords.len(),
        settings.filter
    );
    let mut summary = runner.run_all(&settings.search.keywords, cancel).await;

    if let Err(e) = runner.into_store().close() {
        error!("Failed to close identity ledger: {e}");
        summary.aborted.get_or_insert_with(|| e.to_string());
    }

    summary.log();
    info!(
        "Crawl finished in {}s, {} record(s) exported",
        (Utc::now() - started).num_seconds(),
        summary.total_exported()
    );
    Ok(summary)
}
