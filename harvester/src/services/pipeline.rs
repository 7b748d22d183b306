use chrono::Utc;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::{SearchConfig, SortMode};
use crate::errors::KeywordError;
use crate::models::ExportBatch;
use crate::services::collector::{Collector, SearchQuery};
use crate::services::export::{fan_out, ExportSink, SinkOutcome};
use crate::services::extractor::RecordExtractor;
use crate::services::filter::{FilterCriteria, FilterVerdict};
use crate::services::identity_store::IdentityStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub max_records: usize,
    pub paging_effort: u32,
    pub sort: SortMode,
    pub max_consecutive_failures: u32,
}

impl From<&SearchConfig> for PipelineOptions {
    fn from(search: &SearchConfig) -> Self {
        Self {
            max_records: search.max_records,
            paging_effort: search.paging_effort,
            sort: search.sort_by,
            max_consecutive_failures: search.max_consecutive_failures,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeywordStats {
    /// Records successfully extracted from payloads.
    pub collected: usize,
    pub extraction_failed: usize,
    pub deduped_out: usize,
    pub filtered_out: usize,
    pub exported: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeywordOutcome {
    Completed,
    Failed(String),
    Cancelled,
    /// Not attempted because an earlier keyword aborted the run.
    Skipped,
}

#[derive(Debug)]
pub struct KeywordReport {
    pub keyword: String,
    pub outcome: KeywordOutcome,
    pub stats: KeywordStats,
    pub sinks: Vec<SinkOutcome>,
}

impl KeywordReport {
    fn new(keyword: &str, outcome: KeywordOutcome) -> Self {
        Self {
            keyword: keyword.to_string(),
            outcome,
            stats: KeywordStats::default(),
            sinks: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<KeywordReport>,
    /// Set when a ledger failure stopped the whole run.
    pub aborted: Option<String>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.aborted.is_none()
            && self
                .reports
                .iter()
                .all(|r| r.outcome == KeywordOutcome::Completed)
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn total_exported(&self) -> usize {
        self.reports.iter().map(|r| r.stats.exported).sum()
    }

    pub fn log(&self) {
        info!("Run summary:");
        for report in &self.reports {
            let s = &report.stats;
            info!(
                "  '{}': {:?} | collected {}, extraction failed {}, deduped {}, filtered {}, exported {}",
                report.keyword,
                report.outcome,
                s.collected,
                s.extraction_failed,
                s.deduped_out,
                s.filtered_out,
                s.exported
            );
            for sink in &report.sinks {
                match &sink.result {
                    Ok(r) => info!("    [{}] ok: {} rows -> {}", sink.sink, r.rows, r.location),
                    Err(e) => warn!("    [{}] failed: {e}", sink.sink),
                }
            }
        }
        if let Some(reason) = &self.aborted {
            error!("Run aborted: {reason}");
        }
    }
}

/// Drives each keyword through extract, dedup, filter and export.
///
/// Keywords run strictly one after another against the same ledger and
/// collector session.
pub struct PipelineRunner<S: IdentityStore> {
    store: S,
    collector: Box<dyn Collector>,
    sinks: Vec<Box<dyn ExportSink>>,
    criteria: FilterCriteria,
    extractor: RecordExtractor,
    options: PipelineOptions,
}

impl<S: IdentityStore> PipelineRunner<S> {
    pub fn new(
        store: S,
        collector: Box<dyn Collector>,
        sinks: Vec<Box<dyn ExportSink>>,
        criteria: FilterCriteria,
        extractor: RecordExtractor,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            collector,
            sinks,
            criteria,
            extractor,
            options,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Hand the ledger back so the caller can close it.
    pub fn into_store(self) -> S {
        self.store
    }

    pub async fn run_keyword(
        &mut self,
        keyword: &str,
        cancel: &CancellationToken,
    ) -> Result<KeywordReport, KeywordError> {
        let mut report = KeywordReport::new(keyword, KeywordOutcome::Completed);
        let query = SearchQuery {
            keyword: keyword.to_string(),
            sort: self.options.sort,
            paging_effort: self.options.paging_effort,
            max_results: self.options.max_records,
        };
        self.collector.begin_search(&query).await?;

        let max_failures = self.options.max_consecutive_failures.max(1);
        let mut records = Vec::new();
        let mut consumed = 0;
        let mut consecutive_failures = 0;

        while consumed < self.options.max_records {
            if cancel.is_cancelled() {
                warn!("'{keyword}': cancelled, discarding {} pending records", records.len());
                report.outcome = KeywordOutcome::Cancelled;
                return Ok(report);
            }

            let stub = match self.collector.next_stub().await {
                Ok(Some(stub)) => stub,
                Ok(None) => break,
                Err(e) => {
                    warn!("'{keyword}': collector stopped producing results: {e}");
                    break;
                }
            };
            consumed += 1;

            let payload = match self.collector.fetch_payload(&stub).await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("'{keyword}': could not fetch note {}: {e}, ending search", stub.id);
                    break;
                }
            };

            let record = match self.extractor.extract(&payload, &stub) {
                Ok(record) => {
                    consecutive_failures = 0;
                    record
                }
                Err(e) => {
                    report.stats.extraction_failed += 1;
                    consecutive_failures += 1;
                    warn!("'{keyword}': skipping note {}: {e}", stub.id);
                    if consecutive_failures >= max_failures {
                        warn!("'{keyword}': {consecutive_failures} extraction failures in a row, collector looks unresponsive");
                        break;
                    }
                    continue;
                }
            };
            report.stats.collected += 1;

            if self.store.has_seen(&record.id)? {
                debug!("'{keyword}': {} already seen", record.id);
                report.stats.deduped_out += 1;
                continue;
            }

            let verdict = self.criteria.check(&record);
            if verdict != FilterVerdict::Keep {
                debug!("'{keyword}': {} dropped ({verdict:?})", record.id);
                report.stats.filtered_out += 1;
                continue;
            }

            self.store.mark_seen(&record.id, Utc::now())?;
            info!(
                "'{keyword}': kept {} ({} likes, {} comments) {}",
                record.id, record.metrics.likes, record.metrics.comments, record.title
            );
            records.push(record);
        }
        self.store.flush()?;

        let batch = ExportBatch::new(keyword, records, Utc::now());
        report.stats.exported = batch.len();
        if batch.is_empty() {
            info!("'{keyword}': no new records to export");
        } else {
            report.sinks = fan_out(&self.sinks, &batch).await;
        }
        Ok(report)
    }

    /// Runs every keyword in order. A ledger failure skips everything after
    /// it; any other failure only affects its own keyword.
    pub async fn run_all(&mut self, keywords: &[String], cancel: &CancellationToken) -> RunSummary {
        let keywords: Vec<&str> = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();
        let mut summary = RunSummary::default();

        for (i, keyword) in keywords.iter().enumerate() {
            if summary.aborted.is_some() {
                summary.reports.push(KeywordReport::new(keyword, KeywordOutcome::Skipped));
                continue;
            }
            if cancel.is_cancelled() {
                summary.reports.push(KeywordReport::new(keyword, KeywordOutcome::Cancelled));
                continue;
            }

            info!("Keyword {}/{}: '{keyword}'", i + 1, keywords.len());
            match self.run_keyword(keyword, cancel).await {
                Ok(report) => summary.reports.push(report),
                Err(e) => {
                    error!("'{keyword}' failed: {e}");
                    if e.is_ledger_failure() {
                        summary.aborted = Some(e.to_string());
                    }
                    summary
                        .reports
                        .push(KeywordReport::new(keyword, KeywordOutcome::Failed(e.to_string())));
                }
            }
        }
        summary
    }
}
