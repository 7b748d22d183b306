//! Export destinations. Every sink receives the same sorted batch and
//! succeeds or fails on its own.

pub mod document;
pub mod remote_sheet;
pub mod tabular;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::config::{OutputFormat, Settings};
use crate::errors::SinkError;
use crate::models::ExportBatch;
use crate::utils::sanitize_filename;

pub use document::DocumentSink;
pub use remote_sheet::RemoteSheetSink;
pub use tabular::TabularSink;

const ARTIFACT_KEYWORD_CHARS: usize = 30;

#[async_trait]
pub trait ExportSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Write the whole batch. Implementations must not reorder it.
    async fn write(&self, batch: &ExportBatch) -> Result<SinkReport, SinkError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub sink: String,
    /// File path or remote URL written to.
    pub location: String,
    pub rows: usize,
    /// Set when the sink had to create its destination. Pin it in config.
    pub new_destination_id: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct SinkOutcome {
    pub sink: &'static str,
    pub result: Result<SinkReport, SinkError>,
}

impl SinkOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs every sink in order. A failing sink never stops the ones after it.
pub async fn fan_out(sinks: &[Box<dyn ExportSink>], batch: &ExportBatch) -> Vec<SinkOutcome> {
    let mut outcomes = Vec::with_capacity(sinks.len());

    for sink in sinks {
        let result = sink.write(batch).await;
        match &result {
            Ok(report) => {
                info!(
                    "[{}] wrote {} rows for '{}' to {}",
                    sink.name(),
                    report.rows,
                    batch.keyword,
                    report.location
                );
                if let Some(id) = &report.new_destination_id {
                    info!("[{}] created new destination {id}, add it to your config to reuse it", sink.name());
                }
                for warning in &report.warnings {
                    warn!("[{}] {warning}", sink.name());
                }
            }
            Err(e) => error!("[{}] export of '{}' failed: {e}", sink.name(), batch.keyword),
        }
        outcomes.push(SinkOutcome {
            sink: sink.name(),
            result,
        });
    }
    outcomes
}

/// Sinks for the configured output formats, in configured order.
pub fn build_sinks(settings: &Settings) -> Result<Vec<Box<dyn ExportSink>>, SinkError> {
    let mut sinks: Vec<Box<dyn ExportSink>> = Vec::new();
    let mut seen = Vec::new();

    for format in &settings.output.formats {
        if seen.contains(format) {
            continue;
        }
        seen.push(*format);

        let sink: Box<dyn ExportSink> = match format {
            OutputFormat::Tabular => Box::new(TabularSink::new(&settings.output.output_dir)),
            OutputFormat::Document => Box::new(DocumentSink::new(&settings.output.output_dir)),
            OutputFormat::RemoteSheet => Box::new(RemoteSheetSink::new(&settings.remote_sheet)?),
        };
        sinks.push(sink);
    }
    Ok(sinks)
}

/// `notes_{keyword}_{YYYYmmdd_HHMMSS}`, shared by the file sinks.
pub fn artifact_base_name(keyword: &str, created_at: DateTime<Utc>) -> String {
    format!(
        "notes_{}_{}",
        sanitize_filename(keyword, ARTIFACT_KEYWORD_CHARS),
        created_at.format("%Y%m%d_%H%M%S")
    )
}
