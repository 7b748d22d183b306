use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{artifact_base_name, ExportSink, SinkReport};
use crate::errors::SinkError;
use crate::models::{ExportBatch, ExportRow};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// CSV file per batch. The BOM keeps spreadsheet apps from mangling CJK text.
pub struct TabularSink {
    output_dir: PathBuf,
}

impl TabularSink {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    fn write_file(&self, batch: &ExportBatch) -> Result<PathBuf, SinkError> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self
            .output_dir
            .join(format!("{}.csv", artifact_base_name(&batch.keyword, batch.created_at)));

        let mut file = File::create(&path)?;
        file.write_all(UTF8_BOM)?;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.write_record(ExportRow::HEADERS)?;
        for row in batch.rows() {
            writer.write_record(row.cells())?;
        }
        writer.flush()?;
        Ok(path)
    }
}

#[async_trait]
impl ExportSink for TabularSink {
    fn name(&self) -> &'static str {
        "tabular"
    }

    async fn write(&self, batch: &ExportBatch) -> Result<SinkReport, SinkError> {
        let path = self.write_file(batch)?;
        Ok(SinkReport {
            sink: self.name().to_string(),
            location: path.display().to_string(),
            rows: batch.len(),
            ..SinkReport::default()
        })
    }
}
