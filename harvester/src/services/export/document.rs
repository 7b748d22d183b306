use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{artifact_base_name, ExportSink, SinkReport};
use crate::errors::SinkError;
use crate::models::ExportBatch;

/// Pretty-printed JSON array of export rows.
pub struct DocumentSink {
    output_dir: PathBuf,
}

impl DocumentSink {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ExportSink for DocumentSink {
    fn name(&self) -> &'static str {
        "document"
    }

    async fn write(&self, batch: &ExportBatch) -> Result<SinkReport, SinkError> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self
            .output_dir
            .join(format!("{}.json", artifact_base_name(&batch.keyword, batch.created_at)));

        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, &batch.rows())?;
        writer.flush()?;

        Ok(SinkReport {
            sink: self.name().to_string(),
            location: path.display().to_string(),
            rows: batch.len(),
            ..SinkReport::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_record;
    use chrono::Utc;
    use serde_json::Value;

    #[tokio::test]
    async fn rows_keep_numbers_and_column_names() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DocumentSink::new(dir.path());
        let batch = ExportBatch::new(
            "rust",
            vec![sample_record("a", 12, 3), sample_record("b", 7, 30)],
            Utc::now(),
        );

        let report = sink.write(&batch).await.unwrap();
        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&report.location).unwrap()).unwrap();
        let rows = parsed.as_array().unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Note ID"], "b");
        assert_eq!(rows[0]["Comments"], 30);
        assert_eq!(rows[1]["Likes"], 12);
        assert_eq!(rows[1]["Note Type"], "normal");
    }
}
