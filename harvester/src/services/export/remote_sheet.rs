//! Google Sheets destination, spoken to directly over the REST API.
//!
//! Without a configured spreadsheet id a new spreadsheet is created on every
//! run and its id is surfaced in the report. Each batch lands in its own
//! worksheet named after the keyword and the batch time.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::{json, Value};
use url::Url;

use super::{ExportSink, SinkReport};
use crate::config::RemoteSheetConfig;
use crate::errors::SinkError;
use crate::models::{ExportBatch, ExportRow};
use crate::utils::sanitize_filename;

const WORKSHEET_KEYWORD_CHARS: usize = 20;

pub struct RemoteSheetSink {
    client: reqwest::Client,
    config: RemoteSheetConfig,
    access_token: Option<String>,
}

impl RemoteSheetSink {
    pub fn new(config: &RemoteSheetConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            access_token: config.resolved_access_token(),
            config: config.clone(),
        })
    }

    pub fn worksheet_name(batch: &ExportBatch) -> String {
        format!(
            "{}_{}",
            sanitize_filename(&batch.keyword, WORKSHEET_KEYWORD_CHARS),
            batch.created_at.format("%m%d_%H%M")
        )
    }

    fn sheets_url(&self, segments: &[&str]) -> Result<Url, SinkError> {
        api_url(&self.config.sheets_api_base, &["v4", "spreadsheets"], segments)
    }

    async fn send(&self, request: reqwest::RequestBuilder, token: &str) -> Result<Value, SinkError> {
        let resp = request.bearer_auth(token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SinkError::Api {
                status: status.as_u16(),
                message,
            });
        }
        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn create_spreadsheet(&self, token: &str) -> Result<String, SinkError> {
        let url = self.sheets_url(&[])?;
        let body = json!({ "properties": { "title": self.config.display_name } });
        let created = self.send(self.client.post(url).json(&body), token).await?;

        created["spreadsheetId"]
            .as_str()
            .filter(|id| !id.is_empty())
            .map(String::from)
            .ok_or_else(|| SinkError::Network("create response carried no spreadsheetId".to_string()))
    }

    /// Add the worksheet, or clear it when a sheet of that name already exists.
    /// Returns the new sheet's numeric id when the add reply carries one.
    async fn prepare_worksheet(&self, spreadsheet_id: &str, name: &str, token: &str) -> Result<Option<i64>, SinkError> {
        let url = self.sheets_url(&[&format!("{spreadsheet_id}:batchUpdate")])?;
        let body = json!({ "requests": [{ "addSheet": { "properties": { "title": name } } }] });

        match self.send(self.client.post(url).json(&body), token).await {
            Ok(reply) => Ok(reply["replies"][0]["addSheet"]["properties"]["sheetId"].as_i64()),
            Err(SinkError::Api { status: 400, message }) if message.contains("already exists") => {
                debug!("Worksheet '{name}' exists, clearing it");
                let url = self.sheets_url(&[spreadsheet_id, "values", &format!("'{name}':clear")])?;
                self.send(self.client.post(url).json(&json!({})), token).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn sheet_id_by_title(&self, spreadsheet_id: &str, name: &str, token: &str) -> Result<i64, SinkError> {
        let mut url = self.sheets_url(&[spreadsheet_id])?;
        url.query_pairs_mut().append_pair("fields", "sheets.properties");
        let meta = self.send(self.client.get(url), token).await?;

        meta["sheets"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|sheet| &sheet["properties"])
            .find(|props| props["title"].as_str() == Some(name))
            .and_then(|props| props["sheetId"].as_i64())
            .ok_or_else(|| SinkError::Network(format!("worksheet '{name}' missing from spreadsheet metadata")))
    }

    /// Freeze and bold the header row.
    async fn format_header(
        &self,
        spreadsheet_id: &str,
        sheet_id: Option<i64>,
        name: &str,
        token: &str,
    ) -> Result<(), SinkError> {
        let sheet_id = match sheet_id {
            Some(id) => id,
            None => self.sheet_id_by_title(spreadsheet_id, name, token).await?,
        };

        let url = self.sheets_url(&[&format!("{spreadsheet_id}:batchUpdate")])?;
        let body = json!({
            "requests": [
                {
                    "updateSheetProperties": {
                        "properties": { "sheetId": sheet_id, "gridProperties": { "frozenRowCount": 1 } },
                        "fields": "gridProperties.frozenRowCount"
                    }
                },
                {
                    "repeatCell": {
                        "range": { "sheetId": sheet_id, "startRowIndex": 0, "endRowIndex": 1 },
                        "cell": { "userEnteredFormat": { "textFormat": { "bold": true } } },
                        "fields": "userEnteredFormat.textFormat.bold"
                    }
                }
            ]
        });
        self.send(self.client.post(url).json(&body), token).await?;
        Ok(())
    }

    async fn write_values(
        &self,
        spreadsheet_id: &str,
        name: &str,
        batch: &ExportBatch,
        token: &str,
    ) -> Result<(), SinkError> {
        let range = format!("'{name}'!A1");
        let mut url = self.sheets_url(&[spreadsheet_id, "values", &range])?;
        url.query_pairs_mut().append_pair("valueInputOption", "USER_ENTERED");

        let mut values = vec![ExportRow::HEADERS.iter().map(|h| h.to_string()).collect::<Vec<_>>()];
        values.extend(batch.rows().iter().map(ExportRow::cells));
        let body = json!({ "range": range, "majorDimension": "ROWS", "values": values });

        self.send(self.client.put(url).json(&body), token).await?;
        Ok(())
    }

    /// Grant writer access to each principal. Failures become warnings.
    async fn share(&self, spreadsheet_id: &str, token: &str) -> Vec<String> {
        let mut warnings = Vec::new();
        for principal in &self.config.share_with {
            let result = async {
                let mut url = api_url(
                    &self.config.drive_api_base,
                    &["drive", "v3", "files"],
                    &[spreadsheet_id, "permissions"],
                )?;
                url.query_pairs_mut().append_pair("sendNotificationEmail", "false");
                let body = json!({ "type": "user", "role": "writer", "emailAddress": principal });
                self.send(self.client.post(url).json(&body), token).await
            }
            .await;

            match result {
                Ok(_) => info!("Shared spreadsheet {spreadsheet_id} with {principal}"),
                Err(e) => warnings.push(format!("could not share with {principal}: {e}")),
            }
        }
        warnings
    }
}

fn api_url(base: &str, prefix: &[&str], segments: &[&str]) -> Result<Url, SinkError> {
    let mut url = Url::parse(base).map_err(|e| SinkError::Config(format!("bad API base '{base}': {e}")))?;
    url.path_segments_mut()
        .map_err(|_| SinkError::Config(format!("API base '{base}' cannot carry a path")))?
        .pop_if_empty()
        .extend(prefix)
        .extend(segments);
    Ok(url)
}

#[async_trait]
impl ExportSink for RemoteSheetSink {
    fn name(&self) -> &'static str {
        "remoteSheet"
    }

    async fn write(&self, batch: &ExportBatch) -> Result<SinkReport, SinkError> {
        let token = self.access_token.as_deref().ok_or_else(|| {
            SinkError::Config("no access token (set remoteSheet.accessToken or GOOGLE_SHEETS_ACCESS_TOKEN)".to_string())
        })?;

        let (spreadsheet_id, created) = match self.config.destination_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => (id.to_string(), false),
            None => (self.create_spreadsheet(token).await?, true),
        };

        let name = Self::worksheet_name(batch);
        let sheet_id = self.prepare_worksheet(&spreadsheet_id, &name, token).await?;
        self.write_values(&spreadsheet_id, &name, batch, token).await?;

        let mut warnings = Vec::new();
        if let Err(e) = self.format_header(&spreadsheet_id, sheet_id, &name, token).await {
            warn!("Header formatting failed for worksheet '{name}': {e}");
            warnings.push(format!("could not format header row: {e}"));
        }
        if created {
            warnings.extend(self.share(&spreadsheet_id, token).await);
        }

        Ok(SinkReport {
            sink: self.name().to_string(),
            location: format!("https://docs.google.com/spreadsheets/d/{spreadsheet_id}"),
            rows: batch.len(),
            new_destination_id: created.then_some(spreadsheet_id),
            warnings,
        })
    }
}
