use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use harvester::config::RemoteSheetConfig;
use harvester::errors::SinkError;
use harvester::models::{Author, ExportBatch, Metrics, Record, RecordKind};
use harvester::services::export::{ExportSink, RemoteSheetSink};

fn record(id: &str, comments: u64) -> Record {
    Record {
        id: id.to_string(),
        kind: RecordKind::Video,
        title: format!("title {id}"),
        body: String::new(),
        author: Author {
            name: "ferris".into(),
            author_id: "u1".into(),
        },
        metrics: Metrics {
            likes: 10,
            comments,
            collects: 0,
            shares: 0,
        },
        published_at: None,
        link: format!("https://www.xiaohongshu.com/explore/{id}"),
        author_link: "https://www.xiaohongshu.com/user/profile/u1".into(),
        image_urls: Vec::new(),
        tags: vec!["rust".into()],
    }
}

fn batch() -> ExportBatch {
    ExportBatch::new(
        "rust",
        vec![record("a", 1), record("b", 5)],
        Utc.with_ymd_and_hms(2024, 7, 1, 9, 30, 0).unwrap(),
    )
}

fn config(server: &MockServer, destination_id: Option<&str>) -> RemoteSheetConfig {
    RemoteSheetConfig {
        destination_id: destination_id.map(String::from),
        display_name: "Harvest".into(),
        share_with: vec!["ops@example.com".into()],
        access_token: Some("test-token".into()),
        sheets_api_base: server.uri(),
        drive_api_base: server.uri(),
    }
}

async fn mount_worksheet_and_values(server: &MockServer, spreadsheet_id: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/v4/spreadsheets/{spreadsheet_id}:batchUpdate")))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "requests": [{ "addSheet": { "properties": { "title": "rust_0701_0930" } } }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "replies": [{ "addSheet": { "properties": { "sheetId": 7, "title": "rust_0701_0930" } } }]
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path_regex(format!(r"^/v4/spreadsheets/{spreadsheet_id}/values/.*A1$")))
        .and(query_param("valueInputOption", "USER_ENTERED"))
        .and(body_partial_json(json!({ "majorDimension": "ROWS" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "updatedRows": 3 })))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_header_format(server: &MockServer, spreadsheet_id: &str, sheet_id: i64, status: u16) {
    Mock::given(method("POST"))
        .and(path(format!("/v4/spreadsheets/{spreadsheet_id}:batchUpdate")))
        .and(body_partial_json(json!({
            "requests": [
                {
                    "updateSheetProperties": {
                        "properties": { "sheetId": sheet_id, "gridProperties": { "frozenRowCount": 1 } }
                    }
                },
                {
                    "repeatCell": {
                        "range": { "sheetId": sheet_id, "startRowIndex": 0, "endRowIndex": 1 },
                        "cell": { "userEnteredFormat": { "textFormat": { "bold": true } } }
                    }
                }
            ]
        })))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({ "replies": [{}, {}] })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn creates_spreadsheet_and_shares_it_when_unpinned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v4/spreadsheets"))
        .and(body_partial_json(json!({ "properties": { "title": "Harvest" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "spreadsheetId": "new-sheet" })))
        .expect(1)
        .mount(&server)
        .await;
    mount_worksheet_and_values(&server, "new-sheet").await;
    mount_header_format(&server, "new-sheet", 7, 200).await;
    Mock::given(method("POST"))
        .and(path("/drive/v3/files/new-sheet/permissions"))
        .and(body_partial_json(json!({ "role": "writer", "emailAddress": "ops@example.com" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "perm" })))
        .expect(1)
        .mount(&server)
        .await;

    let sink = RemoteSheetSink::new(&config(&server, None)).unwrap();
    let report = sink.write(&batch()).await.unwrap();

    assert_eq!(report.rows, 2);
    assert_eq!(report.new_destination_id.as_deref(), Some("new-sheet"));
    assert!(report.location.ends_with("/new-sheet"));
    assert!(report.warnings.is_empty());

    let requests = server.received_requests().await.unwrap();
    let put = requests
        .iter()
        .find(|r| r.method.as_str() == "PUT")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&put.body).unwrap();
    assert_eq!(body["values"][0][0], "Note ID");
    assert_eq!(body["values"][1][0], "b");
    assert_eq!(body["values"][2][0], "a");
}

#[tokio::test]
async fn pinned_spreadsheet_is_reused_without_sharing() {
    let server = MockServer::start().await;
    mount_worksheet_and_values(&server, "pinned").await;
    mount_header_format(&server, "pinned", 7, 200).await;

    let sink = RemoteSheetSink::new(&config(&server, Some("pinned"))).unwrap();
    let report = sink.write(&batch()).await.unwrap();

    assert!(report.new_destination_id.is_none());
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| !r.url.path().contains("permissions")));
}

#[tokio::test]
async fn existing_worksheet_is_cleared_before_writing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v4/spreadsheets/pinned:batchUpdate"))
        .and(body_partial_json(json!({ "requests": [{ "addSheet": {} }] })))
        .respond_with(ResponseTemplate::new(400).set_body_string(
            "A sheet with the name \"rust_0701_0930\" already exists.",
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v4/spreadsheets/pinned/values/.*:clear$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/v4/spreadsheets/pinned/values/.*A1$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v4/spreadsheets/pinned"))
        .and(query_param("fields", "sheets.properties"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sheets": [
                { "properties": { "sheetId": 0, "title": "Sheet1" } },
                { "properties": { "sheetId": 11, "title": "rust_0701_0930" } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_header_format(&server, "pinned", 11, 200).await;

    let sink = RemoteSheetSink::new(&config(&server, Some("pinned"))).unwrap();
    let report = sink.write(&batch()).await.unwrap();
    assert!(report.warnings.is_empty());
}

#[tokio::test]
async fn header_format_failure_is_only_a_warning() {
    let server = MockServer::start().await;
    mount_worksheet_and_values(&server, "pinned").await;
    mount_header_format(&server, "pinned", 7, 500).await;

    let sink = RemoteSheetSink::new(&config(&server, Some("pinned"))).unwrap();
    let report = sink.write(&batch()).await.unwrap();

    assert_eq!(report.rows, 2);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("header row"));
}

#[tokio::test]
async fn sharing_failure_is_only_a_warning() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v4/spreadsheets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "spreadsheetId": "s1" })))
        .mount(&server)
        .await;
    mount_worksheet_and_values(&server, "s1").await;
    mount_header_format(&server, "s1", 7, 200).await;
    Mock::given(method("POST"))
        .and(path("/drive/v3/files/s1/permissions"))
        .respond_with(ResponseTemplate::new(403).set_body_string("insufficient scope"))
        .mount(&server)
        .await;

    let sink = RemoteSheetSink::new(&config(&server, None)).unwrap();
    let report = sink.write(&batch()).await.unwrap();

    assert_eq!(report.new_destination_id.as_deref(), Some("s1"));
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("ops@example.com"));
}

#[tokio::test]
async fn api_failure_is_a_sink_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v4/spreadsheets/pinned:batchUpdate"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
        .mount(&server)
        .await;

    let sink = RemoteSheetSink::new(&config(&server, Some("pinned"))).unwrap();
    match sink.write(&batch()).await {
        Err(SinkError::Api { status, .. }) => assert_eq!(status, 401),
        other => panic!("unexpected result: {other:?}"),
    }
}
