use std::fs;
use std::path::Path;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use harvester::config::{OutputFormat, Settings};
use harvester::crawler::run_crawl_with;
use harvester::services::collector::StaticCollector;
use harvester::services::identity_store::{IdentityStore, SqliteIdentityStore};
use harvester::services::pipeline::KeywordOutcome;

fn settings(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.search.keywords = vec!["rust".to_string()];
    settings.filter.kind = None;
    settings.filter.min_likes = 0;
    settings.filter.window.recent_days = None;
    settings.output.formats = vec![OutputFormat::Tabular, OutputFormat::Document];
    settings.output.output_dir = root.join("exports");
    settings.storage.ledger_path = root.join("data").join("crawled.db");
    settings
}

fn collector() -> StaticCollector {
    StaticCollector::new()
        .with_payload("n1", json!({ "noteId": "n1", "title": "one", "interactInfo": { "commentCount": 2 } }))
        .with_payload("n2", json!({ "noteId": "n2", "title": "two", "interactInfo": { "commentCount": 9 } }))
}

fn exported_files(dir: &Path) -> usize {
    fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[tokio::test]
async fn second_crawl_finds_nothing_new_after_ledger_reopen() {
    let root = tempfile::tempdir().unwrap();
    let settings = settings(root.path());
    let cancel = CancellationToken::new();

    let first = run_crawl_with(&settings, Box::new(collector()), &cancel).await.unwrap();
    assert_eq!(first.exit_code(), 0);
    assert_eq!(first.total_exported(), 2);
    assert_eq!(first.reports[0].sinks.len(), 2);
    assert!(first.reports[0].sinks.iter().all(|s| s.is_success()));
    assert_eq!(exported_files(&settings.output.output_dir), 2);

    let ledger = SqliteIdentityStore::open(&settings.storage.ledger_path).unwrap();
    assert!(ledger.has_seen("n1").unwrap());
    assert!(ledger.has_seen("n2").unwrap());
    ledger.close().unwrap();

    let second = run_crawl_with(&settings, Box::new(collector()), &cancel).await.unwrap();
    assert_eq!(second.exit_code(), 0);
    assert_eq!(second.reports[0].outcome, KeywordOutcome::Completed);
    assert_eq!(second.reports[0].stats.deduped_out, 2);
    assert_eq!(second.total_exported(), 0);
}

#[tokio::test]
async fn unopenable_ledger_fails_the_crawl() {
    let root = tempfile::tempdir().unwrap();
    let blocker = root.path().join("not-a-dir");
    fs::write(&blocker, b"x").unwrap();

    let mut settings = settings(root.path());
    settings.storage.ledger_path = blocker.join("crawled.db");

    let result = run_crawl_with(&settings, Box::new(collector()), &CancellationToken::new()).await;
    assert!(result.is_err());
    assert_eq!(exported_files(&settings.output.output_dir), 0);
}
