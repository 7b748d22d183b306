use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Upstream discriminator values for a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Image/text note ("normal" upstream).
    #[default]
    #[serde(alias = "normal")]
    Plain,
    Video,
}

impl RecordKind {
    /// Lenient mapping: anything other than `video` is a plain note.
    pub fn from_discriminator(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("video") {
            RecordKind::Video
        } else {
            RecordKind::Plain
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Plain => "normal",
            RecordKind::Video => "video",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub author_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub likes: u64,
    pub comments: u64,
    pub collects: u64,
    pub shares: u64,
}

/// One harvested note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub kind: RecordKind,
    pub title: String,
    pub body: String,
    pub author: Author,
    pub metrics: Metrics,
    pub published_at: Option<DateTime<Utc>>,
    pub link: String,
    pub author_link: String,
    pub image_urls: Vec<String>,
    pub tags: Vec<String>,
}

/// A search-result card handed out by the collector. The token is the
/// per-session `xsec_token` the site requires to open the note page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateStub {
    pub id: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
}

impl CandidateStub {
    /// Builds a stub from a card href such as
    /// `/search_result/65a1b2?xsec_token=AB...` or an absolute `/explore/` link.
    pub fn from_link(link: &str, base_url: &str) -> Option<Self> {
        let base = Url::parse(base_url).ok()?;
        let parsed = base.join(link.trim()).ok()?;

        let mut segments = parsed.path_segments()?;
        let section = segments.next()?;
        if section != "explore" && section != "search_result" {
            return None;
        }
        let id = segments.next().filter(|s| !s.is_empty())?.to_string();

        let token = parsed
            .query_pairs()
            .find(|(key, _)| key == "xsec_token")
            .map(|(_, value)| value.to_string())
            .filter(|t| !t.is_empty());

        let mut canonical = parsed.clone();
        canonical.set_path(&format!("/explore/{id}"));

        Some(CandidateStub {
            id,
            link: canonical.to_string(),
            token,
            title: String::new(),
            author: String::new(),
        })
    }
}

/// Ledger row: created once per id, never rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenEntry {
    pub id: String,
    pub first_seen_at: DateTime<Utc>,
}

/// Final, sorted output of one keyword run. Sinks only ever borrow it.
#[derive(Debug, Clone)]
pub struct ExportBatch {
    pub keyword: String,
    pub created_at: DateTime<Utc>,
    records: Vec<Record>,
}

impl ExportBatch {
    /// Sorts by comment count, most discussed first. `sort_by` is stable, so
    /// equal counts keep their arrival order.
    pub fn new(keyword: impl Into<String>, mut records: Vec<Record>, created_at: DateTime<Utc>) -> Self {
        records.sort_by(|a, b| b.metrics.comments.cmp(&a.metrics.comments));
        Self {
            keyword: keyword.into(),
            created_at,
            records,
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn rows(&self) -> Vec<ExportRow> {
        self.records.iter().map(ExportRow::from).collect()
    }
}

pub const LIST_DELIMITER: &str = ", ";
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Flat export shape shared by every sink. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    #[serde(rename = "Note ID")]
    pub id: String,
    #[serde(rename = "Note Type")]
    pub kind: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Content")]
    pub body: String,
    #[serde(rename = "Author")]
    pub author_name: String,
    #[serde(rename = "Author ID")]
    pub author_id: String,
    #[serde(rename = "Likes")]
    pub likes: u64,
    #[serde(rename = "Comments")]
    pub comments: u64,
    #[serde(rename = "Collects")]
    pub collects: u64,
    #[serde(rename = "Shares")]
    pub shares: u64,
    #[serde(rename = "Publish Time")]
    pub published_at: String,
    #[serde(rename = "Note Link")]
    pub link: String,
    #[serde(rename = "Author Link")]
    pub author_link: String,
    #[serde(rename = "Image URLs")]
    pub image_urls: String,
    #[serde(rename = "Tags")]
    pub tags: String,
}

impl ExportRow {
    pub const HEADERS: [&'static str; 15] = [
        "Note ID",
        "Note Type",
        "Title",
        "Content",
        "Author",
        "Author ID",
        "Likes",
        "Comments",
        "Collects",
        "Shares",
        "Publish Time",
        "Note Link",
        "Author Link",
        "Image URLs",
        "Tags",
    ];

    /// Cells as strings, in column order.
    pub fn cells(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.kind.clone(),
            self.title.clone(),
            self.body.clone(),
            self.author_name.clone(),
            self.author_id.clone(),
            self.likes.to_string(),
            self.comments.to_string(),
            self.collects.to_string(),
            self.shares.to_string(),
            self.published_at.clone(),
            self.link.clone(),
            self.author_link.clone(),
            self.image_urls.clone(),
            self.tags.clone(),
        ]
    }
}

impl From<&Record> for ExportRow {
    fn from(record: &Record) -> Self {
        ExportRow {
            id: record.id.clone(),
            kind: record.kind.as_str().to_string(),
            title: record.title.clone(),
            body: record.body.clone(),
            author_name: record.author.name.clone(),
            author_id: record.author.author_id.clone(),
            likes: record.metrics.likes,
            comments: record.metrics.comments,
            collects: record.metrics.collects,
            shares: record.metrics.shares,
            published_at: record
                .published_at
                .map(|t| t.format(TIME_FORMAT).to_string())
                .unwrap_or_default(),
            link: record.link.clone(),
            author_link: record.author_link.clone(),
            image_urls: record.image_urls.join(LIST_DELIMITER),
            tags: record.tags.join(LIST_DELIMITER),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_record(id: &str, likes: u64, comments: u64) -> Record {
    Record {
        id: id.to_string(),
        kind: RecordKind::Plain,
        title: format!("title {id}"),
        body: String::new(),
        author: Author::default(),
        metrics: Metrics {
            likes,
            comments,
            ..Metrics::default()
        },
        published_at: None,
        link: format!("https://www.xiaohongshu.com/explore/{id}"),
        author_link: String::new(),
        image_urls: Vec::new(),
        tags: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_from_search_result_link_rewrites_to_explore() {
        let stub = CandidateStub::from_link(
            "/search_result/65a1b2c3?xsec_token=ABtoken%3D&xsec_source=",
            "https://www.xiaohongshu.com",
        )
        .unwrap();
        assert_eq!(stub.id, "65a1b2c3");
        assert_eq!(stub.token.as_deref(), Some("ABtoken="));
        assert!(stub.link.starts_with("https://www.xiaohongshu.com/explore/65a1b2c3"));
    }

    #[test]
    fn stub_from_unrelated_link_is_rejected() {
        assert!(CandidateStub::from_link("/user/profile/42", "https://www.xiaohongshu.com").is_none());
    }

    #[test]
    fn batch_orders_by_comments_and_keeps_ties_stable() {
        let records = vec![
            sample_record("a", 1, 5),
            sample_record("b", 1, 9),
            sample_record("c", 1, 5),
            sample_record("d", 1, 0),
        ];
        let batch = ExportBatch::new("k", records, Utc::now());
        let ids: Vec<_> = batch.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c", "d"]);
    }

    #[test]
    fn export_row_joins_lists() {
        let mut record = sample_record("x", 3, 4);
        record.tags = vec!["rust".into(), "cli".into()];
        record.image_urls = vec!["https://a/1.jpg".into()];
        let row = ExportRow::from(&record);
        assert_eq!(row.tags, "rust, cli");
        assert_eq!(row.image_urls, "https://a/1.jpg");
        assert_eq!(row.cells().len(), ExportRow::HEADERS.len());
    }
}
