//! Turns the embedded page state of a note page into a [`Record`].
//!
//! The page state is loosely typed: fields come and go between site
//! releases, counts are sometimes strings, and the note itself may sit either
//! at the root or under `note.noteDetailMap.<id>.note`. Everything except the
//! id and title is optional and defaults quietly.

use chrono::{DateTime, Utc};
use serde_json::Value;
use url::Url;

use crate::errors::ExtractionError;
use crate::models::{Author, CandidateStub, Metrics, Record, RecordKind};
use crate::utils::{
    extract_hashtags, is_avatar_url, normalize_image_url, parse_count, parse_epoch,
    parse_publish_time,
};

static NULL: Value = Value::Null;

/// Read-only view over one node of the payload tree. Accessors never fail;
/// absent or mistyped values come back as their empty default.
#[derive(Debug, Clone, Copy)]
pub struct PayloadNode<'a>(&'a Value);

impl<'a> PayloadNode<'a> {
    pub fn new(value: &'a Value) -> Self {
        PayloadNode(value)
    }

    pub fn get(&self, key: &str) -> PayloadNode<'a> {
        PayloadNode(self.0.get(key).unwrap_or(&NULL))
    }

    pub fn is_object(&self) -> bool {
        self.0.is_object()
    }

    /// String form of scalars; numbers are rendered, everything else is empty.
    pub fn text(&self) -> String {
        match self.0 {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        }
    }

    /// First non-blank text among several keys.
    pub fn first_text(&self, keys: &[&str]) -> String {
        keys.iter()
            .map(|key| self.get(key).text())
            .find(|text| !text.is_empty())
            .unwrap_or_default()
    }

    pub fn count(&self) -> u64 {
        match self.0 {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
                .unwrap_or(0),
            Value::String(s) => parse_count(s),
            _ => 0,
        }
    }

    pub fn items(&self) -> Vec<PayloadNode<'a>> {
        match self.0 {
            Value::Array(items) => items.iter().map(PayloadNode).collect(),
            _ => Vec::new(),
        }
    }

    fn raw(&self) -> &'a Value {
        self.0
    }
}

/// Stateless apart from the reference time used for relative timestamps and
/// the site origin used to build links.
#[derive(Debug, Clone)]
pub struct RecordExtractor {
    base_url: Url,
    reference_time: DateTime<Utc>,
}

impl RecordExtractor {
    pub fn new(base_url: Url, reference_time: DateTime<Utc>) -> Self {
        Self {
            base_url,
            reference_time,
        }
    }

    pub fn extract(&self, payload: &Value, stub: &CandidateStub) -> Result<Record, ExtractionError> {
        let note = locate_note(PayloadNode::new(payload), &stub.id)?;

        let id = note.first_text(&["noteId", "id"]);
        if id.is_empty() {
            return Err(ExtractionError::MissingField("id"));
        }
        let title = note.first_text(&["title", "displayTitle"]);
        if title.is_empty() {
            return Err(ExtractionError::MissingField("title"));
        }

        let discriminator = note.get("type").text();
        let kind = RecordKind::from_discriminator(&discriminator);
        if !discriminator.is_empty() && kind == RecordKind::Plain && discriminator != "normal" {
            log::debug!("Note {id}: unknown type '{discriminator}', treating as plain");
        }

        let user = note.get("user");
        let author = Author {
            name: user.first_text(&["nickname", "nickName", "name"]),
            author_id: user.first_text(&["userId", "uid"]),
        };

        let interact = note.get("interactInfo");
        let metrics = Metrics {
            likes: interact.get("likedCount").count(),
            comments: interact.get("commentCount").count(),
            collects: interact.get("collectedCount").count(),
            shares: interact.get("shareCount").count(),
        };

        let body = note.get("desc").text();
        let tags = collect_tags(note.get("tagList"), &body);

        Ok(Record {
            link: self.note_link(&id, stub.token.as_deref()),
            author_link: self.author_link(&author.author_id),
            published_at: self.published_at(note.get("time")),
            image_urls: collect_image_urls(note.get("imageList")),
            id,
            kind,
            title,
            body,
            author,
            metrics,
            tags,
        })
    }

    fn note_link(&self, id: &str, token: Option<&str>) -> String {
        let mut link = self.base_url.clone();
        link.set_path(&format!("/explore/{id}"));
        link.set_query(None);
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            link.query_pairs_mut()
                .append_pair("xsec_token", token)
                .append_pair("xsec_source", "pc_search");
        }
        link.to_string()
    }

    fn author_link(&self, author_id: &str) -> String {
        if author_id.is_empty() {
            return String::new();
        }
        let mut link = self.base_url.clone();
        link.set_path(&format!("/user/profile/{author_id}"));
        link.set_query(None);
        link.to_string()
    }

    fn published_at(&self, time: PayloadNode<'_>) -> Option<DateTime<Utc>> {
        match time.raw() {
            Value::Number(n) => n.as_f64().and_then(parse_epoch),
            Value::String(s) => parse_publish_time(s, self.reference_time),
            _ => None,
        }
    }
}

/// Find the note object inside a full page state, or accept the node itself.
/// Detail maps are keyed by note id; the stub's id wins over map order.
fn locate_note<'a>(root: PayloadNode<'a>, note_id: &str) -> Result<PayloadNode<'a>, ExtractionError> {
    if !root.is_object() {
        return Err(ExtractionError::Malformed("payload is not an object".to_string()));
    }

    let state_note = root.get("note");
    for map_key in ["noteDetailMap", "noteDetail"] {
        if let Value::Object(entries) = state_note.get(map_key).raw() {
            let entry = entries
                .get(note_id)
                .or_else(|| entries.values().next())
                .map(PayloadNode::new)
                .ok_or_else(|| ExtractionError::Malformed(format!("empty {map_key}")))?;
            let inner = entry.get("note");
            return Ok(if inner.is_object() { inner } else { entry });
        }
    }

    // Either the note itself or `{ "note": { ...note fields... } }`.
    if state_note.is_object() && root.get("noteId").text().is_empty() {
        return Ok(state_note);
    }
    Ok(root)
}

fn collect_image_urls(list: PayloadNode<'_>) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for image in list.items() {
        let mut url = image.text();
        if url.is_empty() {
            url = image.first_text(&["urlDefault", "urlPre", "url"]);
        }
        if url.is_empty() {
            url = image
                .get("infoList")
                .items()
                .first()
                .map(|info| info.get("url").text())
                .unwrap_or_default();
        }
        if url.is_empty() {
            continue;
        }

        let url = normalize_image_url(&url);
        if !is_avatar_url(&url) && !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

fn collect_tags(list: PayloadNode<'_>, body: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let listed = list.items().into_iter().map(|tag| {
        let plain = tag.text();
        if plain.is_empty() {
            tag.get("name").text()
        } else {
            plain
        }
    });

    for tag in listed.chain(extract_hashtags(body)) {
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}
