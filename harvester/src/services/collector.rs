//! Boundary to the external session driver that owns the logged-in browser.
//!
//! The driver is a separate service; this crate only asks it for search
//! result cards and for the embedded page state behind each card.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{CollectorConfig, SortMode};
use crate::errors::CollectorError;
use crate::models::CandidateStub;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub keyword: String,
    pub sort: SortMode,
    pub paging_effort: u32,
    pub max_results: usize,
}

/// Source of candidate stubs and their raw payloads for one keyword at a time.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Start a new search. Any stubs left over from the previous one are dropped.
    async fn begin_search(&mut self, query: &SearchQuery) -> Result<(), CollectorError>;

    /// Next stub in arrival order, `None` once the search is exhausted.
    async fn next_stub(&mut self) -> Result<Option<CandidateStub>, CollectorError>;

    async fn fetch_payload(&mut self, stub: &CandidateStub) -> Result<Value, CollectorError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    keyword: &'a str,
    sort: &'static str,
    paging_effort: u32,
    max_results: usize,
    base_url: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    stubs: Vec<CandidateStub>,
    #[serde(default)]
    links: Vec<String>,
}

/// JSON-over-HTTP client for the session driver.
pub struct HttpCollector {
    client: reqwest::Client,
    endpoint: String,
    site_url: String,
    pending: VecDeque<CandidateStub>,
}

impl HttpCollector {
    pub fn new(config: &CollectorConfig, site_url: &str) -> Result<Self, CollectorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| CollectorError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            site_url: site_url.to_string(),
            pending: VecDeque::new(),
        })
    }

    /// Open the site in the driver and give the operator `wait` to scan the
    /// login QR code.
    pub async fn login(&self, wait: Duration) -> Result<(), CollectorError> {
        info!("Requesting interactive login, waiting up to {}s", wait.as_secs());
        let body = json!({ "url": self.site_url, "waitSecs": wait.as_secs() });
        self.post("/session/login", &body, Some(wait)).await?;
        info!("Login session is ready");
        Ok(())
    }

    /// Ask the driver to close its browser session.
    pub async fn shutdown(&self) -> Result<(), CollectorError> {
        self.post("/session/close", &json!({}), None).await?;
        info!("Collector session closed");
        Ok(())
    }

    async fn post(
        &self,
        path: &str,
        body: &Value,
        extra_wait: Option<Duration>,
    ) -> Result<reqwest::Response, CollectorError> {
        let mut request = self.client.post(format!("{}{path}", self.endpoint)).json(body);
        if let Some(wait) = extra_wait {
            request = request.timeout(wait + Duration::from_secs(30));
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(CollectorError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn begin_search(&mut self, query: &SearchQuery) -> Result<(), CollectorError> {
        self.pending.clear();

        let request = SearchRequest {
            keyword: &query.keyword,
            sort: query.sort.upstream_value(),
            paging_effort: query.paging_effort,
            max_results: query.max_results,
            base_url: &self.site_url,
        };
        let body = serde_json::to_value(&request).map_err(|e| CollectorError::Decode(e.to_string()))?;
        let response: SearchResponse = self.post("/search", &body, None).await?.json().await?;

        let from_links = response
            .links
            .iter()
            .filter_map(|link| CandidateStub::from_link(link, &self.site_url));

        for stub in response.stubs.into_iter().chain(from_links) {
            if stub.id.is_empty() || self.pending.iter().any(|s| s.id == stub.id) {
                continue;
            }
            self.pending.push_back(stub);
        }
        self.pending.truncate(query.max_results);

        info!(
            "Search '{}' ({}) returned {} candidates",
            query.keyword,
            request.sort,
            self.pending.len()
        );
        Ok(())
    }

    async fn next_stub(&mut self) -> Result<Option<CandidateStub>, CollectorError> {
        Ok(self.pending.pop_front())
    }

    async fn fetch_payload(&mut self, stub: &CandidateStub) -> Result<Value, CollectorError> {
        debug!("Fetching page state for note {}", stub.id);
        let body = json!({ "id": stub.id, "link": stub.link, "token": stub.token });
        let payload: Value = self.post("/payload", &body, None).await?.json().await?;
        Ok(payload)
    }
}

/// Replays canned stubs and payloads. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct StaticCollector {
    entries: Vec<(CandidateStub, Result<Value, String>)>,
    unreachable_for: Vec<String>,
    pending: VecDeque<usize>,
}

impl StaticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(mut self, id: &str, payload: Value) -> Self {
        self.entries.push((stub_for(id), Ok(payload)));
        self
    }

    /// A stub whose payload fetch fails with an API error.
    pub fn with_broken_payload(mut self, id: &str, message: &str) -> Self {
        self.entries.push((stub_for(id), Err(message.to_string())));
        self
    }

    /// Searches for `keyword` fail as if the driver were down.
    pub fn with_unreachable_search(mut self, keyword: &str) -> Self {
        self.unreachable_for.push(keyword.to_string());
        self
    }
}

fn stub_for(id: &str) -> CandidateStub {
    CandidateStub {
        id: id.to_string(),
        link: format!("https://www.xiaohongshu.com/explore/{id}"),
        token: Some(format!("token-{id}")),
        ..CandidateStub::default()
    }
}

#[async_trait]
impl Collector for StaticCollector {
    async fn begin_search(&mut self, query: &SearchQuery) -> Result<(), CollectorError> {
        self.pending.clear();
        if self.unreachable_for.contains(&query.keyword) {
            return Err(CollectorError::Unreachable(format!(
                "no session for '{}'",
                query.keyword
            )));
        }
        self.pending = (0..self.entries.len()).take(query.max_results).collect();
        Ok(())
    }

    async fn next_stub(&mut self) -> Result<Option<CandidateStub>, CollectorError> {
        Ok(self.pending.pop_front().map(|i| self.entries[i].0.clone()))
    }

    async fn fetch_payload(&mut self, stub: &CandidateStub) -> Result<Value, CollectorError> {
        let (_, payload) = self
            .entries
            .iter()
            .find(|(s, _)| s.id == stub.id)
            .ok_or_else(|| CollectorError::Api {
                status: 404,
                message: format!("unknown note {}", stub.id),
            })?;
        payload.clone().map_err(|message| CollectorError::Api {
            status: 500,
            message,
        })
    }
}
