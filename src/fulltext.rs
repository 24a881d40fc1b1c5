//! Full-text candidate search.
//!
//! [`CandidateFinder`] turns keywords, a user, and a time range into at most
//! `candidate_k` document identifiers. The query itself is executed by a
//! [`FullTextBackend`]; [`ElasticsearchBackend`] is the production one.
//!
//! # Query shape
//!
//! ```text
//! bool
//! ├── should: match(content_field, keyword) for each keyword
//! ├── minimum_should_match: 1
//! └── filter
//!     ├── bool.should: match(field, mailbox) for From / To / X-cc / X-bcc
//!     └── range(date_field): gte start, lte end   (omitted when unbounded)
//! ```
//!
//! With zero keywords the query is still sent. It then matches nothing,
//! which is an empty candidate list and not an error.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::FullTextConfig;
use crate::error::{Error, Result};
use crate::http::{self, Auth};
use crate::models::{CandidateReference, TimeRange, User};

/// Everything a backend needs to run one candidate search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub mailbox: String,
    pub keywords: Vec<String>,
    pub range: TimeRange,
    pub size: usize,
}

/// Executes candidate searches. Returned identifiers are in relevance
/// order and may contain duplicates.
#[async_trait]
pub trait FullTextBackend: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<String>>;
}

/// Build the Elasticsearch `_search` body for a request.
pub fn build_query(config: &FullTextConfig, request: &SearchRequest) -> serde_json::Value {
    let keyword_clauses: Vec<serde_json::Value> = request
        .keywords
        .iter()
        .map(|k| serde_json::json!({ "match": { config.content_field.as_str(): k } }))
        .collect();

    let participant_clauses: Vec<serde_json::Value> = config
        .participant_fields
        .iter()
        .map(|f| serde_json::json!({ "match": { f.as_str(): request.mailbox } }))
        .collect();

    let mut filter = vec![serde_json::json!({
        "bool": {
            "should": participant_clauses,
            "minimum_should_match": 1,
        }
    })];

    if !request.range.is_unbounded() {
        let mut bounds = serde_json::Map::new();
        if let Some(start) = request.range.start {
            bounds.insert("gte".to_string(), start.to_rfc3339().into());
        }
        if let Some(end) = request.range.end {
            bounds.insert("lte".to_string(), end.to_rfc3339().into());
        }
        filter.push(serde_json::json!({ "range": { config.date_field.as_str(): bounds } }));
    }

    let mut body = serde_json::json!({
        "size": request.size,
        "query": {
            "bool": {
                "should": keyword_clauses,
                "minimum_should_match": 1,
                "filter": filter,
            }
        },
    });

    match &config.id_field {
        Some(field) => body["_source"] = serde_json::json!([field]),
        None => body["_source"] = serde_json::Value::Bool(false),
    }
    if let Some(min_score) = config.min_score {
        body["min_score"] = min_score.into();
    }

    body
}

/// Pull document identifiers out of a `_search` response, in hit order.
pub fn parse_hits(json: &serde_json::Value, id_field: Option<&str>) -> Result<Vec<String>> {
    let hits = json
        .pointer("/hits/hits")
        .and_then(|h| h.as_array())
        .ok_or_else(|| Error::invalid_response("elasticsearch", "missing hits.hits"))?;

    let mut ids = Vec::with_capacity(hits.len());
    for hit in hits {
        let id = match id_field {
            Some(field) => hit.get("_source").and_then(|s| s.get(field)),
            None => hit.get("_id"),
        };
        match id.and_then(|v| v.as_str()) {
            Some(id) => ids.push(id.to_string()),
            None => tracing::debug!(?hit, "hit without usable identifier"),
        }
    }
    Ok(ids)
}

pub struct ElasticsearchBackend {
    config: FullTextConfig,
    password: Option<String>,
    client: reqwest::Client,
}

impl ElasticsearchBackend {
    pub fn new(config: &FullTextConfig) -> anyhow::Result<Self> {
        Ok(Self {
            config: config.clone(),
            password: config.password(),
            client: http::build_client(config.timeout_secs, config.accept_invalid_certs)?,
        })
    }
}

#[async_trait]
impl FullTextBackend for ElasticsearchBackend {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<String>> {
        let body = build_query(&self.config, request);
        let url = format!(
            "{}/{}/_search",
            self.config.url.trim_end_matches('/'),
            self.config.index
        );
        let auth = match &self.password {
            Some(password) => Auth::Basic {
                username: &self.config.username,
                password,
            },
            None => Auth::None,
        };

        let json = http::post_json(&self.client, "elasticsearch", &url, auth, &body, 0).await?;
        parse_hits(&json, self.config.id_field.as_deref())
    }
}

pub struct CandidateFinder {
    backend: Arc<dyn FullTextBackend>,
    k: usize,
}

impl CandidateFinder {
    pub fn new(backend: Arc<dyn FullTextBackend>, k: usize) -> Self {
        Self { backend, k }
    }

    /// At most `k` distinct candidates, first occurrence order.
    pub async fn find(
        &self,
        user: &User,
        keywords: &[String],
        range: &TimeRange,
    ) -> Result<Vec<CandidateReference>> {
        let request = SearchRequest {
            mailbox: user.mailbox.clone(),
            keywords: keywords.to_vec(),
            range: *range,
            size: self.k,
        };
        let ids = self.backend.search(&request).await?;

        let mut seen = HashSet::new();
        let candidates: Vec<CandidateReference> = ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .take(self.k)
            .map(CandidateReference)
            .collect();

        tracing::debug!(user = %user.name, count = candidates.len(), "full-text candidates");
        Ok(candidates)
    }
}
