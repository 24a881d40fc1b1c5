//! Core data models used throughout the question-answering pipeline.
//!
//! These types represent the users, chunks, candidates, and context windows
//! that flow from ingestion through retrieval to answer synthesis.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A configured mailbox owner. Each user has one embedding index and one
/// logical partition of the full-text store (selected by `mailbox`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub mailbox: String,
}

/// A contiguous span of one source document's text.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    /// Stable document key; the message ID when the loader found one.
    /// Candidate references from the full-text stage are matched against it.
    pub source: String,
    /// Path of the originating file, relative to the user's source directory.
    pub path: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

impl DocumentChunk {
    pub fn word_count(&self) -> usize {
        word_count(&self.text)
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Identifier of one full email document selected by the full-text stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CandidateReference(pub String);

impl CandidateReference {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CandidateReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, deduplicated, word-bounded chunks handed to answer synthesis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextWindow {
    pub chunks: Vec<DocumentChunk>,
}

impl ContextWindow {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn word_count(&self) -> usize {
        self.chunks.iter().map(|c| c.word_count()).sum()
    }

    /// Chunk texts joined the way they are rendered into the answer prompt.
    pub fn render(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Distinct originating file paths, in context order.
    pub fn sources(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.chunks
            .iter()
            .filter(|c| seen.insert(c.path.as_str()))
            .map(|c| c.path.clone())
            .collect()
    }
}

/// Inclusive timestamp range; a missing bound is unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Build a range from optional `YYYY-MM-DD` dates. `since` starts at
    /// midnight, `until` covers the whole day.
    pub fn from_dates(since: Option<&str>, until: Option<&str>) -> anyhow::Result<Self> {
        let start = since
            .map(|s| -> anyhow::Result<DateTime<Utc>> {
                let d = NaiveDate::parse_from_str(s, "%Y-%m-%d")?;
                Ok(d.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
            })
            .transpose()?;
        let end = until
            .map(|s| -> anyhow::Result<DateTime<Utc>> {
                let d = NaiveDate::parse_from_str(s, "%Y-%m-%d")?;
                Ok(d.and_hms_opt(23, 59, 59).unwrap_or_default().and_utc())
            })
            .transpose()?;
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                anyhow::bail!("time range start {} is after end {}", s, e);
            }
        }
        Ok(Self { start, end })
    }
}

/// One question/answer turn of a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
}
