//! Context assembly: candidate documents → a bounded, deduplicated window.
//!
//! # Algorithm
//!
//! 1. Resolve the user's index ([`Error::IndexNotBuilt`] if there is none).
//! 2. No candidates → empty window.
//! 3. Embed the query and, for every candidate, take its `pool_size`
//!    nearest chunks. The union is ranked by similarity, best first.
//! 4. Walk the ranking, skipping any chunk whose text was already taken.
//! 5. Add chunks while the running word count stays within
//!    `max_context_len`; stop at the first chunk that would exceed it.

use std::collections::HashSet;
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::index::{IndexRegistry, ScoredChunk};
use crate::models::{CandidateReference, ContextWindow, DocumentChunk};

pub struct ContextAssembler {
    registry: Arc<IndexRegistry>,
    embedder: Arc<dyn Embedder>,
    pool_size: usize,
    max_context_len: usize,
}

impl ContextAssembler {
    pub fn new(
        registry: Arc<IndexRegistry>,
        embedder: Arc<dyn Embedder>,
        pool_size: usize,
        max_context_len: usize,
    ) -> Self {
        Self {
            registry,
            embedder,
            pool_size,
            max_context_len,
        }
    }

    /// Resolve the user's index without assembling anything, so a missing
    /// index is reported before any backend is called.
    pub async fn check_index(&self, user: &str) -> Result<()> {
        self.registry.get(user).await.map(|_| ())
    }

    pub async fn assemble(
        &self,
        user: &str,
        query: &str,
        candidates: &[CandidateReference],
    ) -> Result<ContextWindow> {
        let index = self.registry.get(user).await?;
        if candidates.is_empty() {
            return Ok(ContextWindow::empty());
        }

        let query_vec = self.embedder.embed_query(query).await?;
        if index.dims() != 0 && query_vec.len() != index.dims() {
            return Err(Error::invalid_response(
                "embedding",
                format!(
                    "query vector has {} dims, index has {}",
                    query_vec.len(),
                    index.dims()
                ),
            ));
        }

        let mut hits: Vec<ScoredChunk<'_>> = candidates
            .iter()
            .flat_map(|c| index.similarity_search(&query_vec, Some(c.as_str()), self.pool_size))
            .collect();
        // Stable: equal scores keep candidate order
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));

        let window = fill_window(hits.iter().map(|h| h.chunk), self.max_context_len);
        tracing::debug!(
            user,
            candidates = candidates.len(),
            pooled = hits.len(),
            chunks = window.len(),
            words = window.word_count(),
            "assembled context"
        );
        Ok(window)
    }
}

/// Take chunks in the given order, dropping exact-text repeats, until the
/// next one would push the total past `max_words`. The overflowing chunk
/// ends the walk; it is never truncated.
pub fn fill_window<'a>(
    ranked: impl IntoIterator<Item = &'a DocumentChunk>,
    max_words: usize,
) -> ContextWindow {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut total = 0usize;
    let mut chunks = Vec::new();

    for chunk in ranked {
        if !seen.insert(chunk.text.as_str()) {
            continue;
        }
        let words = chunk.word_count();
        if total + words > max_words {
            break;
        }
        total += words;
        chunks.push(chunk.clone());
    }

    ContextWindow { chunks }
}
