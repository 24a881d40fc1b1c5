//! Retrieval strategies and the pipeline that fronts them.
//!
//! Every strategy implements [`ContextRetriever`]; which one serves queries
//! is chosen by `retrieval.mode`:
//!
//! | Mode | Strategy | Stages |
//! |------|----------|--------|
//! | `fused` | [`FusedRetriever`] | keywords → full-text candidates → restricted similarity search |
//! | `fulltext` | [`FullTextRetriever`] | keywords → full-text candidates → candidate chunks in document order |
//! | `embedding` | [`EmbeddingRetriever`] | similarity search over the user's whole index |
//!
//! All three share the same word budget and text dedup ([`fill_window`]).
//! Stages run strictly in sequence and nothing is cached between calls.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::assemble::{fill_window, ContextAssembler};
use crate::config::{Config, RetrievalMode};
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::fulltext::{CandidateFinder, FullTextBackend};
use crate::index::IndexRegistry;
use crate::keywords::KeywordExtractor;
use crate::llm::LanguageModel;
use crate::models::{ContextWindow, TimeRange, User};

#[async_trait]
pub trait ContextRetriever: Send + Sync {
    fn mode(&self) -> RetrievalMode;
    async fn retrieve(&self, query: &str, user: &User, range: &TimeRange) -> Result<ContextWindow>;
}

pub struct FusedRetriever {
    keywords: KeywordExtractor,
    finder: CandidateFinder,
    assembler: ContextAssembler,
}

impl FusedRetriever {
    pub fn new(keywords: KeywordExtractor, finder: CandidateFinder, assembler: ContextAssembler) -> Self {
        Self {
            keywords,
            finder,
            assembler,
        }
    }
}

#[async_trait]
impl ContextRetriever for FusedRetriever {
    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Fused
    }

    async fn retrieve(&self, query: &str, user: &User, range: &TimeRange) -> Result<ContextWindow> {
        self.assembler.check_index(&user.name).await?;
        let keywords = self.keywords.extract(query).await?;
        let candidates = self.finder.find(user, &keywords, range).await?;
        self.assembler.assemble(&user.name, query, &candidates).await
    }
}

/// Candidate documents' chunks, candidate by candidate, without any
/// embedding lookup.
pub struct FullTextRetriever {
    keywords: KeywordExtractor,
    finder: CandidateFinder,
    registry: Arc<IndexRegistry>,
    max_context_len: usize,
}

impl FullTextRetriever {
    pub fn new(
        keywords: KeywordExtractor,
        finder: CandidateFinder,
        registry: Arc<IndexRegistry>,
        max_context_len: usize,
    ) -> Self {
        Self {
            keywords,
            finder,
            registry,
            max_context_len,
        }
    }
}

#[async_trait]
impl ContextRetriever for FullTextRetriever {
    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Fulltext
    }

    async fn retrieve(&self, query: &str, user: &User, range: &TimeRange) -> Result<ContextWindow> {
        let index = self.registry.get(&user.name).await?;
        let keywords = self.keywords.extract(query).await?;
        let candidates = self.finder.find(user, &keywords, range).await?;

        let ordered = candidates
            .iter()
            .flat_map(|c| index.chunks_for_source(c.as_str()));
        Ok(fill_window(ordered, self.max_context_len))
    }
}

/// Plain nearest-neighbour retrieval over everything the user owns. The
/// time range is not applied: the index carries no dates.
pub struct EmbeddingRetriever {
    registry: Arc<IndexRegistry>,
    embedder: Arc<dyn Embedder>,
    pool_size: usize,
    max_context_len: usize,
}

impl EmbeddingRetriever {
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
}

#[async_trait]
impl ContextRetriever for EmbeddingRetriever {
    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Embedding
    }

    async fn retrieve(&self, query: &str, user: &User, _range: &TimeRange) -> Result<ContextWindow> {
        let index = self.registry.get(&user.name).await?;
        let query_vec = self.embedder.embed_query(query).await?;
        let hits = index.similarity_search(&query_vec, None, self.pool_size);
        Ok(fill_window(hits.iter().map(|h| h.chunk), self.max_context_len))
    }
}

/// The backends a retriever is assembled from.
#[derive(Clone)]
pub struct Backends {
    pub llm: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn Embedder>,
    pub fulltext: Arc<dyn FullTextBackend>,
    pub registry: Arc<IndexRegistry>,
}

pub fn build_retriever(config: &Config, backends: &Backends) -> Arc<dyn ContextRetriever> {
    let retrieval = &config.retrieval;
    let keywords = || KeywordExtractor::new(Arc::clone(&backends.llm));
    let finder = || CandidateFinder::new(Arc::clone(&backends.fulltext), retrieval.candidate_k);

    match retrieval.mode {
        RetrievalMode::Fused => Arc::new(FusedRetriever::new(
            keywords(),
            finder(),
            ContextAssembler::new(
                Arc::clone(&backends.registry),
                Arc::clone(&backends.embedder),
                retrieval.pool_size,
                retrieval.max_context_len,
            ),
        )),
        RetrievalMode::Fulltext => Arc::new(FullTextRetriever::new(
            keywords(),
            finder(),
            Arc::clone(&backends.registry),
            retrieval.max_context_len,
        )),
        RetrievalMode::Embedding => Arc::new(EmbeddingRetriever::new(
            Arc::clone(&backends.registry),
            Arc::clone(&backends.embedder),
            retrieval.pool_size,
            retrieval.max_context_len,
        )),
    }
}

/// Resolves users and hands queries to the configured strategy.
pub struct RetrievalPipeline {
    users: HashMap<String, User>,
    retriever: Arc<dyn ContextRetriever>,
}

impl RetrievalPipeline {
    pub fn new(users: &[User], retriever: Arc<dyn ContextRetriever>) -> Self {
        Self {
            users: users.iter().map(|u| (u.name.clone(), u.clone())).collect(),
            retriever,
        }
    }

    pub fn from_config(config: &Config, backends: &Backends) -> Self {
        Self::new(&config.users, build_retriever(config, backends))
    }

    pub fn user(&self, name: &str) -> Result<&User> {
        self.users
            .get(name)
            .ok_or_else(|| Error::UnknownUser(name.to_string()))
    }

    pub fn mode(&self) -> RetrievalMode {
        self.retriever.mode()
    }

    pub async fn retrieve(&self, query: &str, user: &str, range: &TimeRange) -> Result<ContextWindow> {
        let user = self.user(user)?;
        let window = self.retriever.retrieve(query, user, range).await?;
        tracing::info!(
            user = %user.name,
            mode = ?self.retriever.mode(),
            chunks = window.len(),
            words = window.word_count(),
            "retrieved context"
        );
        Ok(window)
    }
}
