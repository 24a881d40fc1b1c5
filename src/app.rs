//! Wiring: configuration → backends → retrieval pipeline → QA service.
//!
//! Both the CLI and the HTTP server build their components here, so every
//! entry point talks to the same backends in the same way.

use anyhow::Result;
use std::sync::Arc;

use crate::answer::QaService;
use crate::config::{Config, RetrievalMode};
use crate::embedding::{create_embedder, Embedder};
use crate::fulltext::ElasticsearchBackend;
use crate::index::IndexRegistry;
use crate::llm::create_language_model;
use crate::retriever::{Backends, RetrievalPipeline};
use crate::session::SessionStore;

pub struct App {
    pub config: Arc<Config>,
    pub backends: Backends,
    pub pipeline: Arc<RetrievalPipeline>,
    pub sessions: Arc<SessionStore>,
    pub qa: Arc<QaService>,
}

impl App {
    /// Build every backend named by the configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let backends = Backends {
            llm: create_language_model(&config.llm)?,
            fulltext: Arc::new(ElasticsearchBackend::new(&config.fulltext)?),
            registry: Arc::new(registry_for(config, embedder.as_ref())),
            embedder,
        };
        Ok(Self::with_backends(config, backends))
    }

    /// Assemble the service layer over already-built backends.
    pub fn with_backends(config: &Config, backends: Backends) -> Self {
        let config = Arc::new(config.clone());
        let pipeline = Arc::new(RetrievalPipeline::from_config(&config, &backends));
        let sessions = Arc::new(SessionStore::new());
        let qa = Arc::new(QaService::new(
            Arc::clone(&pipeline),
            Arc::clone(&backends.llm),
            Arc::clone(&sessions),
            config.answer.clone(),
        ));

        tracing::debug!(
            mode = ?pipeline.mode(),
            llm = backends.llm.name(),
            embedder = backends.embedder.model_name(),
            "components ready"
        );

        Self {
            config,
            backends,
            pipeline,
            sessions,
            qa,
        }
    }
}

/// Index registry for this configuration. Modes that embed the query refuse
/// indexes built with a different model.
pub fn registry_for(config: &Config, embedder: &dyn Embedder) -> IndexRegistry {
    let expected = match config.retrieval.mode {
        RetrievalMode::Fulltext => None,
        RetrievalMode::Fused | RetrievalMode::Embedding => Some(embedder.model_name().to_string()),
    };
    IndexRegistry::new(&config.index.persist_dir, expected)
}
