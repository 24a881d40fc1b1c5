use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::loader::DocumentFormat;
use crate::models::User;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub fulltext: FullTextConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub users: Vec<User>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Root under which each user's index lives at `{persist_dir}/{user}/`.
    pub persist_dir: PathBuf,
    /// Root under which each user's mail lives at `{source_dir}/{user}/`.
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    #[serde(default = "default_formats")]
    pub formats: Vec<DocumentFormat>,
    /// Format assumed for files without an extension (raw maildir messages
    /// are named `1.`, `2.`, ...).
    #[serde(default = "default_extensionless_format")]
    pub extensionless_format: Option<DocumentFormat>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("source_documents")
}
fn default_formats() -> Vec<DocumentFormat> {
    DocumentFormat::ALL.to_vec()
}
fn default_extensionless_format() -> Option<DocumentFormat> {
    Some(DocumentFormat::Eml)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size, in words.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Words repeated from the end of the previous chunk.
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    2000
}
fn default_chunk_overlap() -> usize {
    100
}

/// Which retriever variant serves queries.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Full-text candidates, then similarity search restricted to them.
    #[default]
    Fused,
    /// Full-text candidates only, chunks taken in document order.
    Fulltext,
    /// Similarity search over the user's whole index.
    Embedding,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub mode: RetrievalMode,
    /// Maximum candidate documents taken from the full-text stage.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    /// Nearest chunks fetched per candidate document.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Word budget of the assembled context window.
    #[serde(default = "default_max_context_len")]
    pub max_context_len: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::default(),
            candidate_k: default_candidate_k(),
            pool_size: default_pool_size(),
            max_context_len: default_max_context_len(),
        }
    }
}

fn default_candidate_k() -> usize {
    5
}
fn default_pool_size() -> usize {
    100
}
fn default_max_context_len() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: 0,
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `tgi` (text-generation-inference) or `openai`.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_top_p")]
    pub typical_p: f64,
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            url: default_llm_url(),
            model: None,
            max_new_tokens: default_max_new_tokens(),
            temperature: default_temperature(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            typical_p: default_top_p(),
            repetition_penalty: default_repetition_penalty(),
            max_retries: 0,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "tgi".to_string()
}
fn default_llm_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_max_new_tokens() -> u32 {
    512
}
fn default_temperature() -> f64 {
    0.001
}
fn default_top_k() -> u32 {
    10
}
fn default_top_p() -> f64 {
    0.95
}
fn default_repetition_penalty() -> f64 {
    1.03
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct FullTextConfig {
    #[serde(default = "default_es_url")]
    pub url: String,
    #[serde(default = "default_es_index")]
    pub index: String,
    #[serde(default = "default_es_username")]
    pub username: String,
    /// Environment variable holding the password.
    #[serde(default = "default_es_password_env")]
    pub password_env: String,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_content_field")]
    pub content_field: String,
    #[serde(default = "default_participant_fields")]
    pub participant_fields: Vec<String>,
    #[serde(default = "default_date_field")]
    pub date_field: String,
    /// `_source` field holding the message ID; the hit `_id` is used when unset.
    #[serde(default)]
    pub id_field: Option<String>,
    #[serde(default)]
    pub min_score: Option<f64>,
    #[serde(default = "default_es_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FullTextConfig {
    fn default() -> Self {
        Self {
            url: default_es_url(),
            index: default_es_index(),
            username: default_es_username(),
            password_env: default_es_password_env(),
            accept_invalid_certs: false,
            content_field: default_content_field(),
            participant_fields: default_participant_fields(),
            date_field: default_date_field(),
            id_field: None,
            min_score: None,
            timeout_secs: default_es_timeout_secs(),
        }
    }
}

impl FullTextConfig {
    pub fn password(&self) -> Option<String> {
        std::env::var(&self.password_env).ok()
    }
}

fn default_es_url() -> String {
    "https://localhost:9200".to_string()
}
fn default_es_index() -> String {
    "enron".to_string()
}
fn default_es_username() -> String {
    "elastic".to_string()
}
fn default_es_password_env() -> String {
    "ES_PASSWORD".to_string()
}
fn default_content_field() -> String {
    "parts.content".to_string()
}
fn default_participant_fields() -> Vec<String> {
    ["From", "To", "X-cc", "X-bcc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_date_field() -> String {
    "Date".to_string()
}
fn default_es_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptStyle {
    /// "Use the following pieces of context ... Helpful Answer:"
    #[default]
    Default,
    /// "System: ... Human: {question}"
    SystemHuman,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    #[serde(default)]
    pub prompt_style: PromptStyle,
    /// Rewrite follow-up questions into standalone ones using the session history.
    #[serde(default = "default_condense_question")]
    pub condense_question: bool,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            prompt_style: PromptStyle::default(),
            condense_question: default_condense_question(),
        }
    }
}

fn default_condense_question() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8888".to_string()
}

impl Config {
    /// Look up a configured user by name.
    pub fn user(&self, name: &str) -> Result<&User, Error> {
        self.users
            .iter()
            .find(|u| u.name == name)
            .ok_or_else(|| Error::UnknownUser(name.to_string()))
    }

    pub fn user_index_dir(&self, user: &str) -> PathBuf {
        self.index.persist_dir.join(user)
    }

    pub fn user_source_dir(&self, user: &str) -> PathBuf {
        self.index.source_dir.join(user)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;

    if config.fulltext.password().is_none() {
        tracing::warn!(
            env = %config.fulltext.password_env,
            "Elasticsearch password variable not set; connecting without credentials"
        );
    }

    Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }

    // Retrieval
    if config.retrieval.candidate_k < 1 {
        bail!("retrieval.candidate_k must be >= 1");
    }
    if config.retrieval.pool_size < 1 {
        bail!("retrieval.pool_size must be >= 1");
    }
    if config.retrieval.max_context_len < 1 {
        bail!("retrieval.max_context_len must be >= 1");
    }

    // Users
    if config.users.is_empty() {
        bail!("at least one [[users]] entry is required");
    }
    let mut names = HashSet::new();
    for user in &config.users {
        if user.name.trim().is_empty() || user.mailbox.trim().is_empty() {
            bail!("users entries need a non-empty name and mailbox");
        }
        if !names.insert(user.name.as_str()) {
            bail!("duplicate user name: '{}'", user.name);
        }
    }

    if config.index.formats.is_empty() {
        bail!("index.formats must list at least one document format");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, openai, or ollama.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Language model
    match config.llm.provider.as_str() {
        "tgi" => {}
        "openai" => {
            if config.llm.model.is_none() {
                bail!("llm.model must be specified when provider is 'openai'");
            }
        }
        other => bail!("Unknown llm provider: '{}'. Must be tgi or openai.", other),
    }

    if config.fulltext.participant_fields.is_empty() {
        bail!("fulltext.participant_fields must not be empty");
    }

    Ok(())
}
