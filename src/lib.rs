//! # Enron QA
//!
//! Per-mailbox question answering over the Enron email corpus.
//!
//! A question about one user's mail is answered in two retrieval stages
//! followed by answer synthesis:
//!
//! 1. A language model turns the question into search keywords, which an
//!    Elasticsearch query restricted to the user's mailbox (and an optional
//!    date range) turns into a handful of candidate emails.
//! 2. The user's embedding index ranks chunks of those candidates by
//!    similarity to the question and fills a word-bounded context window.
//! 3. The language model answers from that context, keeping per-session
//!    conversation history so follow-ups can be rewritten as standalone
//!    questions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────────┐
//! │  Mail dirs  │──▶│   Ingest     │──▶│ SQLite index   │
//! │ eml/json/.. │   │ Chunk+Embed │   │ (one per user) │
//! └─────────────┘   └─────────────┘   └───────┬────────┘
//!                                             │
//!  question ─▶ keywords ─▶ Elasticsearch ─▶ candidates ─▶ context ─▶ answer
//!                                                              │
//!                                         ┌────────────────────┤
//!                                         ▼                    ▼
//!                                    ┌──────────┐        ┌──────────┐
//!                                    │   CLI    │        │   HTTP   │
//!                                    │  (eqa)   │        │  server  │
//!                                    └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! eqa ingest                          # build every user's index
//! eqa keywords "Who approved the LJM deal?"
//! eqa ask "Who approved the LJM deal?" --user Ken
//! eqa serve                           # POST /get_answer
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`loader`] | Mail directory scanning and document parsing |
//! | [`extract`] | Office/PDF text extraction |
//! | [`chunk`] | Word-window chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Per-user embedding index and registry |
//! | [`ingest`] | Index build / load |
//! | [`llm`] | Language model backends |
//! | [`keywords`] | Question → search keywords |
//! | [`fulltext`] | Elasticsearch candidate search |
//! | [`assemble`] | Context window assembly |
//! | [`retriever`] | Retrieval strategies and pipeline |
//! | [`session`] | Conversation memory |
//! | [`answer`] | Answer synthesis |
//! | [`server`] | HTTP API |

pub mod answer;
pub mod app;
pub mod assemble;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fulltext;
pub mod http;
pub mod index;
pub mod ingest;
pub mod keywords;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod retriever;
pub mod server;
pub mod session;
pub mod users;

pub use error::{Error, Result};
