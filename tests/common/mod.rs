//! Shared fixtures: a mail directory on disk and in-process fakes of the
//! language model, embedding, and full-text backends.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use enron_qa::config::{parse_config, Config};
use enron_qa::embedding::Embedder;
use enron_qa::fulltext::{FullTextBackend, SearchRequest};
use enron_qa::index::IndexRegistry;
use enron_qa::llm::LanguageModel;
use enron_qa::retriever::Backends;
use enron_qa::Result;

pub const KEN_BOARD: &str = "Message-ID: <1.board@enron.com>
Date: Mon, 15 Oct 2001 09:12:00 -0700 (PDT)
From: kenneth.lay@enron.com
To: board@enron.com
Subject: Board meeting

The board meets Tuesday in Houston to review the LJM partnerships.
";

pub const KEN_AUDIT: &str = "Message-ID: <2.audit@enron.com>
Date: Tue, 16 Oct 2001 14:03:00 -0700 (PDT)
From: andrew.fastow@enron.com
To: kenneth.lay@enron.com
Subject: Audit schedule

Andersen starts the quarterly audit on Monday.
";

/// Answer returned by [`FakeLlm`] for answer prompts.
pub const ANSWER: &str = "The board meets on Tuesday in Houston.";

/// Write Ken's two messages under `{root}/mail/Ken/inbox/` as raw maildir
/// files (no extension).
pub fn write_mail(root: &Path) {
    let inbox = root.join("mail/Ken/inbox");
    std::fs::create_dir_all(&inbox).unwrap();
    std::fs::write(inbox.join("1."), KEN_BOARD).unwrap();
    std::fs::write(inbox.join("2."), KEN_AUDIT).unwrap();
}

/// Config with Ken (who has mail) and Pete (who has none).
pub fn config(tmp: &TempDir, extra: &str) -> Config {
    let toml = format!(
        r#"
[index]
persist_dir = "{db}"
source_dir = "{mail}"

{extra}

[[users]]
name = "Ken"
mailbox = "kenneth.lay@enron.com"

[[users]]
name = "Pete"
mailbox = "pete.davis@enron.com"
"#,
        db = tmp.path().join("db").display(),
        mail = tmp.path().join("mail").display(),
        extra = extra,
    );
    parse_config(&toml).unwrap()
}

/// Replies by prompt kind and records every prompt it sees.
#[derive(Default)]
pub struct FakeLlm {
    pub prompts: Mutex<Vec<String>>,
}

impl FakeLlm {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn answer_prompts(&self) -> Vec<String> {
        self.prompts()
            .into_iter()
            .filter(|p| p.ends_with("Helpful Answer:"))
            .collect()
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    fn name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.starts_with("Transform this question into elastic search keywords") {
            Ok("Keywords: board, meeting".to_string())
        } else if prompt.ends_with("Standalone question:") {
            Ok("Where does the board meet on Tuesday?".to_string())
        } else {
            Ok(ANSWER.to_string())
        }
    }
}

/// Bag-of-words vectors hashed into a few buckets.
pub struct HashEmbedder;

pub const HASH_DIMS: usize = 16;

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-embedder"
    }

    fn dims(&self) -> usize {
        HASH_DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; HASH_DIMS];
                for word in text.split_whitespace() {
                    let word = word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
                    if word.is_empty() {
                        continue;
                    }
                    let bucket = word.bytes().map(|b| b as usize).sum::<usize>() % HASH_DIMS;
                    v[bucket] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Returns a fixed list of document identifiers and records each request.
pub struct FakeSearch {
    ids: Vec<String>,
    pub requests: Mutex<Vec<SearchRequest>>,
}

impl FakeSearch {
    pub fn returning(ids: &[&str]) -> Self {
        Self {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SearchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FullTextBackend for FakeSearch {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<String>> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.ids.clone())
    }
}

pub struct Fakes {
    pub llm: Arc<FakeLlm>,
    pub search: Arc<FakeSearch>,
    pub backends: Backends,
}

/// Backends over fresh fakes and a registry expecting [`HashEmbedder`].
pub fn fakes(config: &Config, candidate_ids: &[&str]) -> Fakes {
    let llm = Arc::new(FakeLlm::default());
    let search = Arc::new(FakeSearch::returning(candidate_ids));
    let backends = Backends {
        llm: llm.clone(),
        embedder: Arc::new(HashEmbedder),
        fulltext: search.clone(),
        registry: Arc::new(IndexRegistry::new(
            &config.index.persist_dir,
            Some("hash-embedder".to_string()),
        )),
    };
    Fakes {
        llm,
        search,
        backends,
    }
}
