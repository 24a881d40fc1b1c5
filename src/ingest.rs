//! Ingestion: a user's mail directory → a persisted embedding index.
//!
//! Per user: scan → load → chunk → embed (batched) → save. The index is
//! written to `index.sqlite.partial` and renamed into place once complete,
//! so an interrupted build never passes for a finished one. Ingestion is
//! idempotent: an existing index is loaded and reported, not rebuilt,
//! unless `force` is set.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::index::{index_path, EmbeddingIndex, IndexEntry, IndexRegistry};
use crate::loader::{load_document, scan_directory, LoadedDocument};
use crate::models::{DocumentChunk, User};
use crate::progress::{IngestProgressEvent, IngestProgressReporter};

/// Files between two loading progress events.
const LOAD_PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Built { documents: usize, chunks: usize },
    Existing { chunks: usize },
    /// No loadable documents; no index was written.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub user: String,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
    /// Files that were found but could not be loaded.
    pub failed_files: usize,
}

/// Load the user's index from disk, or build and persist it.
pub async fn load_or_build(
    config: &Config,
    user: &User,
    embedder: &dyn Embedder,
    force: bool,
    progress: &dyn IngestProgressReporter,
) -> Result<(IngestReport, Option<EmbeddingIndex>)> {
    let path = index_path(&config.index.persist_dir, &user.name);

    if path.exists() && !force {
        let index = EmbeddingIndex::load(&path)
            .await
            .with_context(|| format!("Failed to load index {}", path.display()))?;
        tracing::info!(user = %user.name, chunks = index.len(), "index exists, skipping build");
        let report = IngestReport {
            user: user.name.clone(),
            outcome: IngestOutcome::Existing {
                chunks: index.len(),
            },
            failed_files: 0,
        };
        return Ok((report, Some(index)));
    }

    let source_dir = config.user_source_dir(&user.name);
    let (documents, failed_files) = load_user_documents(&source_dir, config, &user.name, progress)?;

    let chunks: Vec<DocumentChunk> = documents
        .iter()
        .flat_map(|doc| {
            chunk_text(
                &doc.source,
                &doc.path,
                &doc.text,
                config.chunking.chunk_size,
                config.chunking.overlap,
            )
        })
        .collect();

    if chunks.is_empty() {
        tracing::warn!(
            user = %user.name,
            dir = %source_dir.display(),
            failed_files,
            "no loadable documents, skipping"
        );
        let report = IngestReport {
            user: user.name.clone(),
            outcome: IngestOutcome::Skipped,
            failed_files,
        };
        return Ok((report, None));
    }

    let entries = embed_chunks(chunks, embedder, config.embedding.batch_size, &user.name, progress).await?;
    let dims = entries.first().map(|e| e.vector.len()).unwrap_or(0);
    let chunk_count = entries.len();
    let index = EmbeddingIndex::new(&user.name, embedder.model_name(), dims, entries);

    let partial = path.with_extension("sqlite.partial");
    index.save(&partial).await?;
    std::fs::rename(&partial, &path)
        .with_context(|| format!("Failed to move {} into place", partial.display()))?;

    tracing::info!(
        user = %user.name,
        documents = documents.len(),
        chunks = chunk_count,
        path = %path.display(),
        "index built"
    );
    let report = IngestReport {
        user: user.name.clone(),
        outcome: IngestOutcome::Built {
            documents: documents.len(),
            chunks: chunk_count,
        },
        failed_files,
    };
    Ok((report, Some(index)))
}

fn load_user_documents(
    source_dir: &Path,
    config: &Config,
    user: &str,
    progress: &dyn IngestProgressReporter,
) -> Result<(Vec<LoadedDocument>, usize)> {
    let files = scan_directory(source_dir, &config.index)?;
    let total = files.len() as u64;
    let mut documents = Vec::with_capacity(files.len());
    let mut failed = 0usize;

    for (i, file) in files.iter().enumerate() {
        match load_document(file) {
            Ok(doc) => documents.push(doc),
            Err(e) => {
                tracing::warn!(user, file = %file.relative, error = %e, "failed to load document");
                failed += 1;
            }
        }
        let n = i + 1;
        if n % LOAD_PROGRESS_EVERY == 0 || n == files.len() {
            progress.report(IngestProgressEvent::Loading {
                user: user.to_string(),
                n: n as u64,
                total,
            });
        }
    }

    Ok((documents, failed))
}

async fn embed_chunks(
    chunks: Vec<DocumentChunk>,
    embedder: &dyn Embedder,
    batch_size: usize,
    user: &str,
    progress: &dyn IngestProgressReporter,
) -> Result<Vec<IndexEntry>> {
    let total = chunks.len() as u64;
    let mut entries = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder
            .embed(&texts)
            .await
            .with_context(|| format!("Embedding failed for user '{}'", user))?;

        for (chunk, vector) in batch.iter().zip(vectors) {
            if embedder.dims() != 0 && vector.len() != embedder.dims() {
                bail!(
                    "embedding model '{}' returned {} dims, expected {}",
                    embedder.model_name(),
                    vector.len(),
                    embedder.dims()
                );
            }
            entries.push(IndexEntry {
                chunk: chunk.clone(),
                vector,
            });
        }

        progress.report(IngestProgressEvent::Embedding {
            user: user.to_string(),
            n: entries.len() as u64,
            total,
        });
    }

    Ok(entries)
}

/// Ingest every configured user, or just `only_user`. Users are independent;
/// built or loaded indexes are published to `registry` when one is given.
pub async fn run_ingest(
    config: &Config,
    only_user: Option<&str>,
    force: bool,
    embedder: &dyn Embedder,
    progress: &dyn IngestProgressReporter,
    registry: Option<&IndexRegistry>,
) -> Result<Vec<IngestReport>> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let users: Vec<&User> = match only_user {
        Some(name) => vec![config.user(name)?],
        None => config.users.iter().collect(),
    };

    let mut reports = Vec::with_capacity(users.len());
    for user in users {
        let (report, index) = load_or_build(config, user, embedder, force, progress).await?;
        if let (Some(registry), Some(index)) = (registry, index) {
            registry.insert(Arc::new(index)).await;
        }
        reports.push(report);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as QaResult;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Deterministic 3-d embedding that counts how many texts it saw.
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for Counting {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> QaResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0, 0.0])
                .collect())
        }
    }

    fn setup(tmp: &TempDir) -> Config {
        let toml = format!(
            r#"
[index]
persist_dir = "{db}"
source_dir = "{src}"

[embedding]
batch_size = 2

[[users]]
name = "Ken"
mailbox = "kenneth.lay@enron.com"

[[users]]
name = "Pete"
mailbox = "pete.davis@enron.com"
"#,
            db = tmp.path().join("db").display(),
            src = tmp.path().join("src").display(),
        );
        let config = crate::config::parse_config(&toml).unwrap();

        let inbox = tmp.path().join("src/Ken/inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        for i in 1..=3 {
            std::fs::write(
                inbox.join(format!("{}.", i)),
                format!("Message-ID: <m{}@enron>\nSubject: note {}\n\nBody of message {}\n", i, i, i),
            )
            .unwrap();
        }
        std::fs::write(inbox.join("broken.json"), "{ not json").unwrap();
        config
    }

    #[tokio::test]
    async fn test_build_then_existing() {
        let tmp = TempDir::new().unwrap();
        let config = setup(&tmp);
        let embedder = Counting {
            calls: AtomicUsize::new(0),
        };
        let ken = config.user("Ken").unwrap();

        let (report, index) = load_or_build(&config, ken, &embedder, false, &NoProgress)
            .await
            .unwrap();
        assert_eq!(
            report.outcome,
            IngestOutcome::Built {
                documents: 3,
                chunks: 3
            }
        );
        assert_eq!(report.failed_files, 1);
        let index = index.unwrap();
        assert_eq!(index.model_name(), "counting");
        assert_eq!(index.chunks_for_source("<m2@enron>").len(), 1);
        assert!(index_path(&config.index.persist_dir, "Ken").exists());
        assert!(!index_path(&config.index.persist_dir, "Ken")
            .with_extension("sqlite.partial")
            .exists());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);

        // Second run loads, does not re-embed, and sees the same content
        let (again, loaded) = load_or_build(&config, ken, &embedder, false, &NoProgress)
            .await
            .unwrap();
        assert_eq!(again.outcome, IngestOutcome::Existing { chunks: 3 });
        assert_eq!(loaded.unwrap().entries(), index.entries());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_force_rebuilds() {
        let tmp = TempDir::new().unwrap();
        let config = setup(&tmp);
        let embedder = Counting {
            calls: AtomicUsize::new(0),
        };
        let ken = config.user("Ken").unwrap();
        load_or_build(&config, ken, &embedder, false, &NoProgress).await.unwrap();
        let (report, _) = load_or_build(&config, ken, &embedder, true, &NoProgress).await.unwrap();
        assert!(matches!(report.outcome, IngestOutcome::Built { .. }));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_run_ingest_skips_empty_user_and_publishes() {
        let tmp = TempDir::new().unwrap();
        let config = setup(&tmp);
        let embedder = Counting {
            calls: AtomicUsize::new(0),
        };
        let registry = IndexRegistry::new(&config.index.persist_dir, None);

        let reports = run_ingest(&config, None, false, &embedder, &NoProgress, Some(&registry))
            .await
            .unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].user, "Pete");
        assert_eq!(reports[1].outcome, IngestOutcome::Skipped);
        assert!(!index_path(&config.index.persist_dir, "Pete").exists());

        assert!(registry.is_loaded("Ken").await);
        assert!(matches!(
            registry.get("Pete").await,
            Err(crate::error::Error::IndexNotBuilt(_))
        ));
    }

    #[tokio::test]
    async fn test_run_ingest_unknown_user() {
        let tmp = TempDir::new().unwrap();
        let config = setup(&tmp);
        let embedder = Counting {
            calls: AtomicUsize::new(0),
        };
        let err = run_ingest(&config, Some("Bob"), false, &embedder, &NoProgress, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown user"));
    }

    #[test]
    fn test_report_json_shape() {
        let report = IngestReport {
            user: "Ken".to_string(),
            outcome: IngestOutcome::Built {
                documents: 2,
                chunks: 5,
            },
            failed_files: 0,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "built");
        assert_eq!(json["chunks"], 5);
        assert_eq!(json["user"], "Ken");
    }
}
