//! Per-user embedding index.
//!
//! An [`EmbeddingIndex`] is the full set of (chunk, vector) pairs for one
//! user, held in memory and searched by brute-force cosine similarity. On
//! disk it is a single SQLite file at `{persist_dir}/{user}/index.sqlite`
//! (see [`crate::migrate`] for the tables).
//!
//! Indexes are read-only once built. [`IndexRegistry`] loads each user's
//! index on first use and shares it between requests.

use anyhow::{bail, Context};
use sqlx::Row;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{Error, Result};
use crate::migrate::{self, SCHEMA_VERSION};
use crate::models::DocumentChunk;

pub const INDEX_FILE: &str = "index.sqlite";

pub fn index_path(persist_dir: &Path, user: &str) -> PathBuf {
    persist_dir.join(user).join(INDEX_FILE)
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: DocumentChunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Copy)]
pub struct ScoredChunk<'a> {
    pub chunk: &'a DocumentChunk,
    pub score: f32,
}

#[derive(Debug)]
pub struct EmbeddingIndex {
    user: String,
    model: String,
    dims: usize,
    entries: Vec<IndexEntry>,
    by_source: HashMap<String, Vec<usize>>,
}

impl EmbeddingIndex {
    pub fn new(user: &str, model: &str, dims: usize, entries: Vec<IndexEntry>) -> Self {
        let mut by_source: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            by_source.entry(entry.chunk.source.clone()).or_default().push(i);
        }
        Self {
            user: user.to_string(),
            model: model.to_string(),
            dims,
            entries,
            by_source,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Number of distinct source documents.
    pub fn source_count(&self) -> usize {
        self.by_source.len()
    }

    /// Up to `top_k` chunks nearest to `query`, best first. With
    /// `restrict_to_source` only that document's chunks are considered; an
    /// unknown source yields nothing. Ties keep index order.
    pub fn similarity_search(
        &self,
        query: &[f32],
        restrict_to_source: Option<&str>,
        top_k: usize,
    ) -> Vec<ScoredChunk<'_>> {
        let positions: Vec<usize> = match restrict_to_source {
            Some(source) => self.by_source.get(source).cloned().unwrap_or_default(),
            None => (0..self.entries.len()).collect(),
        };

        let mut scored: Vec<(usize, f32)> = positions
            .into_iter()
            .map(|i| (i, cosine_similarity(query, &self.entries[i].vector)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: &self.entries[i].chunk,
                score,
            })
            .collect()
    }

    /// All chunks of one document in chunk order.
    pub fn chunks_for_source(&self, source: &str) -> Vec<&DocumentChunk> {
        let mut chunks: Vec<&DocumentChunk> = self
            .by_source
            .get(source)
            .map(|ids| ids.iter().map(|&i| &self.entries[i].chunk).collect())
            .unwrap_or_default();
        chunks.sort_by_key(|c| c.chunk_index);
        chunks
    }

    /// Write the index to a fresh SQLite file, replacing anything at `path`.
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to replace {}", path.display()))?;
        }

        let pool = db::connect(path).await?;
        migrate::create_schema(&pool).await?;

        let mut tx = pool.begin().await?;
        let meta = [
            ("user", self.user.clone()),
            ("model", self.model.clone()),
            ("dims", self.dims.to_string()),
            ("chunk_count", self.entries.len().to_string()),
            ("created_at", chrono::Utc::now().to_rfc3339()),
        ];
        for (key, value) in meta {
            sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        for entry in &self.entries {
            let chunk = &entry.chunk;
            let chunk_id = sqlx::query(
                "INSERT INTO chunks (source, path, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.source)
            .bind(&chunk.path)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            sqlx::query("INSERT INTO chunk_vectors (chunk_id, embedding) VALUES (?, ?)")
                .bind(chunk_id)
                .bind(vec_to_blob(&entry.vector))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        pool.close().await;
        Ok(())
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let pool = db::connect_read_only(path).await?;

        let meta: HashMap<String, String> =
            sqlx::query_as::<_, (String, String)>("SELECT key, value FROM index_meta")
                .fetch_all(&pool)
                .await?
                .into_iter()
                .collect();

        let version: i64 = meta
            .get("schema_version")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if version != SCHEMA_VERSION {
            pool.close().await;
            bail!(
                "{} has schema version {}, expected {}; rebuild with `eqa ingest --force`",
                path.display(),
                version,
                SCHEMA_VERSION
            );
        }

        let user = meta.get("user").cloned().unwrap_or_default();
        let model = meta.get("model").cloned().unwrap_or_default();
        let dims = meta.get("dims").and_then(|d| d.parse().ok()).unwrap_or(0);

        let rows = sqlx::query(
            r#"
            SELECT c.source, c.path, c.chunk_index, c.text, c.hash, v.embedding
            FROM chunks c
            JOIN chunk_vectors v ON v.chunk_id = c.id
            ORDER BY c.id
            "#,
        )
        .fetch_all(&pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            entries.push(IndexEntry {
                chunk: DocumentChunk {
                    source: row.get("source"),
                    path: row.get("path"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    hash: row.get("hash"),
                },
                vector: blob_to_vec(&blob),
            });
        }

        pool.close().await;
        Ok(Self::new(&user, &model, dims, entries))
    }
}

/// Lazily loaded, shared per-user indexes.
///
/// The map lock is only held to look up or create a user's slot. Loading
/// happens on the slot itself, so one user's load never blocks another
/// user's queries.
pub struct IndexRegistry {
    persist_dir: PathBuf,
    /// Model the query side embeds with; indexes built with another model
    /// are refused.
    expected_model: Option<String>,
    loaded: RwLock<HashMap<String, Arc<IndexSlot>>>,
}

type IndexSlot = OnceCell<Arc<EmbeddingIndex>>;

impl IndexRegistry {
    pub fn new(persist_dir: impl Into<PathBuf>, expected_model: Option<String>) -> Self {
        Self {
            persist_dir: persist_dir.into(),
            expected_model,
            loaded: RwLock::new(HashMap::new()),
        }
    }

    pub fn path_for(&self, user: &str) -> PathBuf {
        index_path(&self.persist_dir, user)
    }

    /// The user's index, loading it from disk on first access. Fails with
    /// [`Error::IndexNotBuilt`] when no index file exists.
    ///
    /// Concurrent first accesses for the same user share a single load.
    pub async fn get(&self, user: &str) -> Result<Arc<EmbeddingIndex>> {
        if let Some(index) = self.loaded.read().await.get(user).and_then(|slot| slot.get()) {
            return Ok(Arc::clone(index));
        }

        let path = self.path_for(user);
        if !path.exists() {
            return Err(Error::IndexNotBuilt(user.to_string()));
        }

        let slot = self.slot(user).await;
        let index = slot
            .get_or_try_init(|| async {
                let index = EmbeddingIndex::load(&path).await.map_err(|e| Error::Load {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                self.check_model(&index)?;
                tracing::info!(
                    user,
                    chunks = index.len(),
                    model = index.model_name(),
                    "loaded index"
                );
                Ok::<_, Error>(Arc::new(index))
            })
            .await?;
        Ok(Arc::clone(index))
    }

    /// The user's slot, created empty on first use.
    async fn slot(&self, user: &str) -> Arc<IndexSlot> {
        if let Some(slot) = self.loaded.read().await.get(user) {
            return Arc::clone(slot);
        }
        let mut loaded = self.loaded.write().await;
        Arc::clone(loaded.entry(user.to_string()).or_default())
    }

    /// Make a freshly built index visible without reloading it from disk.
    pub async fn insert(&self, index: Arc<EmbeddingIndex>) {
        let user = index.user().to_string();
        self.loaded
            .write()
            .await
            .insert(user, Arc::new(OnceCell::new_with(Some(index))));
    }

    pub async fn is_loaded(&self, user: &str) -> bool {
        self.loaded
            .read()
            .await
            .get(user)
            .is_some_and(|slot| slot.initialized())
    }

    fn check_model(&self, index: &EmbeddingIndex) -> Result<()> {
        match &self.expected_model {
            Some(expected) if expected != index.model_name() => Err(Error::Config(format!(
                "index for '{}' was built with embedding model '{}' but '{}' is configured; \
                 rebuild with `eqa ingest --force`",
                index.user(),
                index.model_name(),
                expected
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::text_hash;
    use tempfile::TempDir;

    fn entry(source: &str, index: i64, text: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: DocumentChunk {
                source: source.to_string(),
                path: format!("{}.eml", source),
                chunk_index: index,
                text: text.to_string(),
                hash: text_hash(text),
            },
            vector,
        }
    }

    fn sample() -> EmbeddingIndex {
        EmbeddingIndex::new(
            "Ken",
            "test-model",
            2,
            vec![
                entry("m1", 0, "gas prices rose", vec![1.0, 0.0]),
                entry("m1", 1, "power trading desk", vec![0.0, 1.0]),
                entry("m2", 0, "board meeting", vec![0.7, 0.7]),
            ],
        )
    }

    #[test]
    fn test_similarity_search_ranks_by_cosine() {
        let index = sample();
        let hits = index.similarity_search(&[1.0, 0.1], None, 10);
        let texts: Vec<_> = hits.iter().map(|h| h.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["gas prices rose", "board meeting", "power trading desk"]);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_similarity_search_restricted_and_bounded() {
        let index = sample();
        let hits = index.similarity_search(&[0.0, 1.0], Some("m1"), 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.text, "power trading desk");
        assert!(index.similarity_search(&[0.0, 1.0], Some("nope"), 10).is_empty());
    }

    #[test]
    fn test_chunks_for_source_in_order() {
        let index = EmbeddingIndex::new(
            "Ken",
            "m",
            1,
            vec![entry("a", 1, "second", vec![1.0]), entry("a", 0, "first", vec![1.0])],
        );
        let texts: Vec<_> = index
            .chunks_for_source("a")
            .iter()
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(index.source_count(), 1);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = index_path(tmp.path(), "Ken");
        let index = sample();
        index.save(&path).await.unwrap();

        let loaded = EmbeddingIndex::load(&path).await.unwrap();
        assert_eq!(loaded.user(), "Ken");
        assert_eq!(loaded.model_name(), "test-model");
        assert_eq!(loaded.dims(), 2);
        assert_eq!(loaded.entries(), index.entries());
    }

    #[tokio::test]
    async fn test_registry_missing_index() {
        let tmp = TempDir::new().unwrap();
        let registry = IndexRegistry::new(tmp.path(), None);
        let err = registry.get("Jeff").await.unwrap_err();
        assert!(matches!(err, Error::IndexNotBuilt(ref u) if u == "Jeff"));
    }

    #[tokio::test]
    async fn test_registry_loads_once_and_checks_model() {
        let tmp = TempDir::new().unwrap();
        sample().save(&index_path(tmp.path(), "Ken")).await.unwrap();

        let registry = IndexRegistry::new(tmp.path(), Some("test-model".to_string()));
        assert!(!registry.is_loaded("Ken").await);
        let first = registry.get("Ken").await.unwrap();
        let second = registry.get("Ken").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = IndexRegistry::new(tmp.path(), Some("other-model".to_string()));
        assert!(matches!(other.get("Ken").await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_registry_load_does_not_block_other_users() {
        let tmp = TempDir::new().unwrap();
        sample().save(&index_path(tmp.path(), "Ken")).await.unwrap();
        let registry = IndexRegistry::new(tmp.path(), None);
        registry.get("Ken").await.unwrap();

        // Hold Pete's slot mid-load until released.
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let pete = registry.slot("Pete").await;
        let pending = tokio::spawn(async move {
            pete.get_or_try_init(move || async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Err::<Arc<EmbeddingIndex>, _>(Error::IndexNotBuilt("Pete".to_string()))
            })
            .await
            .is_err()
        });
        started_rx.await.unwrap();

        let ken = tokio::time::timeout(std::time::Duration::from_secs(5), registry.get("Ken"))
            .await
            .expect("Ken's lookup waited on Pete's load")
            .unwrap();
        assert_eq!(ken.user(), "Ken");
        assert!(!registry.is_loaded("Pete").await);

        release_tx.send(()).unwrap();
        assert!(pending.await.unwrap());
    }

    #[tokio::test]
    async fn test_registry_insert_replaces_slot() {
        let tmp = TempDir::new().unwrap();
        let registry = IndexRegistry::new(tmp.path(), None);
        registry.insert(Arc::new(sample())).await;
        assert!(registry.is_loaded("Ken").await);
        assert_eq!(registry.get("Ken").await.unwrap().len(), sample().len());
    }
}
