//! Persistent vector index.
//!
//! The [`VectorIndex`] trait is the seam between the pipelines and storage:
//! ingestion appends [`IndexEntry`]s, retrieval asks for the `fetch_k`
//! nearest [`Candidate`]s by cosine similarity.
//!
//! Two backends:
//! - [`SqliteIndex`] stores vectors as BLOBs in SQLite and scans them
//!   brute force. Suitable for document sets of a few hundred thousand
//!   chunks.
//! - [`InMemoryIndex`] keeps everything in a `Vec`; used by tests and dry
//!   runs.
//!
//! Entry ids are content-addressed, so re-appending an identical chunk is
//! a no-op in both backends.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate;
use crate::models::{Candidate, Chunk, IndexEntry};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Persist entries. Returns how many were new.
    async fn append(&self, entries: &[IndexEntry]) -> Result<usize>;

    /// Up to `fetch_k` entries ordered by descending similarity to `query`.
    /// Ties keep insertion order.
    async fn candidates(&self, query: &[f32], fetch_k: usize) -> Result<Vec<Candidate>>;

    /// Delete every entry from `source`. Returns how many were removed.
    async fn remove_source(&self, source: &str) -> Result<usize>;

    async fn count(&self) -> Result<usize>;

    /// Entry count per source file, sorted by file name.
    async fn count_by_source(&self) -> Result<Vec<(String, usize)>>;
}

fn rank(mut scored: Vec<Candidate>, fetch_k: usize) -> Vec<Candidate> {
    // sort_by is stable, so equal scores keep insertion order.
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(fetch_k);
    scored
}

// ============ SQLite ============

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the database at `path`, creating it and its schema if needed.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn append(&self, entries: &[IndexEntry]) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let mut inserted = 0u64;
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO index_entries
                    (id, source, locator, chunk_index, text, embedding, model, dims, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.chunk.id)
            .bind(&entry.chunk.source)
            .bind(&entry.chunk.locator)
            .bind(entry.chunk.chunk_index)
            .bind(&entry.chunk.text)
            .bind(vec_to_blob(&entry.vector))
            .bind(&entry.model)
            .bind(entry.vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted as usize)
    }

    async fn candidates(&self, query: &[f32], fetch_k: usize) -> Result<Vec<Candidate>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source, locator, chunk_index, text, embedding
            FROM index_entries
            ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let scored = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                let similarity = cosine_similarity(query, &vector) as f64;
                Candidate {
                    chunk: Chunk {
                        id: row.get("id"),
                        source: row.get("source"),
                        locator: row.get("locator"),
                        chunk_index: row.get("chunk_index"),
                        text: row.get("text"),
                    },
                    vector,
                    similarity,
                }
            })
            .collect();

        Ok(rank(scored, fetch_k))
    }

    async fn remove_source(&self, source: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM index_entries WHERE source = ?")
            .bind(source)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn count_by_source(&self) -> Result<Vec<(String, usize)>> {
        let rows = sqlx::query(
            "SELECT source, COUNT(*) AS n FROM index_entries GROUP BY source ORDER BY source",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let n: i64 = row.get("n");
                (row.get("source"), n as usize)
            })
            .collect())
    }
}

// ============ In-memory ============

#[derive(Default)]
pub struct InMemoryIndex {
    entries: RwLock<Vec<IndexEntry>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn append(&self, entries: &[IndexEntry]) -> Result<usize> {
        let mut stored = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut ids: HashSet<String> = stored.iter().map(|e| e.chunk.id.clone()).collect();
        let mut inserted = 0;
        for entry in entries {
            if ids.insert(entry.chunk.id.clone()) {
                stored.push(entry.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn candidates(&self, query: &[f32], fetch_k: usize) -> Result<Vec<Candidate>> {
        let stored = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let scored = stored
            .iter()
            .map(|e| Candidate {
                chunk: e.chunk.clone(),
                vector: e.vector.clone(),
                similarity: cosine_similarity(query, &e.vector) as f64,
            })
            .collect();
        Ok(rank(scored, fetch_k))
    }

    async fn remove_source(&self, source: &str) -> Result<usize> {
        let mut stored = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = stored.len();
        stored.retain(|e| e.chunk.source != source);
        Ok(before - stored.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len())
    }

    async fn count_by_source(&self) -> Result<Vec<(String, usize)>> {
        let stored = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for e in stored.iter() {
            *counts.entry(e.chunk.source.clone()).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}
