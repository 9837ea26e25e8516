//! Vector index abstraction for chunk embeddings.
//!
//! The [`VectorIndex`] trait defines the nearest-neighbour collaborator:
//! upsert embeddings with chunk metadata, query the `k` closest entries
//! under an exact-match filter, and delete by filter. Two backends are
//! provided: [`SqliteIndex`] (BLOB vectors ranked by brute-force cosine
//! distance) and [`MemoryIndex`] for tests.
//!
//! Per-chunk metadata carries the owning user and document ids; the
//! filter's user id is what enforces per-user retrieval isolation.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::FileType;

/// Metadata stored alongside every chunk embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Originating filename.
    pub source: String,
    pub chunk_index: i64,
    pub document_id: i64,
    pub user_id: i64,
    pub file_type: FileType,
    /// SHA-256 of the chunk text, for staleness detection.
    pub content_hash: String,
}

/// One nearest-neighbour match.
#[derive(Debug, Clone)]
pub struct IndexMatch {
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine distance (`1 - cosine similarity`), smaller is closer.
    pub distance: f64,
}

/// Exact-match filter over stored metadata.
#[derive(Debug, Clone, Default)]
pub struct IndexFilter {
    pub user_id: Option<i64>,
    pub document_id: Option<i64>,
}

impl IndexFilter {
    pub fn for_user(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            document_id: None,
        }
    }

    pub fn for_document(document_id: i64) -> Self {
        Self {
            user_id: None,
            document_id: Some(document_id),
        }
    }

    fn matches(&self, meta: &ChunkMetadata) -> bool {
        self.user_id.map(|u| meta.user_id == u).unwrap_or(true)
            && self
                .document_id
                .map(|d| meta.document_id == d)
                .unwrap_or(true)
    }
}

/// Nearest-neighbour store for chunk embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace an entry by id.
    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        text: &str,
        metadata: &ChunkMetadata,
    ) -> Result<()>;

    /// Return the `k` entries closest to `vector` under `filter`,
    /// ordered by ascending distance.
    async fn query(&self, vector: &[f32], k: usize, filter: &IndexFilter)
        -> Result<Vec<IndexMatch>>;

    /// Delete all entries matching `filter`; returns the count removed.
    async fn delete(&self, filter: &IndexFilter) -> Result<u64>;
}

// ============ SQLite implementation ============

/// Vector index stored in the `chunk_vectors` table.
///
/// Vectors are little-endian f32 BLOBs; queries load candidate rows
/// (narrowed by the filter columns) and rank them by cosine distance in
/// process.
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        text: &str,
        metadata: &ChunkMetadata,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors
                (id, document_id, user_id, chunk_index, source, file_type, content_hash, text, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document_id = excluded.document_id,
                user_id = excluded.user_id,
                chunk_index = excluded.chunk_index,
                source = excluded.source,
                file_type = excluded.file_type,
                content_hash = excluded.content_hash,
                text = excluded.text,
                embedding = excluded.embedding
            "#,
        )
        .bind(id)
        .bind(metadata.document_id)
        .bind(metadata.user_id)
        .bind(metadata.chunk_index)
        .bind(&metadata.source)
        .bind(metadata.file_type.as_str())
        .bind(&metadata.content_hash)
        .bind(text)
        .bind(vec_to_blob(vector))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<IndexMatch>> {
        let mut sql = String::from(
            "SELECT document_id, user_id, chunk_index, source, file_type, content_hash, text, embedding \
             FROM chunk_vectors WHERE 1=1",
        );
        if filter.user_id.is_some() {
            sql.push_str(" AND user_id = ?");
        }
        if filter.document_id.is_some() {
            sql.push_str(" AND document_id = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(user_id) = filter.user_id {
            query = query.bind(user_id);
        }
        if let Some(document_id) = filter.document_id {
            query = query.bind(document_id);
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut matches: Vec<IndexMatch> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let stored = blob_to_vec(&blob);
                let distance = 1.0 - cosine_similarity(vector, &stored) as f64;
                IndexMatch {
                    text: row.get("text"),
                    metadata: ChunkMetadata {
                        source: row.get("source"),
                        chunk_index: row.get("chunk_index"),
                        document_id: row.get("document_id"),
                        user_id: row.get("user_id"),
                        file_type: FileType::from_tag(row.get::<String, _>("file_type").as_str()),
                        content_hash: row.get("content_hash"),
                    },
                    distance,
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn delete(&self, filter: &IndexFilter) -> Result<u64> {
        let mut sql = String::from("DELETE FROM chunk_vectors WHERE 1=1");
        if filter.user_id.is_some() {
            sql.push_str(" AND user_id = ?");
        }
        if filter.document_id.is_some() {
            sql.push_str(" AND document_id = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(user_id) = filter.user_id {
            query = query.bind(user_id);
        }
        if let Some(document_id) = filter.document_id {
            query = query.bind(document_id);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

// ============ In-memory implementation ============

struct MemoryEntry {
    vector: Vec<f32>,
    text: String,
    metadata: ChunkMetadata,
}

/// Brute-force in-memory index for tests.
#[derive(Default)]
pub struct MemoryIndex {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        text: &str,
        metadata: &ChunkMetadata,
    ) -> Result<()> {
        self.entries.write().unwrap().insert(
            id.to_string(),
            MemoryEntry {
                vector: vector.to_vec(),
                text: text.to_string(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<IndexMatch>> {
        let entries = self.entries.read().unwrap();
        let mut matches: Vec<IndexMatch> = entries
            .values()
            .filter(|e| filter.matches(&e.metadata))
            .map(|e| IndexMatch {
                text: e.text.clone(),
                metadata: e.metadata.clone(),
                distance: 1.0 - cosine_similarity(vector, &e.vector) as f64,
            })
            .collect();
        matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn delete(&self, filter: &IndexFilter) -> Result<u64> {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, e| !filter.matches(&e.metadata));
        Ok((before - entries.len()) as u64)
    }
}
