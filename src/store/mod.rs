//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait is the seam between the indexer and whatever
//! holds chunk embeddings. Two backends ship:
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | [`InMemoryStore`](memory::InMemoryStore) | [`memory`] | tests, ephemeral runs |
//! | [`SqliteStore`](sqlite::SqliteStore) | [`sqlite`] | default, persistent |
//!
//! Every implementation must satisfy the same contract:
//!
//! - `upsert` inserts or replaces by chunk id; re-upserting an id never
//!   creates a second record.
//! - After `delete_by_path(p)` returns `Ok`, no record with path `p`
//!   remains.
//! - `similarity_search` orders by descending cosine similarity; ties keep
//!   insertion order.

pub mod memory;
pub mod sqlite;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;

/// Metadata stored beside each chunk embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkMetadata {
    pub path: String,
    pub chunk_index: usize,
    pub offset: usize,
    pub text: String,
}

/// A stored chunk with its similarity to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub id: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records by id. The three slices are parallel.
    async fn upsert(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[ChunkMetadata],
    ) -> Result<()>;

    /// Remove every record whose metadata path equals `path`. Returns the
    /// number removed.
    async fn delete_by_path(&self, path: &str) -> Result<usize>;

    /// The `top_k` records most similar to `query`.
    async fn similarity_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>>;

    /// Number of records stored for `path`.
    async fn count_for_path(&self, path: &str) -> Result<usize>;

    /// Ids stored for `path`, ordered by chunk index.
    async fn ids_for_path(&self, path: &str) -> Result<Vec<String>>;
}

pub(crate) fn check_parallel(ids: &[String], embeddings: &[Vec<f32>], metadatas: &[ChunkMetadata]) -> Result<()> {
    if ids.len() != embeddings.len() || ids.len() != metadatas.len() {
        bail!(
            "upsert length mismatch: {} ids, {} embeddings, {} metadatas",
            ids.len(),
            embeddings.len(),
            metadatas.len()
        );
    }
    Ok(())
}

/// Sort by descending score. The sort is stable, so equal scores keep the
/// order they arrived in.
pub(crate) fn rank(mut hits: Vec<ScoredChunk>, top_k: usize) -> Vec<ScoredChunk> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(top_k);
    hits
}
