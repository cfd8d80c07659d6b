//! In-memory [`VectorStore`] for tests and `backend = "memory"`.
//!
//! Records live in a `Vec` in first-insertion order; replacing an id keeps
//! its original position. Search is brute-force cosine similarity.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use super::{check_parallel, rank, ChunkMetadata, ScoredChunk, VectorStore};
use crate::embedding::cosine_similarity;

struct StoredVector {
    id: String,
    vector: Vec<f32>,
    metadata: ChunkMetadata,
}

pub struct InMemoryStore {
    records: RwLock<Vec<StoredVector>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[ChunkMetadata],
    ) -> Result<()> {
        check_parallel(ids, embeddings, metadatas)?;
        let mut records = self.records.write();
        for ((id, vector), metadata) in ids.iter().zip(embeddings).zip(metadatas) {
            match records.iter_mut().find(|r| &r.id == id) {
                Some(existing) => {
                    existing.vector = vector.clone();
                    existing.metadata = metadata.clone();
                }
                None => records.push(StoredVector {
                    id: id.clone(),
                    vector: vector.clone(),
                    metadata: metadata.clone(),
                }),
            }
        }
        Ok(())
    }

    async fn delete_by_path(&self, path: &str) -> Result<usize> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.metadata.path != path);
        Ok(before - records.len())
    }

    async fn similarity_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let records = self.records.read();
        let hits = records
            .iter()
            .map(|r| ScoredChunk {
                id: r.id.clone(),
                score: cosine_similarity(query, &r.vector),
                metadata: r.metadata.clone(),
            })
            .collect();
        Ok(rank(hits, top_k))
    }

    async fn count_for_path(&self, path: &str) -> Result<usize> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.metadata.path == path)
            .count())
    }

    async fn ids_for_path(&self, path: &str) -> Result<Vec<String>> {
        let records = self.records.read();
        let mut matching: Vec<&StoredVector> = records.iter().filter(|r| r.metadata.path == path).collect();
        matching.sort_by_key(|r| r.metadata.chunk_index);
        Ok(matching.into_iter().map(|r| r.id.clone()).collect())
    }
}
