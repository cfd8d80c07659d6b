//! SQLite-backed [`VectorStore`].
//!
//! One row per chunk in `chunk_vectors`, embedding stored as a little-endian
//! `f32` BLOB. Search is a brute-force cosine scan in rowid order, which is
//! first-insertion order since `ON CONFLICT DO UPDATE` keeps the rowid.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use super::{check_parallel, rank, ChunkMetadata, ScoredChunk, VectorStore};
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate::run_migrations;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[ChunkMetadata],
    ) -> Result<()> {
        check_parallel(ids, embeddings, metadatas)?;
        let mut tx = self.pool.begin().await?;

        for ((id, vector), meta) in ids.iter().zip(embeddings).zip(metadatas) {
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (id, path, chunk_index, char_offset, text, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    path = excluded.path,
                    chunk_index = excluded.chunk_index,
                    char_offset = excluded.char_offset,
                    text = excluded.text,
                    embedding = excluded.embedding
                "#,
            )
            .bind(id)
            .bind(&meta.path)
            .bind(meta.chunk_index as i64)
            .bind(meta.offset as i64)
            .bind(&meta.text)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_by_path(&self, path: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM chunk_vectors WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE path = ?")
            .bind(path)
            .fetch_one(&mut *tx)
            .await?;
        if remaining != 0 {
            bail!("{} chunk(s) for {} survived deletion", remaining, path);
        }

        tx.commit().await?;
        Ok(removed as usize)
    }

    async fn similarity_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            "SELECT id, path, chunk_index, char_offset, text, embedding FROM chunk_vectors ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        let hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let chunk_index: i64 = row.get("chunk_index");
                let offset: i64 = row.get("char_offset");
                ScoredChunk {
                    id: row.get("id"),
                    score: cosine_similarity(query, &blob_to_vec(&blob)),
                    metadata: ChunkMetadata {
                        path: row.get("path"),
                        chunk_index: chunk_index as usize,
                        offset: offset as usize,
                        text: row.get("text"),
                    },
                }
            })
            .collect();

        Ok(rank(hits, top_k))
    }

    async fn count_for_path(&self, path: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE path = ?")
            .bind(path)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn ids_for_path(&self, path: &str) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM chunk_vectors WHERE path = ? ORDER BY chunk_index")
                .bind(path)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}
