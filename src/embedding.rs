//! Embedding service client and vector utilities.
//!
//! The embedding service is an external collaborator consumed through the
//! [`Embedder`] trait. [`HttpEmbedder`] speaks its wire format:
//!
//! ```text
//! POST {url}/embeddings   {"texts": ["...", ...]}
//! 200                     {"vectors": [[0.1, ...], ...]}
//! ```
//!
//! Every call carries the configured timeout and is attempted once. A failed
//! call surfaces as [`Error::EmbeddingServiceUnavailable`]; the indexer tries
//! again on the next event for that path or at the next startup scan.
//!
//! Also provides vector helpers used by the stores:
//! - [`cosine_similarity`]
//! - [`vec_to_blob`] / [`blob_to_vec`] for SQLite BLOB storage

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Converts text into vectors. Implementations must return exactly one
/// vector per input text, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::EmbeddingServiceUnavailable("empty embedding response".into()))
}

// ============ HTTP Embedder ============

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    vectors: Vec<Vec<f32>>,
}

/// Client for the external embedding service.
///
/// Texts are sent in batches of at most `batch_size`; a document's chunks
/// are embedded with as few calls as the batch size allows.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    batch_size: usize,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let api_key = match &config.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                anyhow::anyhow!("environment variable {} (embedding.api_key_env) not set", var)
            })?),
            None => None,
        };
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.url.trim_end_matches('/')),
            batch_size: config.batch_size.max(1),
            api_key,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut request = self.client.post(&self.endpoint).json(&EmbedRequest { texts });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::EmbeddingServiceUnavailable(describe_send_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::EmbeddingServiceUnavailable(format!(
                "embedding service returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: EmbedResponse = response.json().await.map_err(|e| {
            Error::EmbeddingServiceUnavailable(format!("invalid embedding response: {}", e))
        })?;

        if parsed.vectors.len() != texts.len() {
            return Err(Error::EmbeddingServiceUnavailable(format!(
                "embedding service returned {} vectors for {} texts",
                parsed.vectors.len(),
                texts.len()
            )));
        }
        Ok(parsed.vectors)
    }
}

fn describe_send_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }
}

// ============ Vector utilities ============

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty, zero,
/// non-finite or mismatched-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    let score = dot / denom;
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

/// Encode a vector as little-endian `f32` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
