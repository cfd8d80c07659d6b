//! Semantic search over indexed chunks.
//!
//! The query is embedded with the same [`Embedder`] used for indexing, the
//! vector store ranks chunks by cosine similarity, and each hit is reduced
//! to a short snippet plus its document path. Chunks of ignored paths are
//! dropped from results even if a purge has not reached them yet.

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, Embedder};
use crate::error::{Error, Result};
use crate::models::SearchHit;
use crate::policy::PolicyStore;
use crate::store::VectorStore;

/// Extra candidates fetched so that filtering ignored paths rarely leaves a
/// short page.
const OVERFETCH: usize = 8;

pub struct Searcher<'a> {
    pub embedder: &'a dyn Embedder,
    pub store: &'a dyn VectorStore,
    pub policy: &'a PolicyStore,
    pub retrieval: &'a RetrievalConfig,
}

impl Searcher<'_> {
    /// Rank chunks for `query`. `limit` defaults to `default_limit` and is
    /// clamped to `max_limit`.
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::BadRequest("query must not be empty".into()));
        }
        let limit = match limit {
            Some(0) => return Err(Error::BadRequest("limit must be at least 1".into())),
            Some(n) => n.min(self.retrieval.max_limit),
            None => self.retrieval.default_limit,
        };

        let query_vec = embed_query(self.embedder, query).await?;
        let candidates = self
            .store
            .similarity_search(&query_vec, limit + OVERFETCH)
            .await
            .map_err(Error::Store)?;

        let hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter(|c| !self.policy.is_ignored(&c.metadata.path))
            .take(limit)
            .map(|c| SearchHit {
                entry: snippet(&c.metadata.text, self.retrieval.snippet_chars),
                file: c.metadata.path,
                score: c.score,
            })
            .collect();

        tracing::debug!(query = %query, hits = hits.len(), "search");
        Ok(hits)
    }
}

/// Whitespace-collapsed prefix of `text`, at most `max_chars` characters.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    collapsed.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::store::ChunkMetadata;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| if t.contains("tea") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect())
        }
    }

    fn meta(path: &str, text: &str) -> ChunkMetadata {
        ChunkMetadata {
            path: path.to_string(),
            chunk_index: 0,
            offset: 0,
            text: text.to_string(),
        }
    }

    #[test]
    fn snippet_is_bounded() {
        assert_eq!(snippet("a\n\n b   c", 200), "a b c");
        assert_eq!(snippet(&"word ".repeat(100), 10), "word word");
        assert_eq!(snippet(&"é".repeat(300), 200).chars().count(), 200);
    }

    #[tokio::test]
    async fn ranks_and_filters_ignored() {
        let tmp = TempDir::new().unwrap();
        let policy = PolicyStore::open(tmp.path().join("policy.json"));
        let store = InMemoryStore::new();
        store
            .upsert(
                &["a-0".into(), "b-0".into(), "c-0".into()],
                &[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.1]],
                &[meta("a.md", "green tea"), meta("b.md", "coffee"), meta("c.md", "black tea")],
            )
            .await
            .unwrap();
        policy.add_ignore("c.md", None).unwrap();

        let retrieval = RetrievalConfig::default();
        let searcher = Searcher {
            embedder: &AxisEmbedder,
            store: &store,
            policy: &policy,
            retrieval: &retrieval,
        };
        let hits = searcher.search("tea", Some(2)).await.unwrap();
        let files: Vec<&str> = hits.iter().map(|h| h.file.as_str()).collect();
        assert_eq!(files, vec!["a.md", "b.md"]);
        assert_eq!(hits[0].entry, "green tea");
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let policy = PolicyStore::open(tmp.path().join("policy.json"));
        let store = InMemoryStore::new();
        let retrieval = RetrievalConfig::default();
        let searcher = Searcher {
            embedder: &AxisEmbedder,
            store: &store,
            policy: &policy,
            retrieval: &retrieval,
        };
        assert!(matches!(searcher.search("   ", None).await, Err(Error::BadRequest(_))));
    }
}
