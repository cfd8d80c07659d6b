//! Processing pass: file → chunks → embeddings → vector store → registry.
//!
//! A pass for one path runs these checks and steps in order:
//!
//! 1. Ignored by policy: stop, no side effects.
//! 2. File missing: drop its chunks, then its registry entry. A missing
//!    directory drops every document below it.
//! 3. Outside the scan filter, or no content handler: skip (debug log).
//!    Any index state left over from an earlier pass is dropped.
//! 4. Larger than `max_file_bytes`: [`Error::FileTooLarge`].
//! 5. Read and extract, chunk, embed every chunk.
//! 6. Ignored since step 1: drop any index state and stop.
//! 7. Replace: delete all chunks for the path, upsert the new set, then
//!    upsert the registry entry.
//!
//! Nothing is mutated before step 6, so a read or embedding failure leaves
//! the previous index state intact. A crash inside step 7 is repaired by the
//! next startup scan, which re-produces the same deterministic chunk ids.
//!
//! Passes for the same path are serialized by a per-path async lock.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, Config};
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::extract::HandlerRegistry;
use crate::fs_scan::{self, ScanFilter};
use crate::models::{EventKind, FileStamp, IndexedDocument};
use crate::paths::is_under;
use crate::policy::PolicyStore;
use crate::registry::DocumentRegistry;
use crate::store::{ChunkMetadata, VectorStore};

/// What a processing pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The document was (re)indexed with this many chunks.
    Indexed { chunks: usize },
    /// The file is gone; its index state was dropped.
    Removed,
    /// The path is ignored; nothing was touched.
    Ignored,
    /// Not an indexable file (filtered out, directory, or no handler).
    Unsupported,
}

/// Totals from [`Indexer::sync_all`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub scanned: usize,
    pub indexed: usize,
    pub chunks: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Indexer {
    root: PathBuf,
    policy: Arc<PolicyStore>,
    registry: Arc<DocumentRegistry>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    handlers: HandlerRegistry,
    filter: ScanFilter,
    chunking: ChunkingConfig,
    max_file_bytes: u64,
    follow_symlinks: bool,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Indexer {
    pub fn new(
        config: &Config,
        policy: Arc<PolicyStore>,
        registry: Arc<DocumentRegistry>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        filter: ScanFilter,
    ) -> Self {
        Self {
            root: config.index.root.clone(),
            policy,
            registry,
            store,
            embedder,
            handlers: HandlerRegistry::with_defaults(),
            filter,
            chunking: config.chunking.clone(),
            max_file_bytes: config.index.max_file_bytes,
            follow_symlinks: config.index.follow_symlinks,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the content handlers (default: [`HandlerRegistry::with_defaults`]).
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn filter(&self) -> &ScanFilter {
        &self.filter
    }

    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.policy
    }

    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// True when `path` would be picked up by a pass: inside the scan filter
    /// and handled by some content handler.
    pub fn is_indexable(&self, path: &str) -> bool {
        self.filter.matches(path) && self.handlers.is_supported(path)
    }

    /// Run one processing pass for `path` (root-relative, normalized).
    pub async fn process(&self, path: &str) -> Result<PassOutcome> {
        let lock = self.path_lock(path);
        let outcome = {
            let _guard = lock.lock().await;
            self.process_locked(path).await
        };
        drop(lock);
        self.release_lock(path);

        match &outcome {
            Ok(PassOutcome::Indexed { chunks }) => {
                tracing::info!(path = %path, chunks = *chunks, "indexed");
            }
            Ok(PassOutcome::Removed) => tracing::info!(path = %path, "removed from index"),
            Ok(PassOutcome::Ignored) => tracing::debug!(path = %path, "ignored, skipping"),
            Ok(PassOutcome::Unsupported) => tracing::debug!(path = %path, "not indexable, skipping"),
            Err(e) => tracing::warn!(path = %path, error = %e, "indexing pass failed"),
        }
        outcome
    }

    async fn process_locked(&self, path: &str) -> Result<PassOutcome> {
        if self.policy.is_ignored(path) {
            return Ok(PassOutcome::Ignored);
        }

        let abs = self.root.join(path);
        let metadata = match tokio::fs::metadata(&abs).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.remove_locked(path).await?;
                self.forget_under(path).await?;
                return Ok(PassOutcome::Removed);
            }
            Err(e) => {
                return Err(Error::FileRead {
                    path: path.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let handler = match self.handlers.handler_for(path) {
            Some(h) if metadata.is_file() && self.filter.matches(path) => h,
            _ => {
                if self.registry.contains(path) {
                    self.remove_locked(path).await?;
                }
                return Ok(PassOutcome::Unsupported);
            }
        };

        if metadata.len() > self.max_file_bytes {
            return Err(Error::FileTooLarge {
                path: path.to_string(),
                size: metadata.len(),
                limit: self.max_file_bytes,
            });
        }
        let stamp = FileStamp::from_metadata(&metadata);

        let bytes = tokio::fs::read(&abs).await.map_err(|e| Error::FileRead {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let extract = handler.extract;
        let text = tokio::task::spawn_blocking(move || extract(&bytes))
            .await
            .map_err(|e| Error::FileRead {
                path: path.to_string(),
                reason: format!("extraction task failed: {e}"),
            })?
            .map_err(|e| Error::FileRead {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        let chunks = chunk_text(path, &text, self.chunking.chunk_chars, self.chunking.overlap_chars);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&texts).await?
        };
        if embeddings.len() != chunks.len() {
            return Err(Error::EmbeddingServiceUnavailable(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        // An ignore added while this pass was extracting or embedding.
        if self.policy.is_ignored(path) {
            self.remove_locked(path).await?;
            return Ok(PassOutcome::Ignored);
        }

        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let metadatas: Vec<ChunkMetadata> = chunks
            .into_iter()
            .map(|c| ChunkMetadata {
                path: c.doc_path,
                chunk_index: c.chunk_index,
                offset: c.offset,
                text: c.text,
            })
            .collect();

        self.store.delete_by_path(path).await.map_err(Error::Store)?;
        if !ids.is_empty() {
            self.store
                .upsert(&ids, &embeddings, &metadatas)
                .await
                .map_err(Error::Store)?;
        }
        self.registry.upsert(path, ids.len(), stamp)?;

        Ok(PassOutcome::Indexed { chunks: ids.len() })
    }

    /// Drop all index state for `path` (chunks first, then the registry
    /// entry). The file on disk is not touched.
    pub async fn forget(&self, path: &str) -> Result<Option<IndexedDocument>> {
        let lock = self.path_lock(path);
        let removed = {
            let _guard = lock.lock().await;
            self.remove_locked(path).await
        };
        drop(lock);
        self.release_lock(path);
        removed
    }

    /// Forget every indexed document below `dir`. A removed or renamed
    /// directory arrives as a single event for the directory itself.
    async fn forget_under(&self, dir: &str) -> Result<usize> {
        let below: Vec<String> = self
            .registry
            .paths()
            .into_iter()
            .filter(|p| p != dir && is_under(p, dir))
            .collect();
        for path in &below {
            self.forget(path).await?;
        }
        if !below.is_empty() {
            tracing::info!(dir = %dir, documents = below.len(), "directory removed from index");
        }
        Ok(below.len())
    }

    async fn remove_locked(&self, path: &str) -> Result<Option<IndexedDocument>> {
        let chunks = self.store.delete_by_path(path).await.map_err(Error::Store)?;
        let entry = self.registry.remove(path)?;
        if chunks > 0 || entry.is_some() {
            tracing::debug!(path = %path, chunks, "index state dropped");
        }
        Ok(entry)
    }

    /// Drop every indexed document the ignore policy now matches. Returns
    /// the paths dropped.
    ///
    /// Paths with a pass in flight are included too: `forget` waits for the
    /// pass, so a document it writes after the ignore was added is removed.
    pub async fn purge_ignored(&self) -> Result<Vec<String>> {
        let mut candidates: BTreeSet<String> = self.registry.paths().into_iter().collect();
        candidates.extend(self.locks.lock().keys().cloned());

        let mut purged = Vec::new();
        for path in candidates {
            if !self.policy.is_ignored(&path) {
                continue;
            }
            if self.forget(&path).await?.is_some() {
                purged.push(path);
            }
        }
        Ok(purged)
    }

    /// Compare the filesystem with the registry.
    ///
    /// Indexed documents the ignore policy now matches are dropped first.
    /// Returns a `Modified` event for every indexable, non-ignored file that
    /// is unindexed or whose size/mtime changed, and a `Deleted` event for
    /// every registry entry with no matching file.
    pub async fn reconcile(&self) -> anyhow::Result<Vec<(String, EventKind)>> {
        let purged = self.purge_ignored().await?;
        if !purged.is_empty() {
            tracing::info!(documents = purged.len(), "dropped ignored documents left in the index");
        }

        let root = self.root.clone();
        let filter = self.filter.clone();
        let follow = self.follow_symlinks;
        let files = tokio::task::spawn_blocking(move || fs_scan::scan(&root, &filter, follow)).await??;

        let mut events = Vec::new();
        let mut seen = BTreeSet::new();
        for file in files {
            if !self.handlers.is_supported(&file.path) || self.policy.is_ignored(&file.path) {
                continue;
            }
            let stale = match self.registry.get(&file.path) {
                Some(doc) => doc.mtime != file.stamp.mtime || doc.size_bytes != file.stamp.size,
                None => true,
            };
            seen.insert(file.path.clone());
            if stale {
                events.push((file.path, EventKind::Modified));
            }
        }

        for path in self.registry.paths() {
            if !seen.contains(&path) {
                events.push((path, EventKind::Deleted));
            }
        }

        tracing::debug!(events = events.len(), "reconcile finished");
        Ok(events)
    }

    /// Reconcile and run every resulting pass inline, one at a time.
    pub async fn sync_all(&self) -> anyhow::Result<SyncSummary> {
        let events = self.reconcile().await?;
        let mut summary = SyncSummary {
            scanned: events.len(),
            ..SyncSummary::default()
        };
        for (path, _) in events {
            match self.process(&path).await {
                Ok(PassOutcome::Indexed { chunks }) => {
                    summary.indexed += 1;
                    summary.chunks += chunks;
                }
                Ok(PassOutcome::Removed) => summary.removed += 1,
                Ok(PassOutcome::Ignored | PassOutcome::Unsupported) => summary.skipped += 1,
                Err(_) => summary.failed += 1,
            }
        }
        Ok(summary)
    }

    fn path_lock(&self, path: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_lock(&self, path: &str) {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(path) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(path);
            }
        }
    }
}
