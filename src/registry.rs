//! Document registry: the persisted record of what is currently indexed.
//!
//! One [`IndexedDocument`] per file, keyed and ordered by relative path.
//! The ordering is what makes offset/limit pagination stable: over an
//! unchanged registry, concatenating every page yields each document exactly
//! once. The snapshot is rebuildable: if it is lost, the startup scan
//! treats every file as unindexed and re-indexes the tree.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::models::{FileStamp, IndexedDocument, Gate};
use crate::paths::is_under;
use crate::persist::{load_snapshot, write_snapshot};
use crate::policy::PolicyStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistrySnapshot {
    #[serde(default)]
    documents: BTreeMap<String, IndexedDocument>,
}

/// One page of a registry listing.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentPage {
    pub documents: Vec<IndexedDocument>,
    /// Number of documents matching the folder filter, across all pages.
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    /// Offset of the following page, absent on the last page.
    pub next_offset: Option<usize>,
}

/// Aggregate counts for `GET /registry/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub total_bytes: u64,
    pub gates: Vec<Gate>,
    pub ignored_count: usize,
    pub last_indexed_at: Option<DateTime<Utc>>,
}

pub struct DocumentRegistry {
    path: PathBuf,
    documents: RwLock<BTreeMap<String, IndexedDocument>>,
    persist_failed: AtomicBool,
}

impl DocumentRegistry {
    /// Load the registry from `path`. A missing or corrupt file yields an
    /// empty registry.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let snapshot: RegistrySnapshot = load_snapshot(&path, "registry file");
        tracing::debug!(path = %path.display(), documents = snapshot.documents.len(), "registry loaded");
        Self {
            path,
            documents: RwLock::new(snapshot.documents),
            persist_failed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn persistence_healthy(&self) -> bool {
        !self.persist_failed.load(Ordering::SeqCst)
    }

    /// Replace the entry for `path`.
    pub fn upsert(&self, path: &str, chunk_count: usize, stamp: FileStamp) -> Result<IndexedDocument> {
        let doc = IndexedDocument {
            path: path.to_string(),
            chunk_count,
            size_bytes: stamp.size,
            mtime: stamp.mtime,
            indexed_at: Utc::now(),
        };
        self.mutate(|docs| {
            docs.insert(path.to_string(), doc.clone());
        })?;
        Ok(doc)
    }

    /// Delete the entry for `path`. Returns the removed entry, if any.
    pub fn remove(&self, path: &str) -> Result<Option<IndexedDocument>> {
        if !self.documents.read().contains_key(path) {
            return Ok(None);
        }
        let mut removed = None;
        self.mutate(|docs| {
            removed = docs.remove(path);
        })?;
        Ok(removed)
    }

    pub fn get(&self, path: &str) -> Option<IndexedDocument> {
        self.documents.read().get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.documents.read().contains_key(path)
    }

    /// Page through documents in path order, optionally restricted to one folder.
    pub fn list(&self, offset: usize, limit: usize, folder: Option<&str>) -> DocumentPage {
        let docs = self.documents.read();
        let matching = docs
            .values()
            .filter(|d| folder.map_or(true, |f| is_under(&d.path, f)));

        let total = matching.clone().count();
        let documents: Vec<IndexedDocument> = matching.skip(offset).take(limit).cloned().collect();
        let end = offset.saturating_add(documents.len());
        let next_offset = (limit > 0 && end < total).then_some(end);

        DocumentPage {
            documents,
            total,
            offset,
            limit,
            next_offset,
        }
    }

    /// Every indexed path, in order.
    pub fn paths(&self) -> Vec<String> {
        self.documents.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Registry totals combined with the policy store's gate and ignore counts.
    pub fn stats(&self, policy: &PolicyStore) -> RegistryStats {
        let docs = self.documents.read();
        RegistryStats {
            total_files: docs.len(),
            total_chunks: docs.values().map(|d| d.chunk_count).sum(),
            total_bytes: docs.values().map(|d| d.size_bytes).sum(),
            gates: policy.list_gates(),
            ignored_count: policy.ignored_count(),
            last_indexed_at: docs.values().map(|d| d.indexed_at).max(),
        }
    }

    fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, IndexedDocument>),
    {
        let mut docs = self.documents.write();
        let mut next = docs.clone();
        apply(&mut next);
        let snapshot = RegistrySnapshot { documents: next };
        if let Err(e) = write_snapshot(&self.path, &snapshot) {
            self.persist_failed.store(true, Ordering::SeqCst);
            tracing::error!(error = %e, "registry snapshot write failed");
            return Err(e);
        }
        self.persist_failed.store(false, Ordering::SeqCst);
        *docs = snapshot.documents;
        Ok(())
    }
}
