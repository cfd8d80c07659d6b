//! Gate and ignore policy store.
//!
//! Holds two kinds of policy, persisted together in one JSON snapshot:
//!
//! - **Gates**: `directory → readonly | readwrite`. A path's effective mode is
//!   the mode of the longest gate directory that contains it (compared by
//!   whole path segments); paths under no gate are `readwrite`.
//! - **Ignores**: exact relative paths or glob patterns (`scratch/*`). An
//!   ignored path is never chunked or embedded, whatever its gate.
//!
//! The store is the only writer of its snapshot file. Every mutation is a
//! read-modify-write under one lock; the in-memory state changes only after
//! the snapshot has been written.

use chrono::Utc;
use globset::{GlobBuilder, GlobMatcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::models::{FileStamp, Gate, GateMode, IgnoreEntry};
use crate::paths::{is_under, normalize_relative};
use crate::persist::{load_snapshot, write_snapshot};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PolicySnapshot {
    #[serde(default)]
    gates: BTreeMap<String, Gate>,
    #[serde(default)]
    ignored: BTreeMap<String, IgnoreEntry>,
}

struct PolicyState {
    snapshot: PolicySnapshot,
    globs: Vec<(String, GlobMatcher)>,
}

impl PolicyState {
    fn new(snapshot: PolicySnapshot) -> Self {
        let mut globs = Vec::new();
        for pattern in snapshot.ignored.keys().filter(|p| is_glob(p)) {
            match compile_glob(pattern) {
                Ok(matcher) => globs.push((pattern.clone(), matcher)),
                Err(e) => tracing::warn!(pattern = %pattern, error = %e, "skipping invalid ignore glob"),
            }
        }
        Self { snapshot, globs }
    }
}

pub struct PolicyStore {
    path: PathBuf,
    state: RwLock<PolicyState>,
    persist_failed: AtomicBool,
}

impl PolicyStore {
    /// Load the store from `path`. A missing or corrupt file yields empty policy.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let snapshot: PolicySnapshot = load_snapshot(&path, "policy file");
        tracing::debug!(
            path = %path.display(),
            gates = snapshot.gates.len(),
            ignored = snapshot.ignored.len(),
            "policy loaded"
        );
        Self {
            path,
            state: RwLock::new(PolicyState::new(snapshot)),
            persist_failed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// False once a snapshot write has failed and no later write succeeded.
    pub fn persistence_healthy(&self) -> bool {
        !self.persist_failed.load(Ordering::SeqCst)
    }

    // ============ Gates ============

    /// Set the mode for `directory`. The last write for a directory wins.
    pub fn set_gate(&self, directory: &str, mode: &str) -> Result<Gate> {
        let mode: GateMode = mode.parse()?;
        let directory = normalize_relative(directory).map_err(|e| Error::InvalidPath(e.to_string()))?;
        let gate = Gate {
            directory: directory.clone(),
            mode,
            set_at: Utc::now(),
        };
        self.mutate(|snap| {
            snap.gates.insert(directory, gate.clone());
        })?;
        tracing::info!(directory = %gate.directory, mode = %gate.mode, "gate set");
        Ok(gate)
    }

    /// Remove the gate for `directory`. Returns whether one existed.
    pub fn remove_gate(&self, directory: &str) -> Result<bool> {
        let directory = normalize_relative(directory).map_err(|e| Error::InvalidPath(e.to_string()))?;
        if !self.state.read().snapshot.gates.contains_key(&directory) {
            return Ok(false);
        }
        let mut removed = false;
        self.mutate(|snap| {
            removed = snap.gates.remove(&directory).is_some();
        })?;
        if removed {
            tracing::info!(directory = %directory, "gate removed");
        }
        Ok(removed)
    }

    /// The gate governing `path`, if any: the longest containing directory.
    pub fn gate_for(&self, path: &str) -> Option<Gate> {
        let state = self.state.read();
        state
            .snapshot
            .gates
            .values()
            .filter(|g| is_under(path, &g.directory))
            .max_by_key(|g| g.directory.len())
            .cloned()
    }

    /// Effective mode for `path`; `readwrite` when no gate applies.
    pub fn resolve_gate(&self, path: &str) -> GateMode {
        self.gate_for(path)
            .map(|g| g.mode)
            .unwrap_or(GateMode::ReadWrite)
    }

    pub fn list_gates(&self) -> Vec<Gate> {
        self.state.read().snapshot.gates.values().cloned().collect()
    }

    pub fn gate_count(&self) -> usize {
        self.state.read().snapshot.gates.len()
    }

    // ============ Ignores ============

    /// Add an ignore entry for an exact path or a glob pattern.
    ///
    /// `observed` is the file's size and mtime at the moment of ignoring,
    /// when the caller could stat it.
    pub fn add_ignore(&self, path: &str, observed: Option<FileStamp>) -> Result<IgnoreEntry> {
        let path = normalize_relative(path).map_err(|e| Error::InvalidPath(e.to_string()))?;
        if is_glob(&path) {
            compile_glob(&path).map_err(|e| Error::InvalidPath(format!("{path}: {e}")))?;
        }
        let entry = IgnoreEntry {
            path: path.clone(),
            ignored_at: Utc::now(),
            size_at_ignore: observed.map(|s| s.size).unwrap_or(0),
            mtime_at_ignore: observed.map(|s| s.mtime),
        };
        self.mutate(|snap| {
            snap.ignored.insert(path, entry.clone());
        })?;
        tracing::info!(path = %entry.path, "ignore added");
        Ok(entry)
    }

    /// Remove an ignore entry. Returns whether one existed.
    pub fn remove_ignore(&self, path: &str) -> Result<bool> {
        let path = normalize_relative(path).map_err(|e| Error::InvalidPath(e.to_string()))?;
        if !self.state.read().snapshot.ignored.contains_key(&path) {
            return Ok(false);
        }
        let mut removed = false;
        self.mutate(|snap| {
            removed = snap.ignored.remove(&path).is_some();
        })?;
        if removed {
            tracing::info!(path = %path, "ignore removed");
        }
        Ok(removed)
    }

    /// True when `path` is listed exactly or matched by an ignore glob.
    pub fn is_ignored(&self, path: &str) -> bool {
        let state = self.state.read();
        state.snapshot.ignored.contains_key(path)
            || state.globs.iter().any(|(_, m)| m.is_match(path))
    }

    pub fn list_ignored(&self) -> Vec<IgnoreEntry> {
        self.state.read().snapshot.ignored.values().cloned().collect()
    }

    pub fn ignored_count(&self) -> usize {
        self.state.read().snapshot.ignored.len()
    }

    fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut PolicySnapshot),
    {
        let mut state = self.state.write();
        let mut next = state.snapshot.clone();
        apply(&mut next);
        if let Err(e) = write_snapshot(&self.path, &next) {
            self.persist_failed.store(true, Ordering::SeqCst);
            tracing::error!(error = %e, "policy snapshot write failed");
            return Err(e);
        }
        self.persist_failed.store(false, Ordering::SeqCst);
        *state = PolicyState::new(next);
        Ok(())
    }
}

pub fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

fn compile_glob(pattern: &str) -> std::result::Result<GlobMatcher, globset::Error> {
    Ok(GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, PolicyStore) {
        let tmp = TempDir::new().unwrap();
        let store = PolicyStore::open(tmp.path().join("policy.json"));
        (tmp, store)
    }

    #[test]
    fn unmatched_paths_default_to_readwrite() {
        let (_tmp, store) = store();
        assert_eq!(store.resolve_gate("anything/x.md"), GateMode::ReadWrite);
    }

    #[test]
    fn longest_prefix_wins() {
        let (_tmp, store) = store();
        store.set_gate("journal", "readonly").unwrap();
        store.set_gate("journal/drafts", "readwrite").unwrap();

        assert_eq!(store.resolve_gate("journal/a.md"), GateMode::ReadOnly);
        assert_eq!(store.resolve_gate("journal/drafts/b.md"), GateMode::ReadWrite);
        assert_eq!(store.resolve_gate("journalism/c.md"), GateMode::ReadWrite);
    }

    #[test]
    fn last_write_wins_for_same_directory() {
        let (_tmp, store) = store();
        store.set_gate("journal/", "readonly").unwrap();
        store.set_gate("journal", "readwrite").unwrap();
        assert_eq!(store.list_gates().len(), 1);
        assert_eq!(store.resolve_gate("journal/a.md"), GateMode::ReadWrite);
    }

    #[test]
    fn invalid_mode_and_paths_rejected() {
        let (_tmp, store) = store();
        assert!(matches!(
            store.set_gate("journal", "rw"),
            Err(Error::InvalidMode(_))
        ));
        assert!(matches!(
            store.set_gate("/etc", "readonly"),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            store.set_gate("a/../b", "readonly"),
            Err(Error::InvalidPath(_))
        ));
        assert_eq!(store.gate_count(), 0);
    }

    #[test]
    fn remove_gate_is_idempotent() {
        let (_tmp, store) = store();
        store.set_gate("journal", "readonly").unwrap();
        assert!(store.remove_gate("journal").unwrap());
        assert!(!store.remove_gate("journal").unwrap());
        assert_eq!(store.resolve_gate("journal/a.md"), GateMode::ReadWrite);
    }

    #[test]
    fn exact_and_glob_ignores() {
        let (_tmp, store) = store();
        store.add_ignore("notes/secret.md", None).unwrap();
        store.add_ignore("scratch/*", None).unwrap();

        assert!(store.is_ignored("notes/secret.md"));
        assert!(!store.is_ignored("notes/public.md"));
        assert!(store.is_ignored("scratch/temp.md"));
        assert!(!store.is_ignored("scratch/deep/temp.md"));

        assert!(store.remove_ignore("scratch/*").unwrap());
        assert!(!store.is_ignored("scratch/temp.md"));
    }

    #[test]
    fn ignore_records_observed_stamp() {
        let (_tmp, store) = store();
        let entry = store
            .add_ignore("a.md", Some(FileStamp { size: 12, mtime: 99 }))
            .unwrap();
        assert_eq!(entry.size_at_ignore, 12);
        assert_eq!(entry.mtime_at_ignore, Some(99));
    }

    #[test]
    fn state_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.json");
        {
            let store = PolicyStore::open(&path);
            store.set_gate("journal", "readonly").unwrap();
            store.add_ignore("scratch/*", None).unwrap();
        }
        let reopened = PolicyStore::open(&path);
        assert_eq!(reopened.resolve_gate("journal/a.md"), GateMode::ReadOnly);
        assert!(reopened.is_ignored("scratch/x.md"));
    }

    #[test]
    fn corrupt_file_yields_empty_policy() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.json");
        std::fs::write(&path, "[[[").unwrap();
        let store = PolicyStore::open(&path);
        assert_eq!(store.gate_count(), 0);
        assert_eq!(store.ignored_count(), 0);
    }
}
