//! Core data models shared by the policy store, registry, indexer and API.
//!
//! Paths in every model are relative to the indexed root and use `/` as the
//! separator, whatever the host platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Whether files under a gated directory may be deleted through the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    ReadOnly,
    ReadWrite,
}

impl GateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateMode::ReadOnly => "readonly",
            GateMode::ReadWrite => "readwrite",
        }
    }
}

impl fmt::Display for GateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GateMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "readonly" => Ok(GateMode::ReadOnly),
            "readwrite" => Ok(GateMode::ReadWrite),
            _ => Err(Error::InvalidMode(s.to_string())),
        }
    }
}

/// A directory-level policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub directory: String,
    pub mode: GateMode,
    pub set_at: DateTime<Utc>,
}

/// A file (or glob) excluded from indexing. The file on disk is untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgnoreEntry {
    pub path: String,
    pub ignored_at: DateTime<Utc>,
    /// Size of the file when the entry was added; 0 for globs or missing files.
    pub size_at_ignore: u64,
    /// Unix milliseconds; `None` for globs or missing files.
    pub mtime_at_ignore: Option<i64>,
}

/// Size and mtime observed for a file at some moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    pub size: u64,
    /// Unix milliseconds.
    pub mtime: i64,
}

impl FileStamp {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self {
            size: meta.len(),
            mtime,
        }
    }
}

/// Registry entry: what is currently indexed for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub path: String,
    pub chunk_count: usize,
    pub size_bytes: u64,
    /// The file's mtime at indexing time, Unix milliseconds.
    pub mtime: i64,
    pub indexed_at: DateTime<Utc>,
}

/// A window of document text, the unit of embedding and storage.
///
/// `id` is derived from the document path and `chunk_index` only, so
/// re-indexing an unchanged file reproduces the same ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub doc_path: String,
    pub chunk_index: usize,
    pub text: String,
    /// Character offset of the window within the extracted text.
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Modified,
    Deleted,
}

/// A filesystem notification waiting out its debounce window.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub path: String,
    pub event_type: EventKind,
    pub last_seen: tokio::time::Instant,
}

/// One ranked chunk returned by a search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Snippet of the matching chunk.
    pub entry: String,
    /// Path of the containing document.
    pub file: String,
    pub score: f32,
}
