//! Overlapping fixed-window text chunker.
//!
//! Splits extracted document text into [`Chunk`]s of `chunk_chars`
//! characters, each window starting `chunk_chars - overlap_chars` characters
//! after the previous one. Windows are measured in `char`s, never bytes, so
//! multi-byte text is never split inside a code point.
//!
//! Chunk ids are `sha256(doc_path)[..32] + "-" + chunk_index`: a pure function
//! of the path and position, so re-indexing an unchanged file reproduces the
//! exact same ids and an upsert never accumulates duplicates.
//!
//! # Example
//!
//! ```rust
//! use notegate::chunk::chunk_text;
//!
//! let text = "x".repeat(2200);
//! let chunks = chunk_text("journal/a.md", &text, 1000, 200);
//! assert_eq!(chunks.len(), 3);
//! assert_eq!(chunks[1].offset, 800);
//! ```

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Split `text` into overlapping windows.
///
/// - Empty or whitespace-only text yields no chunks.
/// - Text no longer than `chunk_chars` yields exactly one chunk.
/// - The last window ends exactly at the end of the text.
/// - Indices are contiguous from 0.
pub fn chunk_text(doc_path: &str, text: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    if text.trim().is_empty() || chunk_chars == 0 {
        return Vec::new();
    }

    let step = chunk_chars.saturating_sub(overlap_chars).max(1);
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = boundaries.len() - 1;
    let prefix = path_hash(doc_path);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + chunk_chars).min(total_chars);
        let index = chunks.len();
        chunks.push(Chunk {
            id: chunk_id(&prefix, index),
            doc_path: doc_path.to_string(),
            chunk_index: index,
            text: text[boundaries[start]..boundaries[end]].to_string(),
            offset: start,
        });
        if end == total_chars {
            break;
        }
        start += step;
    }
    chunks
}

/// Hex SHA-256 prefix identifying a document path.
pub fn path_hash(doc_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc_path.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

fn chunk_id(prefix: &str, index: usize) -> String {
    format!("{}-{}", prefix, index)
}
