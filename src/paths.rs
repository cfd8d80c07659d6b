//! Relative-path normalization.
//!
//! Every path that enters the system (API input, gate directories, ignore
//! entries, watcher events) is reduced to one canonical form: relative to the
//! indexed root, `/`-separated, no `.` segments, no empty segments, no
//! trailing slash. Anything absolute or containing `..` is refused before any
//! I/O happens.

use std::path::{Component, Path};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathIssue {
    Empty,
    Absolute,
    Traversal,
}

impl std::fmt::Display for PathIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathIssue::Empty => f.write_str("path is empty"),
            PathIssue::Absolute => f.write_str("path must be relative"),
            PathIssue::Traversal => f.write_str("path must not contain '..'"),
        }
    }
}

/// Normalize a user-supplied relative path.
pub fn normalize_relative(raw: &str) -> Result<String, PathIssue> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PathIssue::Empty);
    }
    let unified = trimmed.replace('\\', "/");
    if unified.starts_with('/') || Path::new(trimmed).is_absolute() || has_drive_prefix(&unified)
    {
        return Err(PathIssue::Absolute);
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(PathIssue::Traversal),
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        return Err(PathIssue::Empty);
    }
    Ok(parts.join("/"))
}

fn has_drive_prefix(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Convert a path under `root` into its canonical relative form.
///
/// Returns `None` for paths outside `root` or that do not map to a clean
/// relative path.
pub fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
            Component::CurDir => continue,
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// True when `path` equals `prefix` or lies below it, compared by whole
/// segments (`notes` covers `notes/a.md` but not `notes2/a.md`).
pub fn is_under(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}
