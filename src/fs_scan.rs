//! Filesystem walk over the indexed root.
//!
//! Produces the sorted list of files the indexer should know about, filtered
//! by the `[index]` include/exclude globs. Version-control and build
//! directories are always excluded, as is the state directory when it sits
//! inside the root.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::IndexConfig;
use crate::models::FileStamp;
use crate::paths::relative_to;

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/target/**",
    "**/node_modules/**",
    "**/.notegate/**",
];

/// A file found by [`scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: String,
    pub stamp: FileStamp,
}

/// Include/exclude filter on root-relative paths.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl ScanFilter {
    pub fn new(config: &IndexConfig, extra_excludes: &[String]) -> Result<Self> {
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.exclude_globs.iter().cloned());
        excludes.extend(extra_excludes.iter().cloned());
        Ok(Self {
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
        })
    }

    pub fn matches(&self, rel_path: &str) -> bool {
        !self.exclude.is_match(rel_path) && self.include.is_match(rel_path)
    }
}

/// Exclude glob for a state directory located under `root`, if it is.
pub fn state_dir_exclude(root: &Path, state_dir: &Path) -> Option<String> {
    let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let state = absolute(state_dir);
    relative_to(&root, &state).map(|rel| format!("{rel}/**"))
}

fn absolute(path: &Path) -> PathBuf {
    if let Ok(p) = std::fs::canonicalize(path) {
        return p;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Walk `root` and return every matching regular file, sorted by path.
pub fn scan(root: &Path, filter: &ScanFilter, follow_symlinks: bool) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry during scan");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Some(rel_path) = relative_to(root, entry.path()) else {
            continue;
        };
        if !filter.matches(&rel_path) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %rel_path, error = %e, "cannot stat file during scan");
                continue;
            }
        };
        files.push(ScannedFile {
            path: rel_path,
            stamp: FileStamp::from_metadata(&metadata),
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn index_config(root: &Path) -> IndexConfig {
        IndexConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*".to_string()],
            exclude_globs: vec!["**/*.tmp".to_string()],
            max_file_bytes: 1024,
            follow_symlinks: false,
        }
    }

    #[test]
    fn scan_is_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("journal")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("journal/b.md"), "b").unwrap();
        std::fs::write(root.join("a.md"), "a").unwrap();
        std::fs::write(root.join("draft.tmp"), "x").unwrap();
        std::fs::write(root.join(".git/config"), "x").unwrap();

        let filter = ScanFilter::new(&index_config(root), &[]).unwrap();
        let files = scan(root, &filter, false).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "journal/b.md"]);
        assert_eq!(files[0].stamp.size, 1);
    }

    #[test]
    fn state_dir_inside_root_is_excluded() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("state")).unwrap();
        std::fs::write(root.join("state/registry.json"), "{}").unwrap();
        std::fs::write(root.join("a.md"), "a").unwrap();

        let extra: Vec<String> = state_dir_exclude(root, &root.join("state")).into_iter().collect();
        assert_eq!(extra, vec!["state/**".to_string()]);

        let filter = ScanFilter::new(&index_config(root), &extra).unwrap();
        let files = scan(root, &filter, false).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn state_dir_outside_root_adds_nothing() {
        let root = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        assert_eq!(state_dir_exclude(root.path(), state.path()), None);
    }
}
