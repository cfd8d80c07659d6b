//! JSON snapshot files.
//!
//! The policy store and the document registry each own one snapshot file.
//! Writes go to a sibling `*.tmp` file and are renamed into place, so a crash
//! mid-write leaves the previous snapshot intact. A snapshot that fails to
//! parse on load is treated as empty state with a warning.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::error::{Error, Result};

/// Load a snapshot, falling back to `T::default()` when the file is missing,
/// unreadable or corrupt.
pub fn load_snapshot<T>(path: &Path, label: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "{label} unreadable, starting empty");
            return T::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "{label} corrupt, starting empty");
            T::default()
        }
    }
}

/// Atomically replace the snapshot at `path` with `value`.
pub fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let persist_err = |source| Error::Persist {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(persist_err)?;
        }
    }

    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| persist_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes).map_err(persist_err)?;
    std::fs::rename(&tmp, path).map_err(persist_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_default() {
        let tmp = TempDir::new().unwrap();
        let loaded: BTreeMap<String, u32> = load_snapshot(&tmp.path().join("none.json"), "test");
        assert!(loaded.is_empty());
    }

    #[test]
    fn corrupt_file_loads_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, b"{not json").unwrap();
        let loaded: BTreeMap<String, u32> = load_snapshot(&path, "test");
        assert!(loaded.is_empty());
    }

    #[test]
    fn write_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("state.json");
        let mut value = BTreeMap::new();
        value.insert("a".to_string(), 1u32);
        write_snapshot(&path, &value).unwrap();

        let loaded: BTreeMap<String, u32> = load_snapshot(&path, "test");
        assert_eq!(loaded, value);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
