//! Error taxonomy for indexing and the HTTP surface.
//!
//! Indexing-path errors ([`Error::FileRead`], [`Error::UnsupportedFileType`],
//! [`Error::EmbeddingServiceUnavailable`], ...) are logged by the watcher and
//! never stop it. API-path errors are mapped to a status code and a
//! `{error, detail}` body by the server.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read {path}: {reason}")]
    FileRead { path: String, reason: String },

    #[error("unsupported file type for {path}")]
    UnsupportedFileType { path: String },

    #[error("{path} is {size} bytes, over the {limit} byte limit")]
    FileTooLarge { path: String, size: u64, limit: u64 },

    #[error("embedding service unavailable: {0}")]
    EmbeddingServiceUnavailable(String),

    #[error("{path} is under a readonly gate")]
    GateViolation { path: String },

    #[error("path escapes the indexed root: {0}")]
    PathTraversal(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid gate mode '{0}', expected readonly or readwrite")]
    InvalidMode(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{path} is ignored")]
    Ignored { path: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("vector store failure: {0:#}")]
    Store(anyhow::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Stable machine-readable name, used as the `error` field of API bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::FileRead { .. } => "FileReadError",
            Error::UnsupportedFileType { .. } => "UnsupportedFileType",
            Error::FileTooLarge { .. } => "FileTooLarge",
            Error::EmbeddingServiceUnavailable(_) => "EmbeddingServiceUnavailable",
            Error::GateViolation { .. } => "GateViolation",
            Error::PathTraversal(_) => "PathTraversal",
            Error::InvalidPath(_) => "InvalidPathError",
            Error::InvalidMode(_) => "InvalidModeError",
            Error::BadRequest(_) => "BadRequest",
            Error::Ignored { .. } => "Ignored",
            Error::NotFound { .. } => "NotFound",
            Error::Conflict(_) => "Conflict",
            Error::Persist { .. } => "PersistenceFailure",
            Error::Store(_) => "VectorStoreFailure",
            Error::Config(_) => "ConfigError",
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(
            Error::GateViolation {
                path: "journal/a.md".into()
            }
            .kind(),
            "GateViolation"
        );
        assert_eq!(Error::InvalidMode("rw".into()).kind(), "InvalidModeError");
        assert_eq!(Error::not_found("document", "x.md").kind(), "NotFound");
    }

    #[test]
    fn display_includes_context() {
        let err = Error::FileTooLarge {
            path: "big.pdf".into(),
            size: 30,
            limit: 10,
        };
        assert_eq!(err.to_string(), "big.pdf is 30 bytes, over the 10 byte limit");
    }
}
