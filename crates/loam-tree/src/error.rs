//! Error types for tree loading and writing.

use std::path::PathBuf;

use loam_index::IndexError;
use loam_types::TypeError;

/// Errors that can occur while loading or writing documents.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// The document file does not exist.
    #[error("document not found: {box_id}{path}")]
    NotFound { box_id: String, path: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file was not (completely) written; the index was left untouched.
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: TypeError,
    },

    #[error("failed to render {path}: {source}")]
    Render {
        path: PathBuf,
        #[source]
        source: TypeError,
    },

    /// An identifier or path taken from the index or a file name is malformed.
    #[error("invalid location: {0}")]
    Invalid(#[from] TypeError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("failed to scan {path}: {reason}")]
    Scan { path: PathBuf, reason: String },

    #[error("failed to start load workers: {0}")]
    WorkerPool(String),

    #[error("file lock table poisoned: {0}")]
    LockPoisoned(String),
}

impl TreeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias for tree results.
pub type TreeResult<T> = Result<T, TreeError>;
