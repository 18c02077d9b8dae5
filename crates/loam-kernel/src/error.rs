use std::path::PathBuf;

use loam_cache::CacheError;
use loam_index::IndexError;
use loam_pool::PoolError;
use loam_tree::{BatchFailure, TreeError};
use loam_types::TypeError;
use loam_workspace::WorkspaceError;
use thiserror::Error;

/// Errors surfaced by the kernel.
///
/// Lower-level errors are sorted into these kinds so callers can react to
/// the kind (retry, report capacity, show "not found") without matching on
/// every crate's error type.
#[derive(Debug, Error)]
pub enum KernelError {
    /// An expected lookup miss.
    #[error("not found: {0}")]
    NotFound(String),

    /// The workspace's index cannot serve requests.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// A per-process tenant ceiling was hit.
    #[error("too many tenants: {resource} limit of {limit} reached")]
    CapacityExceeded { resource: &'static str, limit: usize },

    /// Some documents of a batch failed to load.
    #[error("{} of {} documents failed to load", .failures.len() + .missing.len(), .failures.len() + .missing.len() + .loaded)]
    PartialBatchFailure {
        loaded: usize,
        failures: Vec<BatchFailure>,
        missing: Vec<String>,
    },

    /// A document file could not be written; the index was not updated.
    #[error("failed to write {path}: {reason}")]
    WriteFailure { path: PathBuf, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("{0}")]
    Internal(String),
}

impl KernelError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::IndexUnavailable(_))
    }

    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }

    /// One human-readable line for the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(what) => format!("{what} was not found"),
            Self::IndexUnavailable(_) => "the block index is being rebuilt, please try again shortly".to_string(),
            Self::CapacityExceeded { .. } => {
                "the server is serving too many workspaces right now, please try again later".to_string()
            }
            Self::PartialBatchFailure { .. } => format!("some documents could not be loaded: {self}"),
            Self::WriteFailure { path, reason } => {
                format!("could not save {}: {reason}", path.display())
            }
            Self::InvalidRequest(reason) => format!("invalid request: {reason}"),
            other => format!("storage error: {other}"),
        }
    }
}

impl From<IndexError> for KernelError {
    fn from(e: IndexError) -> Self {
        if e.is_unavailable() {
            Self::IndexUnavailable(e.to_string())
        } else {
            Self::Internal(e.to_string())
        }
    }
}

impl From<PoolError> for KernelError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::CapacityExceeded { limit } => Self::CapacityExceeded {
                resource: "index handle",
                limit,
            },
            PoolError::Index(e) => e.into(),
            PoolError::LockPoisoned(reason) => Self::Internal(reason),
        }
    }
}

impl From<CacheError> for KernelError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::CapacityExceeded { limit } => Self::CapacityExceeded {
                resource: "tenant cache",
                limit,
            },
            CacheError::LockPoisoned(reason) => Self::Internal(reason),
        }
    }
}

impl From<TreeError> for KernelError {
    fn from(e: TreeError) -> Self {
        match e {
            TreeError::NotFound { box_id, path } => Self::NotFound(format!("document {box_id}{path}")),
            TreeError::Write { path, source } => Self::WriteFailure {
                path,
                reason: source.to_string(),
            },
            TreeError::Index(e) => e.into(),
            TreeError::Invalid(e) => Self::InvalidRequest(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<TypeError> for KernelError {
    fn from(e: TypeError) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
