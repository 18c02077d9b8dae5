//! Error types for the connection pool.

use loam_index::IndexError;

/// Errors that can occur while borrowing a pooled index.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Every slot is held by a recently used or borrowed handle.
    #[error("too many tenants: connection pool is at its limit of {limit} handles")]
    CapacityExceeded { limit: usize },

    /// Opening the workspace's index failed.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// The pool lock was poisoned by a panicking holder.
    #[error("connection pool lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Convenience alias for pool results.
pub type PoolResult<T> = Result<T, PoolError>;
