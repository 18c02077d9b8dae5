//! Error types for the index crate.

use std::path::PathBuf;

use rusqlite::ErrorCode;

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The store cannot serve requests (corrupt file, I/O failure, closed
    /// handle). Callers should reopen, which rebuilds the schema.
    #[error("index unavailable at {path}: {reason}")]
    Unavailable { path: PathBuf, reason: String },

    /// A statement failed for a reason unrelated to store health.
    #[error("index query failed: {0}")]
    Sql(rusqlite::Error),

    /// The store directory could not be prepared.
    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The connection lock was poisoned by a panicking holder.
    #[error("index lock poisoned: {0}")]
    LockPoisoned(String),
}

impl IndexError {
    /// Whether this error means the handle should be discarded and reopened.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::LockPoisoned(_))
    }

    /// Classify a SQLite error, tagging store-health failures as unavailable.
    pub(crate) fn from_sql(path: &std::path::Path, err: rusqlite::Error) -> Self {
        let unhealthy = matches!(
            err.sqlite_error_code(),
            Some(
                ErrorCode::DatabaseCorrupt
                    | ErrorCode::NotADatabase
                    | ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::ReadOnly
                    | ErrorCode::DiskFull
            )
        );
        if unhealthy {
            Self::Unavailable {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        } else {
            Self::Sql(err)
        }
    }
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
