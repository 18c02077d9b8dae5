//! Error types for workspace resolution.

use std::path::PathBuf;

use crate::registry::TaskId;

/// Errors that can occur while preparing or resolving workspaces.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// A workspace directory could not be created.
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A context is already attached to this task.
    #[error("task {0} already has an attached workspace")]
    AlreadyAttached(TaskId),

    /// No tenant with this ID has been registered.
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    /// A registry lock was poisoned by a panicking holder.
    #[error("workspace registry lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Convenience alias for workspace results.
pub type WorkspaceResult<T> = Result<T, WorkspaceError>;
