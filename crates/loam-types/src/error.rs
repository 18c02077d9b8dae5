use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid block id: {0:?}")]
    InvalidId(String),

    #[error("invalid box id: {0:?}")]
    InvalidBox(String),

    #[error("invalid document path: {0:?}")]
    InvalidPath(String),

    #[error("failed to parse document: {0}")]
    Parse(String),

    #[error("failed to render document: {0}")]
    Render(String),
}

/// Convenience alias for type-level results.
pub type TypeResult<T> = Result<T, TypeError>;
