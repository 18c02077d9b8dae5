//! Error types for the cache manager.

/// Errors that can occur while obtaining a tenant cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Every tenant slot is held by a recently used or borrowed cache.
    #[error("too many tenants: cache manager is at its limit of {limit} tenant caches")]
    CapacityExceeded { limit: usize },

    /// The manager lock was poisoned by a panicking holder.
    #[error("cache manager lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Convenience alias for cache results.
pub type CacheResult<T> = Result<T, CacheError>;
