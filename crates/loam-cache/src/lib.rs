//! Per-tenant in-memory caches.
//!
//! Each workspace gets one [`TenantCache`]: a cost-bounded cache of block
//! content and a TTL-bounded cache of back-reference sets keyed by the
//! definition block they point at. The reference cache is a derived view of
//! the document trees; it is invalidated explicitly and rebuilt on demand.
//!
//! # Key Types
//!
//! - [`TenantCacheManager`] -- Get-or-create, clear, invalidate, idle sweep
//! - [`TenantCache`] -- One tenant's block and reference caches
//! - [`CachedBlock`] / [`BlockRef`] -- Cached values
//! - [`CacheConfig`] -- Ceilings, budgets and timeouts

pub mod config;
pub mod error;
pub mod manager;
pub mod tenant;

pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use manager::{CacheManagerStats, TenantCacheManager};
pub use tenant::{BlockRef, CachedBlock, RefSet, TenantCache, TenantCacheStats};
