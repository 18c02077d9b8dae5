//! Connection pool for per-workspace block-tree indexes.
//!
//! One process serves many tenants; each tenant's index is opened on first
//! use, shared by every unit of work for that tenant, and closed after it has
//! been idle for a while. The number of open handles is capped.
//!
//! # Key Types
//!
//! - [`ConnectionPool`] -- Get-or-create, idle sweep, close and reopen
//! - [`PoolConfig`] -- Ceiling, idle timeout, sweep interval, SQLite tuning
//! - [`PoolStats`] / [`HandleStats`] -- Administrative snapshot

pub mod config;
pub mod error;
pub mod pool;

pub use config::PoolConfig;
pub use error::{PoolError, PoolResult};
pub use pool::{ConnectionPool, HandleStats, PoolStats};
