//! The loam storage kernel.
//!
//! Ties the per-workspace pieces together behind one facade: pooled
//! block-tree indexes, tenant caches, and document loading and writing,
//! plus the background sweeps that release idle tenants.
//!
//! # Key Types
//!
//! - [`Kernel`] -- Lookups, document I/O and administration for every workspace
//! - [`KernelConfig`] -- Pool, cache, loader and workspace settings (TOML)
//! - [`KernelError`] -- NotFound / IndexUnavailable / CapacityExceeded / ...
//! - [`TypedRequest`] -- Validated request structs built from loose JSON
//! - [`SweeperHandle`] -- Running idle sweeps

pub mod config;
pub mod error;
pub mod kernel;
pub mod request;
pub mod sweeper;

pub use config::{KernelConfig, WorkspaceConfig};
pub use error::{KernelError, KernelResult};
pub use kernel::{BatchLoadExt, Kernel, SweepReport};
pub use request::{
    BatchLoadRequest, BlockLookupRequest, LoadTreeRequest, PathLookupRequest, PathTarget, TypedRequest,
};
pub use sweeper::{IdleSweep, SweeperHandle};

pub use loam_tree::{BatchFailure, BatchLoad, ReindexReport, WriteReport};
pub use loam_types::{BlockId, BlockTreeEntry, BoxId, DocPath, DocumentTree};
pub use loam_workspace::{TaskId, WorkspaceDescriptor, WorkspaceKey};
