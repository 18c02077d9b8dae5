//! Workspace contexts for loam.
//!
//! A workspace is one tenant's isolated data root. Every storage operation
//! receives a [`WorkspaceDescriptor`] explicitly. Call sites that cannot yet
//! pass one resolve it through the [`ContextRegistry`], which keys attached
//! contexts by a dispatcher-issued [`TaskId`] instead of ambient global state.
//!
//! # Key Types
//!
//! - [`WorkspaceDescriptor`] -- Immutable paths and identity of one workspace
//! - [`WorkspaceKey`] -- Pool/cache key derived from the workspace root
//! - [`WorkspaceLayout`] -- Directory names under a workspace root
//! - [`TaskId`] -- Identifier of one unit of work (UUID v7)
//! - [`ContextRegistry`] / [`ContextGuard`] -- Task-scoped attach with guaranteed detach
//!
//! # Resolution Order
//!
//! 1. The context attached to the calling task
//! 2. The current-tenant pointer set at task start
//! 3. The registry's default (single-tenant mode)

pub mod descriptor;
pub mod error;
pub mod registry;

pub use descriptor::{TenantIdentity, WorkspaceDescriptor, WorkspaceKey, WorkspaceLayout};
pub use error::{WorkspaceError, WorkspaceResult};
pub use registry::{ContextGuard, ContextRegistry, TaskId};
