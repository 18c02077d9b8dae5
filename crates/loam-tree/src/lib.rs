//! Loading and writing document trees.
//!
//! Documents live at `<data dir>/<box>/<path>` as one file each. A
//! [`DocumentStore`] binds one workspace's files to its pooled index and
//! tenant cache, and is the only place that writes document files, so the
//! order "file written, then index updated, then cache invalidated" holds for
//! every write.
//!
//! # Key Types
//!
//! - [`DocumentStore`] -- Load, batch load, write and reindex one workspace
//! - [`FileLocks`] -- Per-path lock table shared by every store in a process
//! - [`DocLocation`] -- A (box, path) pair naming one document file
//! - [`BatchLoad`] / [`BatchFailure`] -- Partial-failure batch results
//! - [`LoaderConfig`] -- Worker cap and output formatting

pub mod batch;
pub mod config;
pub mod error;
pub mod loader;
pub mod lock;
pub mod reindex;
pub mod store;
pub mod writer;

pub use batch::{BatchFailure, BatchLoad, DocLocation, LocationBatch};
pub use config::LoaderConfig;
pub use error::{TreeError, TreeResult};
pub use lock::{locked_read, locked_write, FileGuard, FileLocks};
pub use reindex::ReindexReport;
pub use store::DocumentStore;
pub use writer::WriteReport;
