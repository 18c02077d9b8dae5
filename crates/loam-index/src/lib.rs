//! Embedded relational index of block locations.
//!
//! Each workspace keeps one SQLite file with a `blocktrees` table mapping
//! every block ID to its document, parent, box, path and hpath. The table is
//! a derived artifact: the document files are the source of truth, and a
//! missing or corrupt store is dropped and recreated rather than reported.
//!
//! # Key Types
//!
//! - [`BlockTreeIndex`] -- One workspace's index handle
//! - [`IndexOptions`] -- Busy timeout and slow-query threshold
//! - [`BootState`] -- Whether the store was reused, created or recovered
//! - [`IndexDiff`] -- Rows to replace and remove for one document
//! - [`UpsertReport`] -- Row mutations performed by a diff-upsert

pub mod diff;
pub mod error;
pub mod index;
pub mod schema;

pub use diff::{compute_diff, IndexDiff, UpsertReport};
pub use error::{IndexError, IndexResult};
pub use index::{BlockTreeIndex, BootState, IndexOptions};
