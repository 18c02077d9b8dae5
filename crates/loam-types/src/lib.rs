//! Foundation types for loam, the storage and indexing core of a multi-tenant
//! block-document kernel.
//!
//! Every other loam crate depends on `loam-types`.
//!
//! # Key Types
//!
//! - [`BlockId`] -- Timestamp-prefixed block identifier (`20260125144733-f8giaqe`)
//! - [`BoxId`] -- Notebook (box) identifier, the top-level grouping of documents
//! - [`DocPath`] -- On-disk document path inside a box (`/<id>/<id>.sy`)
//! - [`BlockType`] -- Index abbreviation of a block kind (`d`, `p`, `h`, ...)
//! - [`BlockTreeEntry`] -- One index row describing where a block lives
//! - [`Node`] / [`DocumentTree`] -- The parsed document tree
//! - [`TreeCodec`] / [`JsonTreeCodec`] -- Canonical on-disk document form

pub mod block;
pub mod codec;
pub mod entry;
pub mod error;
pub mod hpath;
pub mod ids;
pub mod migrate;
pub mod tree;

pub use block::{BlockType, NodeType};
pub use codec::{JsonTreeCodec, TreeCodec};
pub use entry::BlockTreeEntry;
pub use error::{TypeError, TypeResult};
pub use hpath::{normalize_hpath, unescape_html, UNTITLED};
pub use ids::{BlockId, BoxId, DocPath, DOC_EXT};
pub use migrate::{migrate_tree, CURRENT_SPEC};
pub use tree::{DocumentTree, Node, OutgoingRef};
