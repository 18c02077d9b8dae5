//! Index rows describing where each block lives.

use serde::{Deserialize, Serialize};

use crate::block::BlockType;

/// One row of the block-tree index.
///
/// Maps a block ID to the document that owns it (`root_id`), its parent block,
/// the box and on-disk path of the document, and the human-readable path.
/// For the document block itself `id == root_id` and `parent_id` is empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockTreeEntry {
    pub id: String,
    pub root_id: String,
    pub parent_id: String,
    pub box_id: String,
    pub path: String,
    pub hpath: String,
    pub updated: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
}

impl BlockTreeEntry {
    /// Returns `true` if this row describes a document (root) block.
    pub fn is_document(&self) -> bool {
        self.block_type.is_document()
    }

    /// Returns `true` if any column the index diff compares differs.
    ///
    /// `root_id` is not compared: rows are always loaded per root, so a
    /// differing root shows up as a missing or extra row instead.
    pub fn differs_from(&self, other: &BlockTreeEntry) -> bool {
        self.id != other.id
            || self.updated != other.updated
            || self.block_type != other.block_type
            || self.path != other.path
            || self.box_id != other.box_id
            || self.hpath != other.hpath
            || self.parent_id != other.parent_id
    }
}
