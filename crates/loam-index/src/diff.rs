//! Change detection between stored rows and a freshly parsed document.

use std::collections::{HashMap, HashSet};

use loam_types::BlockTreeEntry;
use serde::{Deserialize, Serialize};

/// Rows to write for one document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexDiff {
    /// New or changed rows; existing rows with these IDs are replaced.
    pub upserts: Vec<BlockTreeEntry>,
    /// IDs of stored rows whose blocks no longer exist in the document.
    pub removals: Vec<String>,
}

impl IndexDiff {
    /// Returns `true` if nothing needs to be written.
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }

    /// Every block ID whose row is touched by this diff.
    pub fn touched_ids(&self) -> Vec<String> {
        self.upserts
            .iter()
            .map(|e| e.id.clone())
            .chain(self.removals.iter().cloned())
            .collect()
    }
}

/// Compute the rows that differ between `existing` (stored for one root) and
/// `fresh` (from the parsed document, in document order).
///
/// A changed block drags its descendants along so that moved subtrees get
/// their parent links rewritten.
pub fn compute_diff(existing: &[BlockTreeEntry], fresh: &[BlockTreeEntry]) -> IndexDiff {
    let stored: HashMap<&str, &BlockTreeEntry> =
        existing.iter().map(|e| (e.id.as_str(), e)).collect();

    let mut changed: HashSet<&str> = HashSet::new();
    let mut upserts = Vec::new();
    for entry in fresh {
        let dirty = match stored.get(entry.id.as_str()) {
            None => true,
            Some(old) => old.differs_from(entry),
        };
        if dirty || changed.contains(entry.parent_id.as_str()) {
            changed.insert(entry.id.as_str());
            upserts.push(entry.clone());
        }
    }

    let live: HashSet<&str> = fresh.iter().map(|e| e.id.as_str()).collect();
    let removals = existing
        .iter()
        .filter(|e| !live.contains(e.id.as_str()))
        .map(|e| e.id.clone())
        .collect();

    IndexDiff { upserts, removals }
}

/// Outcome of a diff-upsert.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertReport {
    pub root_id: String,
    /// Rows inserted.
    pub inserted: usize,
    /// Rows deleted (replaced rows count here as well).
    pub deleted: usize,
    /// Block IDs whose cached content is now stale.
    pub touched_ids: Vec<String>,
}

impl UpsertReport {
    /// Total row mutations.
    pub fn mutations(&self) -> usize {
        self.inserted + self.deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_types::BlockType;

    fn row(id: &str, parent: &str, updated: &str) -> BlockTreeEntry {
        BlockTreeEntry {
            id: id.into(),
            root_id: "doc".into(),
            parent_id: parent.into(),
            box_id: "box".into(),
            path: "/doc.sy".into(),
            hpath: "/Doc".into(),
            updated: updated.into(),
            block_type: if parent.is_empty() {
                BlockType::document()
            } else {
                BlockType::from_abbr("p")
            },
        }
    }

    fn doc() -> Vec<BlockTreeEntry> {
        vec![
            row("doc", "", "1"),
            row("list", "doc", "1"),
            row("item", "list", "1"),
            row("para", "doc", "1"),
        ]
    }

    #[test]
    fn unchanged_document_yields_empty_diff() {
        let diff = compute_diff(&doc(), &doc());
        assert!(diff.is_empty());
    }

    #[test]
    fn new_document_upserts_everything() {
        let diff = compute_diff(&[], &doc());
        assert_eq!(diff.upserts.len(), 4);
        assert!(diff.removals.is_empty());
    }

    #[test]
    fn changed_block_brings_descendants() {
        let mut fresh = doc();
        fresh[1].updated = "2".into();
        let diff = compute_diff(&doc(), &fresh);
        let ids: Vec<&str> = diff.upserts.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["list", "item"]);
    }

    #[test]
    fn vanished_blocks_are_removed() {
        let mut fresh = doc();
        fresh.pop();
        let diff = compute_diff(&doc(), &fresh);
        assert!(diff.upserts.is_empty());
        assert_eq!(diff.removals, vec!["para".to_string()]);
        assert_eq!(diff.touched_ids(), vec!["para".to_string()]);
    }

    #[test]
    fn reparented_block_is_rewritten() {
        let mut fresh = doc();
        fresh[3].parent_id = "item".into();
        let diff = compute_diff(&doc(), &fresh);
        assert_eq!(diff.upserts.len(), 1);
        assert_eq!(diff.upserts[0].id, "para");
    }
}
