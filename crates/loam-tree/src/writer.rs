//! Writing documents.
//!
//! Every document write goes through [`DocumentStore::write_tree`]: the file
//! is written first and only a successful write updates the index and drops
//! stale cache entries. A failed write leaves the index as it was.

use std::path::PathBuf;

use loam_index::UpsertReport;
use loam_types::{migrate_tree, DocumentTree, NodeType};
use serde::Serialize;
use tracing::{debug, error};

use crate::error::{TreeError, TreeResult};
use crate::lock::{locked_write, FileGuard};
use crate::store::DocumentStore;

/// Outcome of one document write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub file: PathBuf,
    pub bytes_written: u64,
    pub index: UpsertReport,
}

/// Remove NUL bytes and `\u0000` escapes from rendered output.
fn strip_nul(data: Vec<u8>) -> Vec<u8> {
    const ESCAPE: &[u8] = b"\\u0000";
    if !data.contains(&0) && !data.windows(ESCAPE.len()).any(|w| w == ESCAPE) {
        return data;
    }
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            0 => i += 1,
            b'\\' if data[i..].starts_with(ESCAPE) => {
                i += ESCAPE.len();
            }
            b'\\' if i + 1 < data.len() => {
                // An escaped character (possibly an escaped backslash) is kept whole.
                out.extend_from_slice(&data[i..i + 2]);
                i += 2;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

/// Bring a tree into the shape every written document has.
fn normalize(tree: &mut DocumentTree) {
    migrate_tree(tree);
    tree.root.node_type = NodeType::Document;
    tree.root.id = tree.id.to_string();
    tree.root.properties.insert("id".into(), tree.id.to_string());
    tree.root.properties.insert("type".into(), "doc".into());
    tree.ensure_not_empty();
}

impl DocumentStore {
    /// Write a document, then bring its index rows up to date.
    ///
    /// Empty documents get one empty paragraph. A tree with no hpath gets
    /// one derived from its ancestors before it is indexed.
    pub fn write_tree(&self, tree: &mut DocumentTree) -> TreeResult<WriteReport> {
        if tree.hpath.is_empty() {
            tree.hpath = self.build_hpath(&tree.box_id, &tree.path, tree.title())?;
        }
        let file = self.file_path(&tree.box_id, &tree.path);
        let guard = self.locks.acquire(&file)?;
        self.persist(tree, &guard)
    }

    /// Write, index and invalidate while the caller holds the file's path.
    pub(crate) fn persist(&self, tree: &mut DocumentTree, guard: &FileGuard<'_>) -> TreeResult<WriteReport> {
        normalize(tree);
        let file = guard.path().to_path_buf();
        let data = self
            .codec
            .render(tree, self.config.pretty)
            .map_err(|source| TreeError::Render {
                path: file.clone(),
                source,
            })?;
        let data = strip_nul(data);

        if let Some(dir) = file.parent() {
            std::fs::create_dir_all(dir).map_err(|source| TreeError::Write {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        if let Err(source) = locked_write(&file, &data) {
            error!(path = %file.display(), error = %source, "document write failed, index left unchanged");
            return Err(TreeError::Write { path: file, source });
        }

        let indexed = self.index.upsert_document(tree);
        self.invalidate_written(tree, indexed.as_ref().ok());
        let report = indexed?;

        debug!(
            root = %tree.id,
            path = %file.display(),
            bytes = data.len(),
            mutations = report.mutations(),
            "document written"
        );
        Ok(WriteReport {
            file,
            bytes_written: data.len() as u64,
            index: report,
        })
    }

    /// Drop every cache entry a write of `tree` can make stale: its own
    /// blocks, the definitions it references now, the back-reference sets
    /// that listed one of its blocks, and whatever the index upsert touched.
    pub fn invalidate_written(&self, tree: &DocumentTree, report: Option<&UpsertReport>) {
        let own = tree.block_ids();
        let mut stale = own.clone();
        stale.extend(tree.outgoing_refs().into_iter().map(|r| r.def_block_id));
        if let Some(report) = report {
            stale.extend(report.touched_ids.iter().cloned());
        }
        self.cache.invalidate_many(&stale);
        self.cache.invalidate_referrers(&own);
    }

    /// Remove every index row of one document and drop its cached blocks.
    /// The file itself is left alone. Returns the removed block IDs.
    pub fn remove_document_index(&self, root_id: &str) -> TreeResult<Vec<String>> {
        let removed = self.index.remove_root(root_id)?;
        self.cache.invalidate_many(&removed);
        self.cache.invalidate(root_id);
        debug!(root = root_id, removed = removed.len(), "document index removed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::*;
    use loam_cache::CachedBlock;
    use loam_types::{Node, CURRENT_SPEC};

    #[test]
    fn write_creates_file_and_indexes() {
        let fx = fixture();
        let mut tree = doc("/20260101000000-top0001.sy", "Top", "hello");
        let report = fx.store.write_tree(&mut tree).unwrap();

        assert!(report.file.is_file());
        assert_eq!(report.bytes_written, std::fs::metadata(&report.file).unwrap().len());
        assert_eq!(report.index.inserted, 2);
        assert_eq!(tree.hpath, "/Top");

        let row = fx.store.index().get(tree.id.as_str()).unwrap().unwrap();
        assert_eq!(row.hpath, "/Top");
        assert_eq!(row.path, "/20260101000000-top0001.sy");
        assert!(row.is_document());
    }

    #[test]
    fn rewriting_unchanged_tree_touches_nothing() {
        let fx = fixture();
        let mut tree = doc("/20260101000000-top0001.sy", "Top", "hello");
        fx.store.write_tree(&mut tree).unwrap();
        let again = fx.store.write_tree(&mut tree).unwrap();
        assert_eq!(again.index.mutations(), 0);
    }

    #[test]
    fn empty_document_gets_a_paragraph() {
        let fx = fixture();
        let mut tree = DocumentTree::new_document(box1(), path("/empty.sy"), "/Empty", "Empty");
        tree.root.spec.clear();
        tree.root.properties.remove("type");
        fx.store.write_tree(&mut tree).unwrap();

        assert_eq!(tree.root.children.len(), 1);
        assert_eq!(tree.root.children[0].node_type, NodeType::Paragraph);
        assert_eq!(tree.root.spec, CURRENT_SPEC);
        assert_eq!(tree.root.properties["type"], "doc");
        assert_eq!(fx.store.index().by_root("empty").unwrap().len(), 2);
    }

    #[test]
    fn failed_write_leaves_index_untouched() {
        let fx = fixture();
        let mut tree = doc("/20260101000000-top0001.sy", "Top", "hello");
        // A directory where the file should be makes the write fail.
        std::fs::create_dir_all(fx.store.file_path(&tree.box_id, &tree.path)).unwrap();

        let err = fx.store.write_tree(&mut tree).unwrap_err();
        assert!(matches!(err, TreeError::Write { .. }));
        assert_eq!(fx.store.index().count_blocks().unwrap(), 0);
    }

    #[test]
    fn write_invalidates_cached_blocks() {
        let fx = fixture();
        let mut tree = doc("/20260101000000-top0001.sy", "Top", "hello");
        fx.store.write_tree(&mut tree).unwrap();
        let para_id = tree.root.children[0].id.clone();
        fx.store.cache().put_block(CachedBlock {
            id: para_id.clone(),
            root_id: tree.id.to_string(),
            box_id: "box1".into(),
            path: tree.path.to_string(),
            updated: String::new(),
            content: "hello".into(),
        });

        tree.root.children[0].children = vec![Node::text("changed")];
        fx.store.write_tree(&mut tree).unwrap();
        assert!(fx.store.cache().get_block(&para_id).is_none());
    }

    #[test]
    fn write_drops_backrefs_of_linked_definitions() {
        let fx = fixture();
        fx.store.cache().put_ref(loam_cache::BlockRef {
            block_id: "elsewhere".into(),
            root_id: "other".into(),
            box_id: "box1".into(),
            path: "/other.sy".into(),
            def_block_id: "target".into(),
            def_root_id: "target".into(),
            content: "old".into(),
        });
        let mut tree = doc("/src.sy", "Src", "");
        let mut mark = Node::new(NodeType::TextMark);
        mark.extra.insert("TextMarkType".into(), "block-ref".into());
        mark.extra.insert("TextMarkBlockRefID".into(), "target".into());
        tree.root.children[0].children.push(mark);

        fx.store.write_tree(&mut tree).unwrap();
        assert!(fx.store.cache().refs_for("target").is_none());
    }

    #[test]
    fn dropping_a_reference_invalidates_the_old_definition() {
        let fx = fixture();
        let mut tree = doc("/src.sy", "Src", "no link any more");
        fx.store.write_tree(&mut tree).unwrap();
        let para_id = tree.root.children[0].id.clone();
        fx.store.cache().put_ref(loam_cache::BlockRef {
            block_id: para_id,
            root_id: tree.id.to_string(),
            box_id: "box1".into(),
            path: tree.path.to_string(),
            def_block_id: "old-target".into(),
            def_root_id: "old-target".into(),
            content: "link".into(),
        });

        fx.store.invalidate_written(&tree, None);
        assert!(fx.store.cache().refs_for("old-target").is_none());
    }

    #[test]
    fn nul_characters_are_stripped() {
        let fx = fixture();
        let mut tree = doc("/nul.sy", "Nul", "a\0b");
        let report = fx.store.write_tree(&mut tree).unwrap();
        let text = std::fs::read_to_string(report.file).unwrap();
        assert!(!text.contains("\\u0000"));
        assert!(text.contains("ab"));
    }

    #[test]
    fn strip_nul_keeps_escaped_backslashes() {
        assert_eq!(strip_nul(b"a\\u0000b".to_vec()), b"ab");
        assert_eq!(strip_nul(b"a\\\\u0000b".to_vec()), b"a\\\\u0000b");
        assert_eq!(strip_nul(b"a\0b".to_vec()), b"ab");
        assert_eq!(strip_nul(b"plain".to_vec()), b"plain");
    }

    #[test]
    fn remove_document_index_drops_rows() {
        let fx = fixture();
        let mut tree = doc("/20260101000000-top0001.sy", "Top", "hello");
        fx.store.write_tree(&mut tree).unwrap();
        let removed = fx.store.remove_document_index(tree.id.as_str()).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(fx.store.index().get(tree.id.as_str()).unwrap().is_none());
        assert!(fx.store.exists(&tree.box_id, &tree.path));
    }
}
