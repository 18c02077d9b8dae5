//! Loading single documents.

use loam_types::{migrate_tree, unescape_html, BoxId, DocPath, DocumentTree, UNTITLED};
use tracing::{debug, info, warn};

use crate::error::{TreeError, TreeResult};
use crate::lock::locked_read;
use crate::store::DocumentStore;

fn display_title(raw: &str) -> String {
    let title = unescape_html(raw);
    if title.trim().is_empty() {
        UNTITLED.to_string()
    } else {
        title
    }
}

impl DocumentStore {
    /// Load and parse one document.
    ///
    /// Old-format trees are migrated, a root ID that disagrees with the file
    /// name is reset to the file name, and either repair is written back. The
    /// hpath is rebuilt from ancestor titles; missing ancestors are created
    /// as untitled placeholders.
    pub fn load_tree(&self, box_id: &BoxId, path: &DocPath) -> TreeResult<DocumentTree> {
        let file = self.file_path(box_id, path);
        let bytes = self.read_bytes(box_id, path)?;
        let mut tree = self
            .codec
            .parse(&bytes, box_id, path)
            .map_err(|source| TreeError::Parse { path: file, source })?;

        let mut repaired = migrate_tree(&mut tree);
        if tree.root.id != tree.id.as_str() {
            warn!(
                path = %path,
                found = %tree.root.id,
                expected = %tree.id,
                "document ID does not match file name, resetting"
            );
            tree.root.id = tree.id.to_string();
            tree.root.properties.insert("id".into(), tree.id.to_string());
            repaired = true;
        }

        tree.hpath = self.build_hpath(box_id, path, tree.title())?;

        if repaired {
            info!(root = %tree.id, path = %path, "writing back repaired document");
            self.write_tree(&mut tree)?;
        }
        debug!(root = %tree.id, hpath = %tree.hpath, "document loaded");
        Ok(tree)
    }

    /// Human-readable path of the document at `path` whose own title is
    /// `title`: the titles of each ancestor and then its own, joined by `/`.
    pub(crate) fn build_hpath(&self, box_id: &BoxId, path: &DocPath, title: &str) -> TreeResult<String> {
        let mut hpath = String::new();
        for ancestor in path.ancestors() {
            let title = match self.ancestor_title(box_id, &ancestor)? {
                Some(title) => title,
                None => self.create_placeholder(box_id, &ancestor, &hpath)?,
            };
            hpath.push('/');
            hpath.push_str(&title);
        }
        hpath.push('/');
        hpath.push_str(&display_title(title));
        Ok(hpath)
    }

    /// Title of an existing ancestor, or `None` if its file is missing.
    fn ancestor_title(&self, box_id: &BoxId, ancestor: &DocPath) -> TreeResult<Option<String>> {
        let bytes = match self.read_bytes(box_id, ancestor) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(self.title_of(ancestor, &bytes)))
    }

    fn title_of(&self, path: &DocPath, bytes: &[u8]) -> String {
        match self.codec.parse_properties(bytes) {
            Ok(props) => display_title(props.get("title").map(String::as_str).unwrap_or("")),
            Err(e) => {
                // A damaged ancestor is left for the user; only its title is lost.
                warn!(path = %path, error = %e, "unreadable ancestor document");
                UNTITLED.to_string()
            }
        }
    }

    /// Create an untitled document at a missing ancestor path and return
    /// the title to use for it.
    fn create_placeholder(&self, box_id: &BoxId, ancestor: &DocPath, parent_hpath: &str) -> TreeResult<String> {
        let file = self.file_path(box_id, ancestor);
        let guard = self.locks.acquire(&file)?;
        // Another loader may have created it while this one walked up.
        if file.is_file() {
            let bytes = locked_read(&file).map_err(|source| TreeError::Read {
                path: file.clone(),
                source,
            })?;
            return Ok(self.title_of(ancestor, &bytes));
        }

        let hpath = format!("{parent_hpath}/{UNTITLED}");
        let mut placeholder = DocumentTree::new_document(box_id.clone(), ancestor.clone(), hpath, UNTITLED);
        info!(box_id = %box_id, path = %ancestor, "parent document missing, creating untitled placeholder");
        self.persist(&mut placeholder, &guard).inspect_err(|e| {
            warn!(path = %ancestor, error = %e, "could not create placeholder document");
        })?;
        Ok(UNTITLED.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::*;
    use loam_types::NodeType;
    use loam_types::TreeCodec;

    #[test]
    fn missing_file_is_not_found() {
        let fx = fixture();
        let err = fx.store.load_tree(&box1(), &path("/nope.sy")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let fx = fixture();
        put_raw(&fx.store, "/bad.sy", b"{ not json");
        let err = fx.store.load_tree(&box1(), &path("/bad.sy")).unwrap_err();
        assert!(matches!(err, TreeError::Parse { .. }));
    }

    #[test]
    fn hpath_follows_ancestor_titles() {
        let fx = fixture();
        fx.store.write_tree(&mut doc("/a.sy", "Alpha", "x")).unwrap();
        fx.store.write_tree(&mut doc("/a/b.sy", "Beta &amp; Co", "x")).unwrap();
        fx.store.write_tree(&mut doc("/a/b/c.sy", "", "x")).unwrap();

        let tree = fx.store.load_tree(&box1(), &path("/a/b/c.sy")).unwrap();
        assert_eq!(tree.hpath, "/Alpha/Beta & Co/Untitled");
        assert_eq!(tree.id.as_str(), "c");
    }

    #[test]
    fn missing_parent_becomes_untitled_placeholder() {
        let fx = fixture();
        let child = doc("/A/child.sy", "Child", "x");
        let bytes = loam_types::JsonTreeCodec.render(&child, false).unwrap();
        put_raw(&fx.store, "/A/child.sy", &bytes);

        let tree = fx.store.load_tree(&box1(), &path("/A/child.sy")).unwrap();
        assert_eq!(tree.hpath, "/Untitled/Child");

        assert!(fx.store.exists(&box1(), &path("/A.sy")));
        let parent = fx.store.load_tree(&box1(), &path("/A.sy")).unwrap();
        assert_eq!(parent.title(), UNTITLED);
        assert_eq!(parent.hpath, "/Untitled");
        assert_eq!(parent.root.children.len(), 1);

        let row = fx.store.index().get("A").unwrap().unwrap();
        assert_eq!(row.hpath, "/Untitled");
        assert_eq!(row.path, "/A.sy");
    }

    #[cfg(unix)]
    #[test]
    fn unwritable_placeholder_fails_the_load() {
        let fx = fixture();
        let child = doc("/A/child.sy", "Child", "x");
        let bytes = loam_types::JsonTreeCodec.render(&child, false).unwrap();
        put_raw(&fx.store, "/A/child.sy", &bytes);
        // A dangling link into a missing directory cannot be written through.
        let parent = fx.store.file_path(&box1(), &path("/A.sy"));
        std::os::unix::fs::symlink(fx.dir.path().join("missing/target.sy"), &parent).unwrap();

        let err = fx.store.load_tree(&box1(), &path("/A/child.sy")).unwrap_err();
        assert!(matches!(err, TreeError::Write { .. }), "{err}");
        assert!(fx.store.index().get("A").unwrap().is_none());
    }

    #[test]
    fn mismatched_root_id_is_reset_and_written_back() {
        let fx = fixture();
        let mut tree = doc("/right.sy", "Doc", "x");
        tree.root.id = "wrong".into();
        tree.root.properties.insert("id".into(), "wrong".into());
        let bytes = loam_types::JsonTreeCodec.render(&tree, false).unwrap();
        put_raw(&fx.store, "/right.sy", &bytes);

        let loaded = fx.store.load_tree(&box1(), &path("/right.sy")).unwrap();
        assert_eq!(loaded.root.id, "right");

        let on_disk = fx.store.read_bytes(&box1(), &path("/right.sy")).unwrap();
        let root = loam_types::JsonTreeCodec.parse_root(&on_disk).unwrap();
        assert_eq!(root.id, "right");
        assert_eq!(root.properties["id"], "right");
        assert!(fx.store.index().get("right").unwrap().is_some());
    }

    #[test]
    fn old_format_is_migrated_on_load() {
        let fx = fixture();
        let old = br#"{"ID":"old","Type":"NodeDocument","Properties":{"id":"old","title":"Old"},
            "Children":[{"ID":"20260101000000-para001","Type":"NodeParagraph","Properties":{"id":"20260101000000-para001"},
            "Children":[{"Type":"NodeStrong","Children":[{"Type":"NodeText","Data":"bold"}]}]}]}"#;
        put_raw(&fx.store, "/old.sy", old);

        let tree = fx.store.load_tree(&box1(), &path("/old.sy")).unwrap();
        assert_eq!(tree.root.spec, loam_types::CURRENT_SPEC);
        let para = &tree.root.children[0];
        assert_eq!(para.children[0].node_type, NodeType::TextMark);
        assert_eq!(para.children[0].extra["TextMarkTextContent"], "bold");
        assert_eq!(para.children[0].extra["TextMarkType"], "strong");
        assert_eq!(fx.store.index().by_root("old").unwrap().len(), 2);
    }

    #[test]
    fn current_format_load_does_not_write() {
        let fx = fixture();
        fx.store.write_tree(&mut doc("/d.sy", "D", "x")).unwrap();
        let before = fx.store.index().total_changes().unwrap();
        let modified = std::fs::metadata(fx.store.file_path(&box1(), &path("/d.sy")))
            .unwrap()
            .modified()
            .unwrap();
        fx.store.load_tree(&box1(), &path("/d.sy")).unwrap();
        assert_eq!(fx.store.index().total_changes().unwrap(), before);
        let after = std::fs::metadata(fx.store.file_path(&box1(), &path("/d.sy")))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(modified, after);
    }
}
