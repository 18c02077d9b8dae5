//! Canonical on-disk document representation.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{TypeError, TypeResult};
use crate::ids::{BoxId, DocPath};
use crate::tree::{DocumentTree, Node};

/// Converts between document files and [`Node`] trees.
///
/// The loader and writer only talk to this trait, so the parser and renderer
/// of the rich-text layer can be swapped without touching storage code.
pub trait TreeCodec: Send + Sync {
    /// Parse a document file into its root node.
    fn parse_root(&self, bytes: &[u8]) -> TypeResult<Node>;

    /// Render a root node into file bytes.
    fn render_root(&self, root: &Node, pretty: bool) -> TypeResult<Vec<u8>>;

    /// Read only the document attributes (title, updated, ...).
    ///
    /// Used when walking ancestors, where the rest of the tree is not needed.
    fn parse_properties(&self, bytes: &[u8]) -> TypeResult<BTreeMap<String, String>> {
        Ok(self.parse_root(bytes)?.properties)
    }

    /// Parse a document file into a tree located at `box_id`/`path`.
    ///
    /// The tree's `hpath` is left empty for the loader to fill in.
    fn parse(&self, bytes: &[u8], box_id: &BoxId, path: &DocPath) -> TypeResult<DocumentTree> {
        let root = self.parse_root(bytes)?;
        Ok(DocumentTree {
            id: path.doc_id(),
            box_id: box_id.clone(),
            path: path.clone(),
            hpath: String::new(),
            root,
        })
    }

    /// Render a tree into file bytes.
    fn render(&self, tree: &DocumentTree, pretty: bool) -> TypeResult<Vec<u8>> {
        self.render_root(&tree.root, pretty)
    }
}

/// JSON codec: one object per node with `ID`, `Type`, `Properties`,
/// `Children` and friends. Pretty output is tab-indented.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonTreeCodec;

#[derive(Deserialize)]
struct PropertiesOnly {
    #[serde(rename = "Properties", default)]
    properties: BTreeMap<String, String>,
}

impl TreeCodec for JsonTreeCodec {
    fn parse_root(&self, bytes: &[u8]) -> TypeResult<Node> {
        serde_json::from_slice(bytes).map_err(|e| TypeError::Parse(e.to_string()))
    }

    fn render_root(&self, root: &Node, pretty: bool) -> TypeResult<Vec<u8>> {
        if !pretty {
            return serde_json::to_vec(root).map_err(|e| TypeError::Render(e.to_string()));
        }
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        serde::Serialize::serialize(root, &mut ser).map_err(|e| TypeError::Render(e.to_string()))?;
        Ok(out)
    }

    fn parse_properties(&self, bytes: &[u8]) -> TypeResult<BTreeMap<String, String>> {
        let head: PropertiesOnly =
            serde_json::from_slice(bytes).map_err(|e| TypeError::Parse(e.to_string()))?;
        Ok(head.properties)
    }
}
