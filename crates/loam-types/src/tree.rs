//! In-memory document trees.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::block::{BlockType, NodeType};
use crate::entry::BlockTreeEntry;
use crate::ids::{BlockId, BoxId, DocPath};
use crate::migrate::CURRENT_SPEC;

/// One node of a document tree, in its canonical on-disk shape.
///
/// Fields that loam does not interpret (heading levels, list data, text mark
/// attributes, ...) are kept in `extra` so that a parse/render cycle does not
/// lose them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "ID", default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(rename = "Spec", default, skip_serializing_if = "String::is_empty")]
    pub spec: String,

    #[serde(rename = "Type")]
    pub node_type: NodeType,

    #[serde(rename = "Data", default, skip_serializing_if = "String::is_empty")]
    pub data: String,

    #[serde(rename = "Properties", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,

    #[serde(rename = "Children", default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Node {
    /// A bare node of the given kind.
    pub fn new(node_type: NodeType) -> Self {
        Self {
            id: String::new(),
            spec: String::new(),
            node_type,
            data: String::new(),
            properties: BTreeMap::new(),
            children: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// A block node with an ID and a matching `id`/`updated` attribute pair.
    pub fn block(node_type: NodeType, id: &BlockId) -> Self {
        let mut node = Self::new(node_type);
        node.id = id.to_string();
        node.properties.insert("id".into(), id.to_string());
        if let Some(stamp) = id.timestamp() {
            node.properties.insert("updated".into(), stamp.to_string());
        }
        node
    }

    /// A plain text leaf.
    pub fn text(data: impl Into<String>) -> Self {
        let mut node = Self::new(NodeType::Text);
        node.data = data.into();
        node
    }

    /// Whether this node is a block that owns an index row.
    pub fn is_indexed(&self) -> bool {
        self.node_type.is_block() && !self.id.is_empty()
    }

    /// The `updated` attribute, falling back to the timestamp in the ID.
    pub fn updated(&self) -> String {
        if let Some(updated) = self.properties.get("updated").filter(|u| !u.is_empty()) {
            return updated.clone();
        }
        BlockId::parse(&self.id)
            .ok()
            .and_then(|id| id.timestamp().map(str::to_string))
            .unwrap_or_default()
    }

    /// Concatenated text of all leaves beneath this node.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        out.push_str(&self.data);
        for child in &self.children {
            child.collect_text(out);
        }
    }

    /// Depth-first search for a node by ID.
    pub fn find(&self, id: &str) -> Option<&Node> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}

/// A block reference found inside a document: `block_id` links to
/// `def_block_id` with anchor text `anchor`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingRef {
    pub block_id: String,
    pub def_block_id: String,
    pub anchor: String,
}

fn extra_str<'a>(node: &'a Node, key: &str) -> &'a str {
    node.extra.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

/// A document loaded from one `.sy` file.
///
/// `hpath` is not stored in the file; the loader derives it from the titles of
/// the document and its ancestors.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentTree {
    pub id: BlockId,
    pub box_id: BoxId,
    pub path: DocPath,
    pub hpath: String,
    pub root: Node,
}

impl DocumentTree {
    /// A new, empty document whose ID is taken from its path.
    pub fn new_document(box_id: BoxId, path: DocPath, hpath: impl Into<String>, title: &str) -> Self {
        let id = path.doc_id();
        let mut root = Node::block(NodeType::Document, &id);
        root.spec = CURRENT_SPEC.to_string();
        root.properties.insert("title".into(), title.to_string());
        root.properties.insert("type".into(), "doc".into());
        if !root.properties.contains_key("updated") {
            root.properties
                .insert("updated".into(), chrono::Local::now().format("%Y%m%d%H%M%S").to_string());
        }
        Self {
            id,
            box_id,
            path,
            hpath: hpath.into(),
            root,
        }
    }

    /// The raw `title` attribute of the document block.
    pub fn title(&self) -> &str {
        self.root.properties.get("title").map(String::as_str).unwrap_or("")
    }

    /// Index rows for every indexed block, in document order.
    pub fn block_entries(&self) -> Vec<BlockTreeEntry> {
        let mut out = Vec::new();
        self.collect_entries(&self.root, "", &mut out);
        out
    }

    fn collect_entries(&self, node: &Node, parent_id: &str, out: &mut Vec<BlockTreeEntry>) {
        let mut next_parent = parent_id;
        if node.is_indexed() {
            let block_type = if std::ptr::eq(node, &self.root) {
                BlockType::document()
            } else {
                node.node_type.block_type()
            };
            out.push(BlockTreeEntry {
                id: node.id.clone(),
                root_id: self.id.to_string(),
                parent_id: parent_id.to_string(),
                box_id: self.box_id.to_string(),
                path: self.path.to_string(),
                hpath: self.hpath.clone(),
                updated: node.updated(),
                block_type,
            });
            next_parent = &node.id;
        }
        for child in &node.children {
            self.collect_entries(child, next_parent, out);
        }
    }

    /// IDs of every indexed block.
    pub fn block_ids(&self) -> Vec<String> {
        self.block_entries().into_iter().map(|e| e.id).collect()
    }

    /// Every block reference in the document, in document order.
    pub fn outgoing_refs(&self) -> Vec<OutgoingRef> {
        let mut out = Vec::new();
        collect_refs(&self.root, &self.root.id, &mut out);
        out
    }

    /// Give an empty document a single empty paragraph.
    ///
    /// The paragraph's ID seeds the document's `updated` attribute.
    pub fn ensure_not_empty(&mut self) -> bool {
        if !self.root.children.is_empty() {
            return false;
        }
        let id = BlockId::generate();
        let paragraph = Node::block(NodeType::Paragraph, &id);
        if let Some(stamp) = id.timestamp() {
            self.root.properties.insert("updated".into(), stamp.to_string());
        }
        self.root.children.push(paragraph);
        true
    }
}

fn collect_refs(node: &Node, owner: &str, out: &mut Vec<OutgoingRef>) {
    let owner = if node.is_indexed() { node.id.as_str() } else { owner };
    if node.node_type == NodeType::TextMark
        && extra_str(node, "TextMarkType").split(' ').any(|t| t == "block-ref")
    {
        let def = extra_str(node, "TextMarkBlockRefID");
        if !def.is_empty() {
            out.push(OutgoingRef {
                block_id: owner.to_string(),
                def_block_id: def.to_string(),
                anchor: extra_str(node, "TextMarkTextContent").to_string(),
            });
        }
    }
    for child in &node.children {
        collect_refs(child, owner, out);
    }
}
