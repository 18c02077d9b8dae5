//! Structural format migration.
//!
//! Documents written before format version `1` nest inline formatting nodes
//! (`NodeStrong` containing `NodeEmphasis` containing `NodeText`). Version `1`
//! stores them as flat `NodeTextMark` leaves whose `TextMarkType` lists every
//! active mark, e.g. `"strong em"`.

use crate::block::NodeType;
use crate::tree::{DocumentTree, Node};

/// The structural format version written by this crate.
pub const CURRENT_SPEC: &str = "1";

/// Upgrade a tree to [`CURRENT_SPEC`] in place.
///
/// Returns `true` if the tree was changed and should be written back.
pub fn migrate_tree(tree: &mut DocumentTree) -> bool {
    if tree.root.spec == CURRENT_SPEC {
        return false;
    }
    flatten_block(&mut tree.root);
    tree.root.spec = CURRENT_SPEC.to_string();
    true
}

fn flatten_block(node: &mut Node) {
    let children = std::mem::take(&mut node.children);
    let mut out = Vec::with_capacity(children.len());
    for mut child in children {
        if child.node_type.mark_tag().is_some() {
            let mut tags = Vec::new();
            flatten_marked(child, &mut tags, &mut out);
        } else {
            if child.node_type.is_block() {
                flatten_block(&mut child);
            }
            out.push(child);
        }
    }
    node.children = out;
}

fn flatten_marked(node: Node, tags: &mut Vec<&'static str>, out: &mut Vec<Node>) {
    let pushed = match node.node_type.mark_tag() {
        Some(tag) if !tags.contains(&tag) => {
            tags.push(tag);
            true
        }
        _ => false,
    };

    if node.children.is_empty() && !node.data.is_empty() {
        out.push(text_mark(tags, node.data));
    }
    for child in node.children {
        if child.node_type.mark_tag().is_some() {
            flatten_marked(child, tags, out);
        } else if child.node_type == NodeType::Text {
            out.push(text_mark(tags, child.data));
        } else {
            out.push(child);
        }
    }

    if pushed {
        tags.pop();
    }
}

fn text_mark(tags: &[&str], content: String) -> Node {
    let mut mark = Node::new(NodeType::TextMark);
    mark.extra
        .insert("TextMarkType".into(), serde_json::Value::String(tags.join(" ")));
    mark.extra
        .insert("TextMarkTextContent".into(), serde_json::Value::String(content));
    mark
}
