use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! node_types {
    ($( $variant:ident => $name:literal, $block:expr, $abbr:literal; )*) => {
        /// Kind of a node in a document tree, serialized by its canonical name
        /// (`NodeDocument`, `NodeParagraph`, ...).
        ///
        /// Unknown names survive a parse/render cycle through [`NodeType::Other`].
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum NodeType {
            $( $variant, )*
            Other(String),
        }

        impl NodeType {
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $name, )*
                    Self::Other(name) => name,
                }
            }

            /// Whether nodes of this kind are blocks (and thus carry IDs and
            /// get index rows). Unknown kinds are treated as blocks.
            pub fn is_block(&self) -> bool {
                match self {
                    $( Self::$variant => $block, )*
                    Self::Other(_) => true,
                }
            }

            /// The index abbreviation for block kinds.
            pub fn block_type(&self) -> BlockType {
                match self {
                    $( Self::$variant => BlockType::from_abbr($abbr), )*
                    Self::Other(name) => BlockType::from_abbr(name),
                }
            }
        }

        impl From<String> for NodeType {
            fn from(value: String) -> Self {
                match value.as_str() {
                    $( $name => Self::$variant, )*
                    _ => Self::Other(value),
                }
            }
        }
    };
}

node_types! {
    Document => "NodeDocument", true, "d";
    Heading => "NodeHeading", true, "h";
    Paragraph => "NodeParagraph", true, "p";
    List => "NodeList", true, "l";
    ListItem => "NodeListItem", true, "i";
    Blockquote => "NodeBlockquote", true, "b";
    SuperBlock => "NodeSuperBlock", true, "s";
    CodeBlock => "NodeCodeBlock", true, "c";
    MathBlock => "NodeMathBlock", true, "m";
    Table => "NodeTable", true, "t";
    HtmlBlock => "NodeHTMLBlock", true, "html";
    QueryEmbed => "NodeBlockQueryEmbed", true, "query_embed";
    ThematicBreak => "NodeThematicBreak", true, "tb";
    Video => "NodeVideo", true, "video";
    Audio => "NodeAudio", true, "audio";
    IFrame => "NodeIFrame", true, "iframe";
    Widget => "NodeWidget", true, "widget";
    AttributeView => "NodeAttributeView", true, "av";
    Text => "NodeText", false, "";
    TextMark => "NodeTextMark", false, "";
    Strong => "NodeStrong", false, "";
    Emphasis => "NodeEmphasis", false, "";
    Strikethrough => "NodeStrikethrough", false, "";
    CodeSpan => "NodeCodeSpan", false, "";
    Mark => "NodeMark", false, "";
    Sup => "NodeSup", false, "";
    Sub => "NodeSub", false, "";
    Kbd => "NodeKbd", false, "";
    Underline => "NodeUnderline", false, "";
    Image => "NodeImage", false, "";
    HardBreak => "NodeHardBreak", false, "";
}

impl NodeType {
    /// The text-mark tag for inline formatting nodes that older documents
    /// nest instead of using flat text marks.
    pub fn mark_tag(&self) -> Option<&'static str> {
        Some(match self {
            Self::Strong => "strong",
            Self::Emphasis => "em",
            Self::Strikethrough => "s",
            Self::CodeSpan => "code",
            Self::Mark => "mark",
            Self::Sup => "sup",
            Self::Sub => "sub",
            Self::Kbd => "kbd",
            Self::Underline => "u",
            _ => return None,
        })
    }
}

impl From<NodeType> for String {
    fn from(value: NodeType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Short block kind stored in the index `type` column.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockType(String);

impl BlockType {
    pub const DOCUMENT: &'static str = "d";

    pub fn from_abbr(abbr: &str) -> Self {
        Self(abbr.to_string())
    }

    pub fn document() -> Self {
        Self::from_abbr(Self::DOCUMENT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_document(&self) -> bool {
        self.0 == Self::DOCUMENT
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_names_round_trip() {
        let t = NodeType::from("NodeParagraph".to_string());
        assert_eq!(t, NodeType::Paragraph);
        assert_eq!(String::from(t), "NodeParagraph");
    }

    #[test]
    fn unknown_names_are_preserved() {
        let t = NodeType::from("NodeCallout".to_string());
        assert_eq!(t.as_str(), "NodeCallout");
        assert!(t.is_block());
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"NodeCallout\"");
    }

    #[test]
    fn block_abbreviations() {
        assert!(NodeType::Document.block_type().is_document());
        assert_eq!(NodeType::ListItem.block_type().as_str(), "i");
        assert!(!NodeType::Text.is_block());
        assert_eq!(NodeType::Strong.mark_tag(), Some("strong"));
        assert_eq!(NodeType::Text.mark_tag(), None);
    }
}
