use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

const ID_SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_SUFFIX_LEN: usize = 7;
const TIMESTAMP_LEN: usize = 14;

/// File extension of a document file.
pub const DOC_EXT: &str = ".sy";

fn check_token(s: &str) -> bool {
    !s.is_empty()
        && !s.contains('/')
        && !s.contains('\\')
        && !s.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Identifier of a single block.
///
/// Generated IDs have the form `YYYYMMDDhhmmss-xxxxxxx`: a local timestamp
/// followed by seven random lowercase alphanumerics. Parsed IDs are only
/// required to be a single path-safe token, since documents created by older
/// tools do not always follow the generated shape.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    /// Generate a fresh, time-ordered block ID.
    pub fn generate() -> Self {
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
        let mut rng = rand::thread_rng();
        let suffix: String = (0..ID_SUFFIX_LEN)
            .map(|_| ID_SUFFIX_ALPHABET[rng.gen_range(0..ID_SUFFIX_ALPHABET.len())] as char)
            .collect();
        Self(format!("{stamp}-{suffix}"))
    }

    /// Parse and validate a block ID.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if !check_token(s) {
            return Err(TypeError::InvalidId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The leading `YYYYMMDDhhmmss` timestamp, if the ID carries one.
    pub fn timestamp(&self) -> Option<&str> {
        let head = self.0.get(..TIMESTAMP_LEN)?;
        head.bytes().all(|b| b.is_ascii_digit()).then_some(head)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BlockId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a box (notebook), the top-level directory under the data dir.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoxId(String);

impl BoxId {
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if !check_token(s) || s == "." || s == ".." {
            return Err(TypeError::InvalidBox(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoxId({})", self.0)
    }
}

impl fmt::Display for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a document file relative to its box directory.
///
/// Always stored with a leading `/` and a `.sy` suffix, e.g.
/// `/20260125144733-f8giaqe/20260125150102-k2j4x9a.sy`. Each segment is the ID
/// of a document; a document's children live in the directory named after it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocPath(String);

impl DocPath {
    /// Parse a document path, adding the leading `/` when it is missing.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let trimmed = s.trim();
        let normalized = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        let Some(body) = normalized.strip_suffix(DOC_EXT) else {
            return Err(TypeError::InvalidPath(s.to_string()));
        };
        let valid = body[1..]
            .split('/')
            .all(|seg| check_token(seg) && seg != "." && seg != "..");
        if !valid {
            return Err(TypeError::InvalidPath(s.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The document ID encoded in the file name.
    pub fn doc_id(&self) -> BlockId {
        let last = self.segments().last().unwrap_or_default();
        BlockId(last.to_string())
    }

    /// ID segments from the box root down to this document.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0[1..self.0.len() - DOC_EXT.len()].split('/')
    }

    /// Number of segments; a top-level document has depth 1.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Path of the parent document, or `None` for a top-level document.
    pub fn parent(&self) -> Option<DocPath> {
        let body = &self.0[..self.0.len() - DOC_EXT.len()];
        let cut = body.rfind('/')?;
        if cut == 0 {
            return None;
        }
        Some(Self(format!("{}{DOC_EXT}", &body[..cut])))
    }

    /// Paths of all ancestor documents, outermost first.
    pub fn ancestors(&self) -> Vec<DocPath> {
        let segments: Vec<&str> = self.segments().collect();
        (1..segments.len())
            .map(|i| Self(format!("/{}{DOC_EXT}", segments[..i].join("/"))))
            .collect()
    }

    /// Path of a child document with the given ID.
    pub fn child(&self, id: &BlockId) -> DocPath {
        let body = &self.0[..self.0.len() - DOC_EXT.len()];
        Self(format!("{body}/{id}{DOC_EXT}"))
    }

    /// The directory holding this document's children, relative to the box.
    pub fn children_dir(&self) -> &str {
        &self.0[1..self.0.len() - DOC_EXT.len()]
    }

    /// The path relative to the box directory, without the leading `/`.
    pub fn relative(&self) -> &str {
        &self.0[1..]
    }
}

impl TryFrom<String> for DocPath {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocPath> for String {
    fn from(value: DocPath) -> Self {
        value.0
    }
}

impl fmt::Debug for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocPath({})", self.0)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
