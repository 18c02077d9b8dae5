//! Typed requests.
//!
//! Transport layers hand the kernel loosely-typed JSON. Each operation has a
//! request struct that is validated once, at the boundary, so the storage
//! code only ever sees well-formed identifiers.

use loam_types::{normalize_hpath, BlockId, BoxId, DocPath};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{KernelError, KernelResult};

/// Upper bound on IDs in one batch request.
pub const MAX_BATCH_IDS: usize = 1024;

/// A request that can be built from loosely-typed JSON.
pub trait TypedRequest: Sized {
    /// Operation name used in error messages.
    const OP: &'static str;
    /// Wire shape before validation.
    type Raw: DeserializeOwned;

    fn validate(raw: Self::Raw) -> KernelResult<Self>;

    fn from_value(value: Value) -> KernelResult<Self> {
        let raw = serde_json::from_value(value)
            .map_err(|e| KernelError::InvalidRequest(format!("{}: {e}", Self::OP)))?;
        Self::validate(raw)
    }
}

fn invalid(op: &str, e: impl std::fmt::Display) -> KernelError {
    KernelError::InvalidRequest(format!("{op}: {e}"))
}

/// Load one document by location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadTreeRequest {
    pub box_id: BoxId,
    pub path: DocPath,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawLoadTree {
    #[serde(alias = "notebook")]
    r#box: String,
    path: String,
}

impl TypedRequest for LoadTreeRequest {
    const OP: &'static str = "load_tree";
    type Raw = RawLoadTree;

    fn validate(raw: RawLoadTree) -> KernelResult<Self> {
        Ok(Self {
            box_id: BoxId::parse(&raw.r#box).map_err(|e| invalid(Self::OP, e))?,
            path: DocPath::parse(&raw.path).map_err(|e| invalid(Self::OP, e))?,
        })
    }
}

/// Look up one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockLookupRequest {
    pub id: BlockId,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawBlockLookup {
    id: String,
}

impl TypedRequest for BlockLookupRequest {
    const OP: &'static str = "get_block_tree";
    type Raw = RawBlockLookup;

    fn validate(raw: RawBlockLookup) -> KernelResult<Self> {
        Ok(Self {
            id: BlockId::parse(raw.id.trim()).map_err(|e| invalid(Self::OP, e))?,
        })
    }
}

/// Load the documents holding many blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchLoadRequest {
    /// Distinct IDs in request order.
    pub ids: Vec<BlockId>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawBatchLoad {
    ids: Vec<String>,
}

impl BatchLoadRequest {
    pub fn id_strings(&self) -> Vec<String> {
        self.ids.iter().map(|id| id.to_string()).collect()
    }
}

impl TypedRequest for BatchLoadRequest {
    const OP: &'static str = "load_trees_batch";
    type Raw = RawBatchLoad;

    fn validate(raw: RawBatchLoad) -> KernelResult<Self> {
        if raw.ids.len() > MAX_BATCH_IDS {
            return Err(invalid(
                Self::OP,
                format!("{} ids exceeds the limit of {MAX_BATCH_IDS}", raw.ids.len()),
            ));
        }
        let mut ids: Vec<BlockId> = Vec::with_capacity(raw.ids.len());
        for id in &raw.ids {
            let id = BlockId::parse(id.trim()).map_err(|e| invalid(Self::OP, e))?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(Self { ids })
    }
}

/// What a path lookup matches on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathTarget {
    Path(DocPath),
    HPath(String),
}

/// Find a document by on-disk path or by human-readable path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathLookupRequest {
    pub box_id: BoxId,
    pub target: PathTarget,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPathLookup {
    #[serde(alias = "notebook")]
    r#box: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    hpath: Option<String>,
}

impl TypedRequest for PathLookupRequest {
    const OP: &'static str = "get_block_tree_by_path";
    type Raw = RawPathLookup;

    fn validate(raw: RawPathLookup) -> KernelResult<Self> {
        let box_id = BoxId::parse(&raw.r#box).map_err(|e| invalid(Self::OP, e))?;
        let target = match (raw.path, raw.hpath) {
            (Some(path), None) => PathTarget::Path(DocPath::parse(&path).map_err(|e| invalid(Self::OP, e))?),
            (None, Some(hpath)) => {
                let hpath = normalize_hpath(hpath.trim());
                if !hpath.starts_with('/') {
                    return Err(invalid(Self::OP, format!("hpath must start with '/': {hpath}")));
                }
                PathTarget::HPath(hpath)
            }
            _ => return Err(invalid(Self::OP, "exactly one of path and hpath is required")),
        };
        Ok(Self { box_id, target })
    }
}
