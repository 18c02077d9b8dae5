use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use loam_cache::TenantCache;
use loam_index::BlockTreeIndex;
use loam_types::{BoxId, DocPath, JsonTreeCodec, TreeCodec};
use loam_workspace::WorkspaceDescriptor;

use crate::config::LoaderConfig;
use crate::error::{TreeError, TreeResult};
use crate::lock::{locked_read, FileGuard, FileLocks};

/// Documents of one workspace, bound to that workspace's index handle and
/// tenant cache.
///
/// Cheap to build: the kernel creates one per request from pooled parts.
#[derive(Clone)]
pub struct DocumentStore {
    pub(crate) ws: Arc<WorkspaceDescriptor>,
    pub(crate) index: Arc<BlockTreeIndex>,
    pub(crate) cache: Arc<TenantCache>,
    pub(crate) codec: Arc<dyn TreeCodec>,
    pub(crate) locks: Arc<FileLocks>,
    pub(crate) config: LoaderConfig,
}

impl fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("workspace", self.ws.key())
            .field("index", &self.index.path())
            .field("config", &self.config)
            .finish()
    }
}

impl DocumentStore {
    pub fn new(
        ws: Arc<WorkspaceDescriptor>,
        index: Arc<BlockTreeIndex>,
        cache: Arc<TenantCache>,
        locks: Arc<FileLocks>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            ws,
            index,
            cache,
            codec: Arc::new(JsonTreeCodec),
            locks,
            config,
        }
    }

    /// Replace the document codec.
    pub fn with_codec(mut self, codec: Arc<dyn TreeCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn workspace(&self) -> &WorkspaceDescriptor {
        &self.ws
    }

    pub fn index(&self) -> &Arc<BlockTreeIndex> {
        &self.index
    }

    pub fn cache(&self) -> &Arc<TenantCache> {
        &self.cache
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Absolute path of a document file.
    pub fn file_path(&self, box_id: &BoxId, path: &DocPath) -> PathBuf {
        self.ws.doc_file(box_id.as_str(), path.as_str())
    }

    /// Whether a document file exists.
    pub fn exists(&self, box_id: &BoxId, path: &DocPath) -> bool {
        self.file_path(box_id, path).is_file()
    }

    /// Read a document file while the caller holds its path.
    pub(crate) fn read_held(&self, box_id: &BoxId, path: &DocPath, guard: &FileGuard<'_>) -> TreeResult<Vec<u8>> {
        locked_read(guard.path()).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                TreeError::NotFound {
                    box_id: box_id.to_string(),
                    path: path.to_string(),
                }
            } else {
                TreeError::Read {
                    path: guard.path().to_path_buf(),
                    source,
                }
            }
        })
    }

    /// Read a document file under its per-path lock.
    pub fn read_bytes(&self, box_id: &BoxId, path: &DocPath) -> TreeResult<Vec<u8>> {
        let file = self.file_path(box_id, path);
        let guard = self.locks.acquire(&file)?;
        self.read_held(box_id, path, &guard)
    }
}
