use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{WorkspaceError, WorkspaceResult};

/// File name of the block-tree index inside the temp directory.
pub const BLOCKTREE_DB: &str = "blocktree.db";
/// File name of the asset content index inside the temp directory.
pub const ASSET_CONTENT_DB: &str = "asset_content.db";

/// Key identifying one workspace in the connection pool and cache manager.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceKey(String);

impl WorkspaceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for a workspace root directory.
    pub fn from_root(root: &Path) -> Self {
        Self(root.to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkspaceKey({})", self.0)
    }
}

impl fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names of the directories under a workspace root.
///
/// An empty `data` name places boxes directly in the workspace root, which is
/// how per-user workspaces are laid out in multi-tenant deployments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceLayout {
    pub data: String,
    pub conf: String,
    pub repo: String,
    pub history: String,
    pub temp: String,
}

impl Default for WorkspaceLayout {
    fn default() -> Self {
        Self {
            data: "data".into(),
            conf: "conf".into(),
            repo: "repo".into(),
            history: "history".into(),
            temp: "temp".into(),
        }
    }
}

impl WorkspaceLayout {
    /// Layout with boxes stored directly in the workspace root.
    pub fn tenant() -> Self {
        Self {
            data: String::new(),
            ..Self::default()
        }
    }
}

/// The user a workspace belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantIdentity {
    pub user_id: String,
    pub username: String,
}

/// Immutable description of one workspace: where its files live and whose
/// it is.
///
/// Constructed once per tenant, shared read-only (usually behind an `Arc`)
/// by every unit of work that touches that tenant's data.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceDescriptor {
    key: WorkspaceKey,
    name: String,
    root: PathBuf,
    data_dir: PathBuf,
    conf_dir: PathBuf,
    repo_dir: PathBuf,
    history_dir: PathBuf,
    temp_dir: PathBuf,
    blocktree_db_path: PathBuf,
    asset_content_db_path: PathBuf,
    tenant: Option<TenantIdentity>,
}

impl WorkspaceDescriptor {
    /// Descriptor for `root` with the default layout and no tenant.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_layout(root, &WorkspaceLayout::default(), None)
    }

    /// Descriptor for a tenant's workspace.
    pub fn for_tenant(root: impl Into<PathBuf>, layout: &WorkspaceLayout, tenant: TenantIdentity) -> Self {
        Self::with_layout(root, layout, Some(tenant))
    }

    pub fn with_layout(root: impl Into<PathBuf>, layout: &WorkspaceLayout, tenant: Option<TenantIdentity>) -> Self {
        let root = root.into();
        let join = |name: &str| {
            if name.is_empty() {
                root.clone()
            } else {
                root.join(name)
            }
        };
        let temp_dir = join(&layout.temp);
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            key: WorkspaceKey::from_root(&root),
            name,
            data_dir: join(&layout.data),
            conf_dir: join(&layout.conf),
            repo_dir: join(&layout.repo),
            history_dir: join(&layout.history),
            blocktree_db_path: temp_dir.join(BLOCKTREE_DB),
            asset_content_db_path: temp_dir.join(ASSET_CONTENT_DB),
            temp_dir,
            tenant,
            root,
        }
    }

    pub fn key(&self) -> &WorkspaceKey {
        &self.key
    }

    /// The workspace directory name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn conf_dir(&self) -> &Path {
        &self.conf_dir
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    pub fn history_dir(&self) -> &Path {
        &self.history_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn blocktree_db_path(&self) -> &Path {
        &self.blocktree_db_path
    }

    pub fn asset_content_db_path(&self) -> &Path {
        &self.asset_content_db_path
    }

    pub fn tenant(&self) -> Option<&TenantIdentity> {
        self.tenant.as_ref()
    }

    /// Directory of one box.
    pub fn box_dir(&self, box_id: &str) -> PathBuf {
        self.data_dir.join(box_id)
    }

    /// Absolute path of a document file; `doc_path` is relative to its box.
    pub fn doc_file(&self, box_id: &str, doc_path: &str) -> PathBuf {
        self.box_dir(box_id).join(doc_path.trim_start_matches('/'))
    }

    /// Create the data, conf, temp and history directories if they are
    /// missing.
    pub fn ensure_dirs(&self) -> WorkspaceResult<()> {
        for dir in [&self.data_dir, &self.conf_dir, &self.temp_dir, &self.history_dir] {
            std::fs::create_dir_all(dir).map_err(|source| WorkspaceError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for WorkspaceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceDescriptor")
            .field("root", &self.root)
            .field("tenant", &self.tenant.as_ref().map(|t| &t.user_id))
            .finish()
    }
}
