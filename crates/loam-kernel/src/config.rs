use std::path::{Path, PathBuf};

use loam_cache::CacheConfig;
use loam_pool::PoolConfig;
use loam_tree::LoaderConfig;
use loam_workspace::{WorkspaceDescriptor, WorkspaceLayout};
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

/// Where the default workspace lives and how workspaces are laid out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
    /// Rebuild an index from the document files when its store was just
    /// created or recovered.
    pub reindex_on_boot: bool,
    pub layout: WorkspaceLayout,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            reindex_on_boot: true,
            layout: WorkspaceLayout::default(),
        }
    }
}

impl WorkspaceConfig {
    /// Descriptor of the default (single-tenant) workspace.
    pub fn descriptor(&self) -> WorkspaceDescriptor {
        WorkspaceDescriptor::with_layout(&self.root, &self.layout, None)
    }
}

/// Kernel configuration, usually read from a TOML file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    pub loader: LoaderConfig,
    pub workspace: WorkspaceConfig,
}

impl KernelConfig {
    pub fn from_toml_str(s: &str) -> KernelResult<Self> {
        toml::from_str(s).map_err(|e| KernelError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> KernelResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| KernelError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> KernelResult<String> {
        toml::to_string_pretty(self).map_err(|e| KernelError::Config(e.to_string()))
    }
}
