//! One tenant's cache set.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use loam_workspace::WorkspaceKey;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::CacheConfig;

/// Cached content of one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedBlock {
    pub id: String,
    pub root_id: String,
    pub box_id: String,
    pub path: String,
    pub updated: String,
    pub content: String,
}

impl CachedBlock {
    /// Admission cost: one unit per started KiB of content.
    pub fn cost(&self) -> u32 {
        let kib = self.content.len().div_ceil(1024).max(1);
        kib.min(u32::MAX as usize) as u32
    }
}

/// A reference from one block to a definition block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// The referencing block.
    pub block_id: String,
    pub root_id: String,
    pub box_id: String,
    pub path: String,
    /// The referenced (definition) block.
    pub def_block_id: String,
    pub def_root_id: String,
    /// Anchor text of the reference.
    pub content: String,
}

/// Back-references to one definition block, keyed by referencing block ID.
pub type RefSet = BTreeMap<String, BlockRef>;

/// Counters for one tenant cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCacheStats {
    pub enabled: bool,
    pub blocks: u64,
    pub block_cost: u64,
    pub ref_sets: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Block-content cache plus back-reference cache for one workspace.
///
/// Fills after a miss are guarded by a generation counter: every
/// invalidation bumps it, and a value loaded under an older generation is
/// never left in the cache.
pub struct TenantCache {
    key: WorkspaceKey,
    enabled: AtomicBool,
    generation: AtomicU64,
    blocks: Cache<String, Arc<CachedBlock>>,
    refs: Cache<String, Arc<RefSet>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for TenantCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCache")
            .field("key", &self.key)
            .field("enabled", &self.is_enabled())
            .field("blocks", &self.blocks.entry_count())
            .field("ref_sets", &self.refs.entry_count())
            .finish()
    }
}

impl TenantCache {
    pub fn new(key: WorkspaceKey, config: &CacheConfig) -> Self {
        let blocks = Cache::builder()
            .max_capacity(config.block_cost_budget)
            .weigher(|_id: &String, block: &Arc<CachedBlock>| block.cost())
            .build();
        let refs = Cache::builder().time_to_live(config.ref_ttl()).build();
        Self {
            key,
            enabled: AtomicBool::new(true),
            generation: AtomicU64::new(0),
            blocks,
            refs,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &WorkspaceKey {
        &self.key
    }

    /// Current invalidation generation. Read it before loading a value that
    /// is to be cached with [`TenantCache::put_block_since`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turn caching on or off. Turning it off also drops every entry.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        if !enabled {
            self.clear();
        }
    }

    // ---------------------------------------------------------------
    // Block content
    // ---------------------------------------------------------------

    pub fn get_block(&self, id: &str) -> Option<Arc<CachedBlock>> {
        if !self.is_enabled() {
            return None;
        }
        match self.blocks.get(id) {
            Some(block) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(workspace = %self.key, id, "block cache hit");
                Some(block)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(workspace = %self.key, id, "block cache miss");
                None
            }
        }
    }

    pub fn put_block(&self, block: CachedBlock) {
        if self.is_enabled() {
            self.blocks.insert(block.id.clone(), Arc::new(block));
        }
    }

    /// Cache a block loaded after [`TenantCache::generation`] returned
    /// `generation`. Nothing is kept if an invalidation happened since.
    /// Returns whether the block stayed cached.
    pub fn put_block_since(&self, block: CachedBlock, generation: u64) -> bool {
        if !self.is_enabled() || self.generation() != generation {
            return false;
        }
        let id = block.id.clone();
        self.blocks.insert(id.clone(), Arc::new(block));
        // An invalidation racing the insert bumps before it removes, so it
        // is seen here or removes the entry itself.
        if self.generation() != generation {
            self.blocks.invalidate(&id);
            return false;
        }
        true
    }

    // ---------------------------------------------------------------
    // Back-references
    // ---------------------------------------------------------------

    /// Cached back-references to `def_id`.
    pub fn refs_for(&self, def_id: &str) -> Option<Arc<RefSet>> {
        if !self.is_enabled() {
            return None;
        }
        self.refs.get(def_id)
    }

    /// Cached back-references to `def_id`, computing and caching them with
    /// `load` on a miss.
    pub fn refs_or_load<E>(
        &self,
        def_id: &str,
        load: impl FnOnce() -> Result<Vec<BlockRef>, E>,
    ) -> Result<Arc<RefSet>, E> {
        if let Some(set) = self.refs_for(def_id) {
            return Ok(set);
        }
        let generation = self.generation();
        let set: RefSet = load()?
            .into_iter()
            .map(|r| (r.block_id.clone(), r))
            .collect();
        let set = Arc::new(set);
        if self.is_enabled() && self.generation() == generation {
            self.refs.insert(def_id.to_string(), Arc::clone(&set));
            if self.generation() != generation {
                self.refs.invalidate(def_id);
            }
        }
        Ok(set)
    }

    /// Add one reference to the cached set of its definition block.
    pub fn put_ref(&self, reference: BlockRef) {
        if !self.is_enabled() {
            return;
        }
        let def_id = reference.def_block_id.clone();
        let mut set = self
            .refs
            .get(&def_id)
            .map(|s| RefSet::clone(&s))
            .unwrap_or_default();
        set.insert(reference.block_id.clone(), reference);
        self.refs.insert(def_id, Arc::new(set));
    }

    // ---------------------------------------------------------------
    // Invalidation
    // ---------------------------------------------------------------

    /// Forget a block's content and the back-references pointing at it.
    pub fn invalidate(&self, id: &str) {
        self.bump();
        self.blocks.invalidate(id);
        self.refs.invalidate(id);
    }

    pub fn invalidate_many<S: AsRef<str>>(&self, ids: &[S]) {
        self.bump();
        for id in ids {
            self.blocks.invalidate(id.as_ref());
            self.refs.invalidate(id.as_ref());
        }
    }

    /// Forget every back-reference set that lists one of `ids` as a
    /// referencing block. Returns the number of sets dropped.
    pub fn invalidate_referrers<S: AsRef<str>>(&self, ids: &[S]) -> usize {
        self.bump();
        let stale: Vec<Arc<String>> = self
            .refs
            .iter()
            .filter(|(_, set)| ids.iter().any(|id| set.contains_key(id.as_ref())))
            .map(|(def_id, _)| def_id)
            .collect();
        for def_id in &stale {
            self.refs.invalidate(def_id.as_str());
        }
        stale.len()
    }

    pub fn clear(&self) {
        self.bump();
        self.blocks.invalidate_all();
        self.refs.invalidate_all();
    }

    pub fn stats(&self) -> TenantCacheStats {
        self.blocks.run_pending_tasks();
        self.refs.run_pending_tasks();
        TenantCacheStats {
            enabled: self.is_enabled(),
            blocks: self.blocks.entry_count(),
            block_cost: self.blocks.weighted_size(),
            ref_sets: self.refs.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
