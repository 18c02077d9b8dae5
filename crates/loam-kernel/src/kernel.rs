use std::collections::HashMap;
use std::sync::Arc;

use loam_cache::{BlockRef, CacheManagerStats, CachedBlock, RefSet, TenantCacheManager};
use loam_index::{BlockTreeIndex, UpsertReport};
use loam_pool::{ConnectionPool, PoolStats};
use loam_tree::{BatchLoad, DocumentStore, FileLocks, ReindexReport, WriteReport};
use loam_types::{BlockTreeEntry, BoxId, DocPath, DocumentTree};
use loam_workspace::{ContextRegistry, TaskId, WorkspaceDescriptor, WorkspaceKey};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::request::{LoadTreeRequest, PathLookupRequest, PathTarget};

/// Result of one idle sweep over both managers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub handles_closed: usize,
    pub caches_dropped: usize,
}

/// Converts a batch with failures into [`KernelError::PartialBatchFailure`].
pub trait BatchLoadExt {
    fn into_result(self) -> KernelResult<HashMap<String, Arc<DocumentTree>>>;
}

impl BatchLoadExt for BatchLoad {
    fn into_result(self) -> KernelResult<HashMap<String, Arc<DocumentTree>>> {
        if self.is_complete() {
            return Ok(self.trees);
        }
        Err(KernelError::PartialBatchFailure {
            loaded: self.trees.len(),
            failures: self.failures,
            missing: self.missing,
        })
    }
}

/// The storage kernel: pooled indexes, tenant caches and document access for
/// every workspace served by the process.
///
/// Every operation takes the workspace it acts on. Call sites that only know
/// their task resolve the workspace first with [`Kernel::resolve`].
pub struct Kernel {
    config: KernelConfig,
    registry: Arc<ContextRegistry>,
    pub(crate) pool: ConnectionPool,
    pub(crate) caches: TenantCacheManager,
    locks: Arc<FileLocks>,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("pool", &self.pool)
            .field("caches", &self.caches)
            .finish()
    }
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        let registry = Arc::new(ContextRegistry::new(config.workspace.descriptor()));
        info!(
            root = %config.workspace.root.display(),
            max_handles = config.pool.max_handles,
            max_tenants = config.cache.max_tenants,
            "storage kernel started"
        );
        Self {
            pool: ConnectionPool::new(config.pool.clone()),
            caches: TenantCacheManager::new(config.cache.clone()),
            locks: Arc::new(FileLocks::new()),
            registry,
            config,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    // ---- Context ----

    /// The workspace of `task`, else the current tenant, else the default.
    pub fn resolve(&self, task: Option<TaskId>) -> KernelResult<Arc<WorkspaceDescriptor>> {
        Ok(self.registry.resolve(task)?)
    }

    /// Run `f` as one unit of work with `ctx` attached to a fresh task.
    pub fn run_task<R>(&self, ctx: Arc<WorkspaceDescriptor>, f: impl FnOnce(TaskId) -> R) -> KernelResult<R> {
        Ok(self.registry.run_scoped(ctx, f)?)
    }

    pub fn register_tenant(&self, ws: WorkspaceDescriptor) -> KernelResult<Arc<WorkspaceDescriptor>> {
        ws.ensure_dirs()?;
        Ok(self.registry.register_tenant(ws)?)
    }

    // ---- Stores ----

    fn prepare(&self, ws: &Arc<WorkspaceDescriptor>, index: Arc<BlockTreeIndex>) -> KernelResult<DocumentStore> {
        let cache = self.caches.get_or_create(ws.key())?;
        let store = DocumentStore::new(
            Arc::clone(ws),
            Arc::clone(&index),
            cache,
            Arc::clone(&self.locks),
            self.config.loader.clone(),
        );
        if self.config.workspace.reindex_on_boot {
            let refilled = index.refill_if_pending(|| {
                info!(workspace = %ws.key(), boot = ?index.boot_state(), "refilling empty index from files");
                store.rebuild_index()
            })?;
            if let Some(report) = refilled {
                info!(workspace = %ws.key(), documents = report.documents, "index refilled");
            }
        }
        Ok(store)
    }

    /// A document store for `ws` backed by its pooled index and tenant cache.
    ///
    /// The first store of a workspace whose index started empty refills the
    /// index from the document files. Callers arriving during the refill
    /// wait for it; a failed refill is retried by the next caller.
    pub fn store(&self, ws: &Arc<WorkspaceDescriptor>) -> KernelResult<DocumentStore> {
        let index = self.pool.get_or_create(ws)?;
        self.prepare(ws, index)
    }

    /// Run `op`; if the index turns out to be unavailable, reopen it (which
    /// recreates a broken store) and run `op` once more.
    fn with_store<T>(
        &self,
        ws: &Arc<WorkspaceDescriptor>,
        op: &'static str,
        f: impl Fn(&DocumentStore) -> KernelResult<T>,
    ) -> KernelResult<T> {
        let store = self.store(ws)?;
        match f(&store) {
            Err(e) if e.is_unavailable() => {
                warn!(workspace = %ws.key(), op, error = %e, "index unavailable, reopening");
                drop(store);
                let index = self.pool.reopen(ws)?;
                f(&self.prepare(ws, index)?)
            }
            other => other,
        }
    }

    // ---- Lookups ----

    pub fn get_block_tree(&self, ws: &Arc<WorkspaceDescriptor>, id: &str) -> KernelResult<BlockTreeEntry> {
        self.with_store(ws, "get_block_tree", |s| Ok(s.index().get(id)?))?
            .ok_or_else(|| KernelError::NotFound(format!("block {id}")))
    }

    /// Index rows of many blocks; unknown IDs are absent.
    pub fn get_block_trees(
        &self,
        ws: &Arc<WorkspaceDescriptor>,
        ids: &[String],
    ) -> KernelResult<HashMap<String, BlockTreeEntry>> {
        self.with_store(ws, "get_block_trees", |s| Ok(s.index().get_many(ids)?))
    }

    pub fn get_block_tree_by_path(
        &self,
        ws: &Arc<WorkspaceDescriptor>,
        box_id: &BoxId,
        path: &DocPath,
    ) -> KernelResult<BlockTreeEntry> {
        self.with_store(ws, "get_block_tree_by_path", |s| {
            Ok(s.index().root_by_path(box_id.as_str(), path)?)
        })?
        .ok_or_else(|| KernelError::NotFound(format!("document {box_id}{path}")))
    }

    pub fn get_block_tree_by_hpath(
        &self,
        ws: &Arc<WorkspaceDescriptor>,
        box_id: &BoxId,
        hpath: &str,
    ) -> KernelResult<BlockTreeEntry> {
        self.with_store(ws, "get_block_tree_by_hpath", |s| {
            Ok(s.index().root_by_hpath(box_id.as_str(), hpath)?)
        })?
        .ok_or_else(|| KernelError::NotFound(format!("document {box_id}:{hpath}")))
    }

    pub fn lookup_path(&self, ws: &Arc<WorkspaceDescriptor>, req: &PathLookupRequest) -> KernelResult<BlockTreeEntry> {
        match &req.target {
            PathTarget::Path(path) => self.get_block_tree_by_path(ws, &req.box_id, path),
            PathTarget::HPath(hpath) => self.get_block_tree_by_hpath(ws, &req.box_id, hpath),
        }
    }

    /// Text content of one block, served from the tenant cache when possible.
    pub fn block_content(&self, ws: &Arc<WorkspaceDescriptor>, id: &str) -> KernelResult<Arc<CachedBlock>> {
        let cache = self.caches.get_or_create(ws.key())?;
        if let Some(hit) = cache.get_block(id) {
            return Ok(hit);
        }
        let generation = cache.generation();
        let entry = self.get_block_tree(ws, id)?;
        let tree = self.load_tree(ws, &BoxId::parse(&entry.box_id)?, &DocPath::parse(&entry.path)?)?;
        let node = tree
            .root
            .find(id)
            .ok_or_else(|| KernelError::NotFound(format!("block {id} in {}", entry.path)))?;
        let block = CachedBlock {
            id: id.to_string(),
            root_id: entry.root_id,
            box_id: entry.box_id,
            path: entry.path,
            updated: node.updated(),
            content: node.text_content(),
        };
        cache.put_block_since(block.clone(), generation);
        Ok(Arc::new(block))
    }

    /// Blocks that reference `def_id`, keyed by referencing block ID.
    ///
    /// Computed from the document files on a miss and cached until the
    /// definition changes or the entry expires.
    pub fn references_to(&self, ws: &Arc<WorkspaceDescriptor>, def_id: &str) -> KernelResult<Arc<RefSet>> {
        let def = self.get_block_tree(ws, def_id)?;
        let store = self.store(ws)?;
        store.cache().refs_or_load(def_id, || {
            let locations = store.scan_documents()?;
            let batch = store.load_locations(&locations)?;
            let mut refs = Vec::new();
            for tree in batch.trees.values() {
                for r in tree.outgoing_refs().into_iter().filter(|r| r.def_block_id == def_id) {
                    refs.push(BlockRef {
                        block_id: r.block_id,
                        root_id: tree.id.to_string(),
                        box_id: tree.box_id.to_string(),
                        path: tree.path.to_string(),
                        def_block_id: def.id.clone(),
                        def_root_id: def.root_id.clone(),
                        content: r.anchor,
                    });
                }
            }
            debug!(def = def_id, count = refs.len(), "computed back-references");
            Ok::<_, KernelError>(refs)
        })
    }

    // ---- Documents ----

    pub fn load_tree(&self, ws: &Arc<WorkspaceDescriptor>, box_id: &BoxId, path: &DocPath) -> KernelResult<DocumentTree> {
        self.with_store(ws, "load_tree", |s| Ok(s.load_tree(box_id, path)?))
    }

    pub fn load(&self, ws: &Arc<WorkspaceDescriptor>, req: &LoadTreeRequest) -> KernelResult<DocumentTree> {
        self.load_tree(ws, &req.box_id, &req.path)
    }

    /// Load the documents holding `ids`. Per-document failures are returned
    /// alongside the successes; see [`BatchLoadExt::into_result`].
    pub fn load_trees_batch(&self, ws: &Arc<WorkspaceDescriptor>, ids: &[String]) -> KernelResult<BatchLoad> {
        self.with_store(ws, "load_trees_batch", |s| Ok(s.load_trees_batch(ids)?))
    }

    /// Write a document file, then update its index rows and cache entries.
    /// Returns the number of bytes written.
    pub fn write_tree(&self, ws: &Arc<WorkspaceDescriptor>, tree: &mut DocumentTree) -> KernelResult<WriteReport> {
        let store = self.store(ws)?;
        let err = match store.write_tree(tree) {
            Ok(report) => return Ok(report),
            Err(e) => KernelError::from(e),
        };
        if !err.is_unavailable() {
            return Err(err);
        }
        // The file is on disk; only the index needs another attempt.
        warn!(workspace = %ws.key(), root = %tree.id, error = %err, "index unavailable after write, reopening");
        drop(store);
        let index = self.pool.reopen(ws)?;
        let store = self.prepare(ws, index)?;
        let report = self.upsert_with(&store, tree)?;
        let file = store.file_path(&tree.box_id, &tree.path);
        let bytes_written = std::fs::metadata(&file).map(|m| m.len()).unwrap_or_default();
        Ok(WriteReport {
            file,
            bytes_written,
            index: report,
        })
    }

    fn upsert_with(&self, store: &DocumentStore, tree: &DocumentTree) -> KernelResult<UpsertReport> {
        let report = store.index().upsert_document(tree)?;
        store.invalidate_written(tree, Some(&report));
        Ok(report)
    }

    /// Bring the index rows of a document that is already on disk in line
    /// with `tree`. Document writes go through [`Kernel::write_tree`], which
    /// does this itself.
    pub fn upsert_document_index(&self, ws: &Arc<WorkspaceDescriptor>, tree: &DocumentTree) -> KernelResult<UpsertReport> {
        self.with_store(ws, "upsert_document_index", |s| self.upsert_with(s, tree))
    }

    /// Remove every index row of a document. Returns the removed block IDs.
    pub fn remove_document_index(&self, ws: &Arc<WorkspaceDescriptor>, root_id: &str) -> KernelResult<Vec<String>> {
        self.with_store(ws, "remove_document_index", |s| Ok(s.remove_document_index(root_id)?))
    }

    /// Drop the index of `ws` and refill it from the document files.
    pub fn rebuild_index(&self, ws: &Arc<WorkspaceDescriptor>) -> KernelResult<ReindexReport> {
        self.with_store(ws, "rebuild_index", |s| Ok(s.rebuild_index()?))
    }

    // ---- Administration ----

    pub fn pool_stats(&self) -> KernelResult<PoolStats> {
        Ok(self.pool.stats()?)
    }

    pub fn cache_stats(&self) -> KernelResult<CacheManagerStats> {
        Ok(self.caches.stats()?)
    }

    /// Empty one tenant's caches. Returns `false` if it had none.
    pub fn clear_tenant_cache(&self, key: &WorkspaceKey) -> KernelResult<bool> {
        Ok(self.caches.clear(key)?)
    }

    pub fn set_cache_enabled(&self, ws: &WorkspaceDescriptor, enabled: bool) -> KernelResult<()> {
        self.caches.get_or_create(ws.key())?.set_enabled(enabled);
        info!(workspace = %ws.key(), enabled, "tenant cache toggled");
        Ok(())
    }

    /// Release a workspace's index handle and caches.
    pub fn close_workspace(&self, key: &WorkspaceKey) -> KernelResult<bool> {
        let closed = self.pool.close(key)?;
        let dropped = self.caches.remove(key)?;
        Ok(closed || dropped)
    }

    /// Close idle index handles and drop idle tenant caches.
    pub fn sweep_idle(&self) -> KernelResult<SweepReport> {
        Ok(SweepReport {
            handles_closed: self.pool.sweep_idle()?,
            caches_dropped: self.caches.sweep_idle()?,
        })
    }

    /// Close every index handle.
    pub fn shutdown(&self) -> KernelResult<usize> {
        Ok(self.pool.close_all()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_cache::CacheConfig;
    use loam_pool::PoolConfig;
    use loam_types::{BlockId, JsonTreeCodec, Node, NodeType, TreeCodec};

    fn kernel(dir: &tempfile::TempDir) -> (Kernel, Arc<WorkspaceDescriptor>) {
        let mut config = KernelConfig::default();
        config.workspace.root = dir.path().to_path_buf();
        config.loader.pretty = false;
        let kernel = Kernel::new(config);
        let ws = kernel.resolve(None).unwrap();
        ws.ensure_dirs().unwrap();
        (kernel, ws)
    }

    fn box1() -> BoxId {
        BoxId::parse("box1").unwrap()
    }

    fn doc(path: &str, title: &str, text: &str) -> DocumentTree {
        let mut tree = DocumentTree::new_document(box1(), DocPath::parse(path).unwrap(), "", title);
        let mut p = Node::block(NodeType::Paragraph, &BlockId::generate());
        p.children.push(Node::text(text));
        tree.root.children.push(p);
        tree
    }

    fn raw_write(ws: &WorkspaceDescriptor, tree: &DocumentTree) {
        let file = ws.doc_file(tree.box_id.as_str(), tree.path.as_str());
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(file, JsonTreeCodec.render(tree, false).unwrap()).unwrap();
    }

    #[test]
    fn missing_parent_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = kernel(&dir);
        // Warm the store first so the boot reindex does not repair A.sy
        // before the load does.
        kernel.store(&ws).unwrap();
        raw_write(&ws, &doc("/A/child.sy", "Child", "hi"));

        let tree = kernel.load_tree(&ws, &box1(), &DocPath::parse("A/child.sy").unwrap()).unwrap();
        assert_eq!(tree.hpath, "/Untitled/Child");

        assert!(ws.doc_file("box1", "/A.sy").is_file());
        let parent = kernel
            .get_block_tree_by_path(&ws, &box1(), &DocPath::parse("A.sy").unwrap())
            .unwrap();
        assert_eq!(parent.id, "A");
        assert_eq!(parent.hpath, "/Untitled");
        assert_eq!(kernel.get_block_tree_by_hpath(&ws, &box1(), "/Untitled").unwrap().id, "A");
    }

    #[test]
    fn written_blocks_resolve_and_removal_clears_them() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = kernel(&dir);
        let mut tree = doc("/20260101000000-top0001.sy", "Top", "hello");
        let report = kernel.write_tree(&ws, &mut tree).unwrap();
        assert!(report.bytes_written > 0);

        for id in tree.block_ids() {
            let entry = kernel.get_block_tree(&ws, &id).unwrap();
            assert_eq!(entry.root_id, tree.id.as_str());
            assert_eq!(entry.box_id, "box1");
            assert_eq!(entry.path, tree.path.as_str());
            assert_eq!(entry.hpath, "/Top");
        }
        assert_eq!(kernel.upsert_document_index(&ws, &tree).unwrap().mutations(), 0);

        kernel.remove_document_index(&ws, tree.id.as_str()).unwrap();
        for id in tree.block_ids() {
            assert!(kernel.get_block_tree(&ws, &id).unwrap_err().is_not_found());
        }
    }

    #[test]
    fn block_content_is_cached_and_invalidated_by_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = kernel(&dir);
        let mut tree = doc("/d.sy", "D", "first");
        kernel.write_tree(&ws, &mut tree).unwrap();
        let para = tree.root.children[0].id.clone();

        assert_eq!(kernel.block_content(&ws, &para).unwrap().content, "first");
        let cache = kernel.caches.get_or_create(ws.key()).unwrap();
        assert!(cache.get_block(&para).is_some());

        tree.root.children[0].children = vec![Node::text("second")];
        kernel.write_tree(&ws, &mut tree).unwrap();
        assert!(cache.get_block(&para).is_none());
        assert_eq!(kernel.block_content(&ws, &para).unwrap().content, "second");
    }

    #[test]
    fn references_are_derived_from_documents() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = kernel(&dir);
        let mut target = doc("/target.sy", "Target", "defined here");
        kernel.write_tree(&ws, &mut target).unwrap();

        let mut source = doc("/source.sy", "Source", "see ");
        let mut mark = Node::new(NodeType::TextMark);
        mark.extra.insert("TextMarkType".into(), "block-ref".into());
        mark.extra.insert("TextMarkBlockRefID".into(), "target".into());
        mark.extra.insert("TextMarkTextContent".into(), "Target".into());
        tree_para(&mut source).children.push(mark);
        kernel.write_tree(&ws, &mut source).unwrap();

        let refs = kernel.references_to(&ws, "target").unwrap();
        assert_eq!(refs.len(), 1);
        let r = refs.values().next().unwrap();
        assert_eq!(r.root_id, "source");
        assert_eq!(r.def_root_id, "target");
        assert_eq!(r.content, "Target");

        // Rewriting the definition drops the cached set.
        kernel.write_tree(&ws, &mut target).unwrap();
        let cache = kernel.caches.get_or_create(ws.key()).unwrap();
        assert!(cache.refs_for("target").is_none());
    }

    fn tree_para(tree: &mut DocumentTree) -> &mut Node {
        &mut tree.root.children[0]
    }

    #[test]
    fn batch_load_reports_partial_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = kernel(&dir);
        let mut a = doc("/a.sy", "A", "x");
        kernel.write_tree(&ws, &mut a).unwrap();

        let ok = kernel.load_trees_batch(&ws, &[a.id.to_string()]).unwrap();
        assert_eq!(ok.into_result().unwrap().len(), 1);

        let partial = kernel
            .load_trees_batch(&ws, &[a.id.to_string(), "ghost".to_string()])
            .unwrap();
        assert_eq!(partial.trees.len(), 1);
        let err = partial.into_result().unwrap_err();
        assert!(matches!(err, KernelError::PartialBatchFailure { loaded: 1, ref missing, .. } if missing == &["ghost"]));
    }

    #[test]
    fn deleted_store_is_refilled_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = kernel(&dir);
        let mut a = doc("/a.sy", "A", "x");
        kernel.write_tree(&ws, &mut a).unwrap();

        assert!(kernel.close_workspace(ws.key()).unwrap());
        std::fs::remove_file(ws.blocktree_db_path()).unwrap();

        let entry = kernel.get_block_tree(&ws, "a").unwrap();
        assert_eq!(entry.hpath, "/A");
    }

    #[test]
    fn pool_ceiling_surfaces_capacity_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = KernelConfig::default();
        config.workspace.root = dir.path().join("default");
        config.pool = PoolConfig {
            max_handles: 2,
            ..PoolConfig::default()
        };
        config.cache = CacheConfig {
            max_tenants: 10,
            ..CacheConfig::default()
        };
        let kernel = Kernel::new(config);
        let tenants: Vec<_> = (0..3)
            .map(|i| Arc::new(WorkspaceDescriptor::new(dir.path().join(format!("t{i}")))))
            .collect();
        let _a = kernel.store(&tenants[0]).unwrap();
        let _b = kernel.store(&tenants[1]).unwrap();
        let err = kernel.get_block_tree(&tenants[2], "x").unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(kernel.pool_stats().unwrap().total, 2);
    }

    #[test]
    fn tenants_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, default_ws) = kernel(&dir);
        let other = kernel
            .register_tenant(WorkspaceDescriptor::new(dir.path().join("other")))
            .unwrap();
        let mut tree = doc("/only.sy", "Only", "x");
        kernel.write_tree(&other, &mut tree).unwrap();

        assert!(kernel.get_block_tree(&other, "only").is_ok());
        assert!(kernel.get_block_tree(&default_ws, "only").unwrap_err().is_not_found());
        assert_eq!(kernel.pool_stats().unwrap().total, 2);
    }

    #[test]
    fn run_task_resolves_attached_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, default_ws) = kernel(&dir);
        let other = Arc::new(WorkspaceDescriptor::new(dir.path().join("other")));
        let resolved = kernel
            .run_task(Arc::clone(&other), |task| kernel.resolve(Some(task)).unwrap())
            .unwrap();
        assert_eq!(resolved.key(), other.key());
        assert_eq!(kernel.resolve(None).unwrap().key(), default_ws.key());
        assert_eq!(kernel.registry().attached_count(), 0);
    }

    #[test]
    fn clear_and_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = KernelConfig::default();
        config.workspace.root = dir.path().to_path_buf();
        config.pool.idle_timeout_secs = 0;
        config.cache.idle_timeout_secs = 0;
        let kernel = Kernel::new(config);
        let ws = kernel.resolve(None).unwrap();
        let mut tree = doc("/d.sy", "D", "x");
        kernel.write_tree(&ws, &mut tree).unwrap();
        kernel.block_content(&ws, tree.root.children[0].id.as_str()).unwrap();

        assert!(kernel.clear_tenant_cache(ws.key()).unwrap());
        let cached = kernel.caches.peek(ws.key()).unwrap().unwrap();
        assert!(cached.get_block(tree.root.children[0].id.as_str()).is_none());
        drop(cached);
        assert_eq!(kernel.cache_stats().unwrap().total, 1);
        assert!(!kernel.clear_tenant_cache(&WorkspaceKey::new("nobody")).unwrap());

        let swept = kernel.sweep_idle().unwrap();
        assert_eq!(swept, SweepReport { handles_closed: 1, caches_dropped: 1 });
        assert!(kernel.pool_stats().unwrap().handles.is_empty());
    }

    #[test]
    fn rebuild_reports_documents() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = kernel(&dir);
        kernel.write_tree(&ws, &mut doc("/a.sy", "A", "x")).unwrap();
        kernel.write_tree(&ws, &mut doc("/a/b.sy", "B", "x")).unwrap();
        let report = kernel.rebuild_index(&ws).unwrap();
        assert_eq!(report.documents, 2);
        assert_eq!(kernel.get_block_tree(&ws, "b").unwrap().hpath, "/A/B");
    }

    #[test]
    fn concurrent_first_access_waits_for_refill() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = kernel(&dir);
        let ids: Vec<String> = (0..24).map(|i| format!("d{i:02}")).collect();
        for id in &ids {
            raw_write(&ws, &doc(&format!("/{id}.sy"), id, "x"));
        }

        let barrier = std::sync::Barrier::new(4);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    barrier.wait();
                    for id in &ids {
                        assert_eq!(kernel.get_block_tree(&ws, id).unwrap().root_id, *id);
                    }
                });
            }
        });
        assert!(!kernel.pool.get_or_create(&ws).unwrap().is_refill_pending());
    }

    #[test]
    fn block_loaded_before_a_write_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = kernel(&dir);
        let mut tree = doc("/d.sy", "D", "first");
        kernel.write_tree(&ws, &mut tree).unwrap();
        let para = tree.root.children[0].id.clone();
        let cache = kernel.caches.get_or_create(ws.key()).unwrap();

        let before = cache.generation();
        let stale = CachedBlock {
            id: para.clone(),
            root_id: "d".into(),
            box_id: "box1".into(),
            path: "/d.sy".into(),
            updated: String::new(),
            content: "first".into(),
        };
        tree.root.children[0].children = vec![Node::text("second")];
        kernel.write_tree(&ws, &mut tree).unwrap();

        assert!(!cache.put_block_since(stale, before));
        assert_eq!(kernel.block_content(&ws, &para).unwrap().content, "second");
    }

    #[test]
    fn readers_never_keep_content_older_than_the_last_write() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = kernel(&dir);
        let mut tree = doc("/d.sy", "D", "v0");
        kernel.write_tree(&ws, &mut tree).unwrap();
        let para = tree.root.children[0].id.clone();

        std::thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    for _ in 0..20 {
                        kernel.block_content(&ws, &para).unwrap();
                    }
                });
            }
            s.spawn(|| {
                for i in 1..=10 {
                    tree.root.children[0].children = vec![Node::text(format!("v{i}"))];
                    kernel.write_tree(&ws, &mut tree).unwrap();
                }
            });
        });
        assert_eq!(kernel.block_content(&ws, &para).unwrap().content, "v10");
    }

    #[test]
    fn index_retry_path_keeps_backrefs_current() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = kernel(&dir);
        kernel.write_tree(&ws, &mut doc("/target.sy", "Target", "defined here")).unwrap();
        let mut source = doc("/source.sy", "Source", "see ");
        kernel.write_tree(&ws, &mut source).unwrap();
        assert!(kernel.references_to(&ws, "target").unwrap().is_empty());

        let mut mark = Node::new(NodeType::TextMark);
        mark.extra.insert("TextMarkType".into(), "block-ref".into());
        mark.extra.insert("TextMarkBlockRefID".into(), "target".into());
        tree_para(&mut source).children.push(mark);
        raw_write(&ws, &source);
        let store = kernel.store(&ws).unwrap();
        kernel.upsert_with(&store, &source).unwrap();
        assert_eq!(kernel.references_to(&ws, "target").unwrap().len(), 1);

        tree_para(&mut source).children.pop();
        raw_write(&ws, &source);
        kernel.upsert_with(&store, &source).unwrap();
        assert!(kernel.references_to(&ws, "target").unwrap().is_empty());
    }

    #[test]
    fn rebuild_racing_writes_keeps_the_written_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = kernel(&dir);
        let mut tree = doc("/d.sy", "D", "v0");
        kernel.write_tree(&ws, &mut tree).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..5 {
                    kernel.rebuild_index(&ws).unwrap();
                }
            });
            s.spawn(|| {
                for i in 1..=10 {
                    let mut p = Node::block(NodeType::Paragraph, &BlockId::generate());
                    p.children.push(Node::text(format!("v{i}")));
                    tree.root.children.push(p);
                    kernel.write_tree(&ws, &mut tree).unwrap();
                }
            });
        });

        let mut expected = tree.block_ids();
        expected.sort();
        let store = kernel.store(&ws).unwrap();
        let mut indexed: Vec<String> = store.index().by_root("d").unwrap().into_iter().map(|e| e.id).collect();
        indexed.sort();
        assert_eq!(indexed, expected);
    }

    #[test]
    fn disabled_cache_still_serves_content() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = kernel(&dir);
        let mut tree = doc("/d.sy", "D", "body");
        kernel.write_tree(&ws, &mut tree).unwrap();
        kernel.set_cache_enabled(&ws, false).unwrap();
        let id = tree.root.children[0].id.clone();
        assert_eq!(kernel.block_content(&ws, &id).unwrap().content, "body");
        assert!(kernel.caches.get_or_create(ws.key()).unwrap().get_block(&id).is_none());
    }
}
