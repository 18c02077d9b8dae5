//! Rebuilding the index from document files.

use std::path::Path;
use std::time::Instant;

use loam_index::UpsertReport;
use loam_types::{migrate_tree, BlockTreeEntry, BoxId, DocPath, DocumentTree, DOC_EXT};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::batch::{BatchFailure, DocLocation};
use crate::error::{TreeError, TreeResult};
use crate::store::DocumentStore;

/// Directory names under the data dir that never hold a box.
const RESERVED_DIRS: &[&str] = &[
    "assets", "templates", "widgets", "plugins", "emojis", "public", "snippets", "storage", "conf", "temp",
    "repo", "history",
];

/// Outcome of a full reindex.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub documents: usize,
    pub blocks: usize,
    pub failures: Vec<BatchFailure>,
    pub elapsed_ms: u64,
}

fn is_box_dir(name: &str) -> bool {
    !name.starts_with('.') && !RESERVED_DIRS.contains(&name)
}

/// Index rows of a tree with the hpath left out, which a bare parse lacks.
fn row_shape(tree: &DocumentTree) -> Vec<BlockTreeEntry> {
    let mut rows = tree.block_entries();
    for row in &mut rows {
        row.hpath.clear();
    }
    rows
}

impl DocumentStore {
    /// Every document file in the workspace, ordered by box then path.
    pub fn scan_documents(&self) -> TreeResult<Vec<DocLocation>> {
        let data_dir = self.ws.data_dir();
        let boxes = match std::fs::read_dir(data_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(TreeError::Scan {
                    path: data_dir.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };

        let mut out = Vec::new();
        for entry in boxes.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.path().is_dir() || !is_box_dir(&name) {
                continue;
            }
            let Ok(box_id) = BoxId::parse(&name) else {
                continue;
            };
            self.scan_box(&box_id, &entry.path(), &mut out)?;
        }
        out.sort();
        Ok(out)
    }

    fn scan_box(&self, box_id: &BoxId, dir: &Path, out: &mut Vec<DocLocation>) -> TreeResult<()> {
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'));
        for entry in walker {
            let entry = entry.map_err(|e| TreeError::Scan {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() || !entry.file_name().to_string_lossy().ends_with(DOC_EXT) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(dir) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            match DocPath::parse(&relative) {
                Ok(path) => out.push(DocLocation::new(box_id.clone(), path)),
                Err(e) => warn!(box_id = %box_id, file = %relative, error = %e, "skipping unrecognized document file"),
            }
        }
        Ok(())
    }

    /// Drop the index and refill it from every document file. Cached blocks
    /// of the workspace are dropped as well.
    pub fn rebuild_index(&self) -> TreeResult<ReindexReport> {
        let started = Instant::now();
        let locations = self.scan_documents()?;
        info!(workspace = %self.ws.key(), documents = locations.len(), "rebuilding block tree index");

        self.index.reset()?;
        self.cache.clear();

        let loaded = self.load_locations(&locations)?;
        let mut report = ReindexReport {
            failures: loaded.failures,
            ..ReindexReport::default()
        };
        let mut trees: Vec<_> = loaded.trees.into_iter().collect();
        trees.sort_by(|a, b| a.0.cmp(&b.0));
        for (location, tree) in trees {
            match self.index_loaded(&location, &tree) {
                Ok(Some(indexed)) => {
                    report.documents += 1;
                    report.blocks += indexed.inserted;
                }
                Ok(None) => report.documents += 1,
                Err(TreeError::Index(e)) if e.is_unavailable() => return Err(e.into()),
                Err(e @ TreeError::LockPoisoned(_)) => return Err(e),
                Err(e) => {
                    warn!(location = %location, error = %e, "document failed to index");
                    report.failures.push(BatchFailure {
                        box_id: location.box_id.to_string(),
                        path: location.path.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(?report, "reindex finished");
        info!(
            documents = report.documents,
            blocks = report.blocks,
            failures = report.failures.len(),
            elapsed_ms = report.elapsed_ms,
            "block tree index rebuilt"
        );
        Ok(report)
    }

    /// Index a tree loaded during a rebuild, holding the document's path so
    /// no write interleaves. If the file changed since it was loaded, the
    /// writer has already indexed the newer version and nothing is done.
    pub(crate) fn index_loaded(&self, location: &DocLocation, tree: &DocumentTree) -> TreeResult<Option<UpsertReport>> {
        let file = self.file_path(&location.box_id, &location.path);
        let guard = self.locks.acquire(&file)?;
        let current = match self.read_held(&location.box_id, &location.path, &guard) {
            Ok(bytes) => self.codec.parse(&bytes, &location.box_id, &location.path).ok(),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        let unchanged = current.is_some_and(|mut current| {
            migrate_tree(&mut current);
            row_shape(&current) == row_shape(tree)
        });
        if !unchanged {
            debug!(location = %location, "document changed during rebuild, keeping newer rows");
            return Ok(None);
        }
        Ok(Some(self.index.index_document(tree)?))
    }
}
