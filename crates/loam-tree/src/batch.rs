//! Parallel loading of many documents.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use loam_types::{BlockTreeEntry, BoxId, DocPath, DocumentTree};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{TreeError, TreeResult};
use crate::store::DocumentStore;

/// One document file: a box and a path within it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DocLocation {
    pub box_id: BoxId,
    pub path: DocPath,
}

impl DocLocation {
    pub fn new(box_id: BoxId, path: DocPath) -> Self {
        Self { box_id, path }
    }

    /// Location of the document holding an indexed block.
    pub fn of_entry(entry: &BlockTreeEntry) -> TreeResult<Self> {
        Ok(Self {
            box_id: BoxId::parse(&entry.box_id)?,
            path: DocPath::parse(&entry.path)?,
        })
    }
}

impl fmt::Display for DocLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.box_id, self.path)
    }
}

/// A document that could not be loaded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub box_id: String,
    pub path: String,
    pub error: String,
}

impl BatchFailure {
    fn new(location: &DocLocation, error: &TreeError) -> Self {
        Self {
            box_id: location.box_id.to_string(),
            path: location.path.to_string(),
            error: error.to_string(),
        }
    }
}

/// Trees loaded by location.
#[derive(Debug, Default)]
pub struct LocationBatch {
    pub trees: HashMap<DocLocation, Arc<DocumentTree>>,
    pub failures: Vec<BatchFailure>,
}

/// Trees loaded for a set of block IDs.
#[derive(Debug, Default)]
pub struct BatchLoad {
    /// Requested block ID to the tree containing it. Blocks in the same
    /// document share one tree.
    pub trees: HashMap<String, Arc<DocumentTree>>,
    /// Documents that were found in the index but failed to load.
    pub failures: Vec<BatchFailure>,
    /// Requested IDs with no index row.
    pub missing: Vec<String>,
}

impl BatchLoad {
    /// Whether every requested ID produced a tree.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.missing.is_empty()
    }
}

impl DocumentStore {
    /// Load many documents in parallel, each distinct location once.
    ///
    /// Failures are collected per document; only a failure to start the
    /// workers fails the whole call.
    pub fn load_locations(&self, locations: &[DocLocation]) -> TreeResult<LocationBatch> {
        let mut seen = HashSet::new();
        let unique: Vec<&DocLocation> = locations.iter().filter(|l| seen.insert(*l)).collect();
        if unique.is_empty() {
            return Ok(LocationBatch::default());
        }

        let workers = self.config.worker_count().min(unique.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("loam-load-{i}"))
            .build()
            .map_err(|e| TreeError::WorkerPool(e.to_string()))?;

        let results: Vec<(&DocLocation, TreeResult<DocumentTree>)> = pool.install(|| {
            unique
                .par_iter()
                .map(|loc| (*loc, self.load_tree(&loc.box_id, &loc.path)))
                .collect()
        });

        let mut batch = LocationBatch::default();
        for (loc, result) in results {
            match result {
                Ok(tree) => {
                    batch.trees.insert(loc.clone(), Arc::new(tree));
                }
                Err(e) => {
                    warn!(location = %loc, error = %e, "document failed to load");
                    batch.failures.push(BatchFailure::new(loc, &e));
                }
            }
        }
        debug!(
            requested = locations.len(),
            loaded = batch.trees.len(),
            failed = batch.failures.len(),
            workers,
            "batch load finished"
        );
        Ok(batch)
    }

    /// Load the documents containing the given blocks.
    pub fn load_trees_batch(&self, ids: &[String]) -> TreeResult<BatchLoad> {
        let entries = self.index.get_many(ids)?;
        let mut out = BatchLoad::default();
        let mut wanted: Vec<(&String, DocLocation)> = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(entry) = entries.get(id) else {
                out.missing.push(id.clone());
                continue;
            };
            match DocLocation::of_entry(entry) {
                Ok(loc) => wanted.push((id, loc)),
                Err(e) => out.failures.push(BatchFailure {
                    box_id: entry.box_id.clone(),
                    path: entry.path.clone(),
                    error: e.to_string(),
                }),
            }
        }

        let locations: Vec<DocLocation> = wanted.iter().map(|(_, loc)| loc.clone()).collect();
        let loaded = self.load_locations(&locations)?;
        for (id, loc) in wanted {
            if let Some(tree) = loaded.trees.get(&loc) {
                out.trees.insert(id.clone(), Arc::clone(tree));
            }
        }
        out.failures.extend(loaded.failures);
        out.missing.sort();
        out.missing.dedup();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::*;
    use loam_types::TreeCodec;

    fn write(fx: &Fixture, p: &str, title: &str) -> DocumentTree {
        let mut tree = doc(p, title, "body");
        fx.store.write_tree(&mut tree).unwrap();
        tree
    }

    #[test]
    fn blocks_of_one_document_share_a_tree() {
        let fx = fixture();
        let a = write(&fx, "/a.sy", "A");
        let b = write(&fx, "/b.sy", "B");
        let a_para = a.root.children[0].id.clone();

        let ids = vec![a.id.to_string(), a_para.clone(), b.id.to_string()];
        let batch = fx.store.load_trees_batch(&ids).unwrap();
        assert!(batch.is_complete());
        assert_eq!(batch.trees.len(), 3);
        assert!(Arc::ptr_eq(&batch.trees[a.id.as_str()], &batch.trees[&a_para]));
        assert_eq!(batch.trees[b.id.as_str()].title(), "B");
    }

    #[test]
    fn unknown_ids_are_reported_missing() {
        let fx = fixture();
        let a = write(&fx, "/a.sy", "A");
        let ids = vec![a.id.to_string(), "ghost".to_string(), "ghost".to_string()];
        let batch = fx.store.load_trees_batch(&ids).unwrap();
        assert_eq!(batch.trees.len(), 1);
        assert_eq!(batch.missing, vec!["ghost".to_string()]);
        assert!(!batch.is_complete());
    }

    #[test]
    fn one_bad_document_does_not_sink_the_batch() {
        let fx = fixture();
        let good = write(&fx, "/good.sy", "Good");
        let bad = write(&fx, "/bad.sy", "Bad");
        put_raw(&fx.store, "/bad.sy", b"garbage");

        let ids = vec![good.id.to_string(), bad.id.to_string()];
        let batch = fx.store.load_trees_batch(&ids).unwrap();
        assert_eq!(batch.trees.len(), 1);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].path, "/bad.sy");
    }

    #[test]
    fn locations_are_deduplicated() {
        let fx = fixture();
        write(&fx, "/a.sy", "A");
        let loc = DocLocation::new(box1(), path("/a.sy"));
        let batch = fx.store.load_locations(&[loc.clone(), loc.clone(), loc.clone()]).unwrap();
        assert_eq!(batch.trees.len(), 1);
        assert!(batch.failures.is_empty());
    }

    #[test]
    fn siblings_sharing_a_missing_parent_create_it_once() {
        let fx = fixture();
        let mut locations = Vec::new();
        for i in 0..6 {
            let p = format!("/P/c{i}.sy");
            let child = doc(&p, &format!("C{i}"), "x");
            put_raw(&fx.store, &p, &loam_types::JsonTreeCodec.render(&child, false).unwrap());
            locations.push(DocLocation::new(box1(), path(&p)));
        }
        let batch = fx.store.load_locations(&locations).unwrap();
        assert_eq!(batch.trees.len(), 6);
        assert!(batch.trees.values().all(|t| t.hpath.starts_with("/Untitled/C")));
        assert_eq!(fx.store.index().by_root("P").unwrap().len(), 2);
    }

    #[test]
    fn empty_batch_is_empty() {
        let fx = fixture();
        let batch = fx.store.load_trees_batch(&[]).unwrap();
        assert!(batch.trees.is_empty());
        assert!(batch.is_complete());
    }
}
