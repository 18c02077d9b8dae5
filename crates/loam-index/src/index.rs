//! The block-tree index handle.
//!
//! One [`BlockTreeIndex`] owns one SQLite connection. The connection sits
//! behind a mutex, so reads and writes on a handle are serialized and a
//! diff-upsert computes and commits its diff without another writer
//! interleaving.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use loam_types::{normalize_hpath, BlockTreeEntry, BlockType, DocPath, DocumentTree};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::diff::{compute_diff, IndexDiff, UpsertReport};
use crate::error::{IndexError, IndexResult};
use crate::schema::{self, COLUMNS};

/// SQLite host-parameter budget per statement for bulk `IN (...)` queries.
const MAX_SQL_VARS: usize = 500;

const INSERT_SQL: &str = "INSERT INTO blocktrees (id, root_id, parent_id, box_id, path, hpath, updated, type) \
                          VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

/// Tuning for an index handle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    /// How long a statement waits on a locked store before failing.
    pub busy_timeout: Duration,
    /// Queries slower than this are logged at warn level.
    pub slow_query: Duration,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(7000),
            slow_query: Duration::from_millis(100),
        }
    }
}

/// How the store file was found when the handle was opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootState {
    /// An existing, healthy store was reused.
    Existing,
    /// No store file existed; an empty schema was created.
    Created,
    /// The store was unreadable and has been dropped and recreated.
    Recovered,
}

impl BootState {
    /// Whether the store starts empty and should be refilled from files.
    pub fn needs_reindex(self) -> bool {
        !matches!(self, Self::Existing)
    }
}

/// A per-workspace block-tree index.
pub struct BlockTreeIndex {
    path: PathBuf,
    conn: Mutex<Connection>,
    options: IndexOptions,
    boot: BootState,
    refill_pending: AtomicBool,
    refill_gate: Mutex<()>,
}

impl std::fmt::Debug for BlockTreeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockTreeIndex")
            .field("path", &self.path)
            .field("boot", &self.boot)
            .finish()
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<BlockTreeEntry> {
    Ok(BlockTreeEntry {
        id: row.get(0)?,
        root_id: row.get(1)?,
        parent_id: row.get(2)?,
        box_id: row.get(3)?,
        path: row.get(4)?,
        hpath: row.get(5)?,
        updated: row.get(6)?,
        block_type: BlockType::from_abbr(&row.get::<_, String>(7)?),
    })
}

fn query_rows<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> rusqlite::Result<Vec<BlockTreeEntry>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, read_row)?;
    rows.collect()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn open_connection(path: &Path, options: &IndexOptions) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| e.to_string())?;
    schema::configure(&conn, options.busy_timeout).map_err(|e| e.to_string())?;
    if !schema::is_intact(&conn).map_err(|e| e.to_string())? {
        return Err("integrity check failed".into());
    }
    schema::bootstrap(&conn).map_err(|e| e.to_string())?;
    Ok(conn)
}

fn remove_store_files(path: &Path) -> IndexResult<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        let file = PathBuf::from(file);
        match std::fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(IndexError::Io { path: file, source }),
        }
    }
    Ok(())
}

fn apply_diff(conn: &mut Connection, diff: &IndexDiff) -> rusqlite::Result<(usize, usize)> {
    let tx = conn.transaction()?;
    let mut inserted = 0;
    let mut deleted = 0;
    {
        let mut delete = tx.prepare_cached("DELETE FROM blocktrees WHERE id = ?1")?;
        for id in diff.upserts.iter().map(|e| &e.id).chain(diff.removals.iter()) {
            deleted += delete.execute([id])?;
        }
        let mut insert = tx.prepare_cached(INSERT_SQL)?;
        for e in &diff.upserts {
            insert.execute(params![
                e.id,
                e.root_id,
                e.parent_id,
                e.box_id,
                e.path,
                e.hpath,
                e.updated,
                e.block_type.as_str(),
            ])?;
            inserted += 1;
        }
    }
    tx.commit()?;
    Ok((inserted, deleted))
}

fn remove_matching(conn: &mut Connection, filter: &str, args: &[&dyn ToSql]) -> rusqlite::Result<Vec<String>> {
    let tx = conn.transaction()?;
    let ids = {
        let mut stmt = tx.prepare(&format!("SELECT id FROM blocktrees WHERE {filter}"))?;
        let rows = stmt.query_map(args, |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    tx.execute(&format!("DELETE FROM blocktrees WHERE {filter}"), args)?;
    tx.commit()?;
    Ok(ids)
}

impl BlockTreeIndex {
    /// Open (or create) the store at `path`.
    ///
    /// A store that cannot be opened or fails its integrity check is deleted
    /// and recreated empty; see [`BlockTreeIndex::boot_state`].
    pub fn open(path: impl Into<PathBuf>, options: IndexOptions) -> IndexResult<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| IndexError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let existed = path.exists();
        if !existed {
            // Journal files left behind by a deleted store must not be replayed.
            remove_store_files(&path)?;
        }
        let (conn, boot) = match open_connection(&path, &options) {
            Ok(conn) if existed => (conn, BootState::Existing),
            Ok(conn) => (conn, BootState::Created),
            Err(reason) => {
                warn!(path = %path.display(), %reason, "block tree store unusable, recreating");
                remove_store_files(&path)?;
                let conn = open_connection(&path, &options).map_err(|reason| IndexError::Unavailable {
                    path: path.clone(),
                    reason,
                })?;
                (conn, BootState::Recovered)
            }
        };
        debug!(path = %path.display(), ?boot, "opened block tree store");

        Ok(Self {
            path,
            conn: Mutex::new(conn),
            options,
            boot,
            refill_pending: AtomicBool::new(boot.needs_reindex()),
            refill_gate: Mutex::new(()),
        })
    }

    /// Path of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn boot_state(&self) -> BootState {
        self.boot
    }

    /// Whether the store started empty and has not been refilled yet.
    pub fn is_refill_pending(&self) -> bool {
        self.refill_pending.load(Ordering::Acquire)
    }

    /// Run `refill` once for a store that started empty.
    ///
    /// Concurrent callers block until the running refill ends, so none of
    /// them reads a half-filled store. A failed refill leaves the store
    /// pending and the next caller tries again. Returns `None` when no refill
    /// was needed.
    pub fn refill_if_pending<T, E>(&self, refill: impl FnOnce() -> Result<T, E>) -> Result<Option<T>, E> {
        if !self.is_refill_pending() {
            return Ok(None);
        }
        let _gate = self.refill_gate.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_refill_pending() {
            return Ok(None);
        }
        let out = refill()?;
        self.refill_pending.store(false, Ordering::Release);
        Ok(Some(out))
    }

    fn lock(&self) -> IndexResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| IndexError::LockPoisoned(e.to_string()))
    }

    fn sql_err(&self, err: rusqlite::Error) -> IndexError {
        IndexError::from_sql(&self.path, err)
    }

    fn observe(&self, op: &str, key: &str, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed > self.options.slow_query {
            warn!(op, key, elapsed_ms = elapsed.as_millis() as u64, "slow block tree query");
        }
    }

    fn select<P: rusqlite::Params>(&self, op: &str, key: &str, sql: &str, params: P) -> IndexResult<Vec<BlockTreeEntry>> {
        let started = Instant::now();
        let conn = self.lock()?;
        let rows = query_rows(&conn, sql, params).map_err(|e| self.sql_err(e))?;
        drop(conn);
        self.observe(op, key, started);
        Ok(rows)
    }

    fn select_one<P: rusqlite::Params>(&self, op: &str, key: &str, sql: &str, params: P) -> IndexResult<Option<BlockTreeEntry>> {
        let started = Instant::now();
        let conn = self.lock()?;
        let row = conn
            .prepare_cached(sql)
            .and_then(|mut stmt| stmt.query_row(params, read_row).optional())
            .map_err(|e| self.sql_err(e))?;
        drop(conn);
        self.observe(op, key, started);
        Ok(row)
    }

    fn count(&self, sql: &str) -> IndexResult<u64> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row(sql, [], |row| row.get(0))
            .map_err(|e| self.sql_err(e))?;
        Ok(n as u64)
    }

    // ---------------------------------------------------------------
    // Lookups
    // ---------------------------------------------------------------

    /// Look up one block.
    pub fn get(&self, id: &str) -> IndexResult<Option<BlockTreeEntry>> {
        self.select_one(
            "get",
            id,
            &format!("SELECT {COLUMNS} FROM blocktrees WHERE id = ?1"),
            [id],
        )
    }

    /// Look up many blocks at once. Unknown IDs are absent from the result.
    pub fn get_many(&self, ids: &[String]) -> IndexResult<HashMap<String, BlockTreeEntry>> {
        let started = Instant::now();
        let mut out = HashMap::with_capacity(ids.len());
        let conn = self.lock()?;
        for chunk in ids.chunks(MAX_SQL_VARS) {
            let sql = format!(
                "SELECT {COLUMNS} FROM blocktrees WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let rows = query_rows(&conn, &sql, params_from_iter(chunk.iter())).map_err(|e| self.sql_err(e))?;
            out.extend(rows.into_iter().map(|e| (e.id.clone(), e)));
        }
        drop(conn);
        self.observe("get_many", &format!("{} ids", ids.len()), started);
        Ok(out)
    }

    /// The subset of `ids` that have index rows.
    pub fn existing_ids(&self, ids: &[String]) -> IndexResult<HashSet<String>> {
        let mut out = HashSet::new();
        let conn = self.lock()?;
        for chunk in ids.chunks(MAX_SQL_VARS) {
            let sql = format!(
                "SELECT id FROM blocktrees WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let found = conn
                .prepare_cached(&sql)
                .and_then(|mut stmt| {
                    let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| row.get::<_, String>(0))?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()
                })
                .map_err(|e| self.sql_err(e))?;
            out.extend(found);
        }
        Ok(out)
    }

    /// The document at `path` in `box_id`.
    pub fn root_by_path(&self, box_id: &str, path: &DocPath) -> IndexResult<Option<BlockTreeEntry>> {
        self.select_one(
            "root_by_path",
            path.as_str(),
            &format!(
                "SELECT {COLUMNS} FROM blocktrees WHERE box_id = ?1 AND path = ?2 AND type = 'd' LIMIT 1"
            ),
            params![box_id, path.as_str()],
        )
    }

    /// The first document with human-readable path `hpath` in `box_id`.
    ///
    /// Invisible characters are stripped from `hpath` before matching.
    pub fn root_by_hpath(&self, box_id: &str, hpath: &str) -> IndexResult<Option<BlockTreeEntry>> {
        Ok(self.roots_by_hpath(box_id, hpath)?.into_iter().next())
    }

    /// Every document with human-readable path `hpath` in `box_id`, ordered
    /// by path. Sibling documents may share a title.
    pub fn roots_by_hpath(&self, box_id: &str, hpath: &str) -> IndexResult<Vec<BlockTreeEntry>> {
        let hpath = normalize_hpath(hpath);
        self.select(
            "roots_by_hpath",
            &hpath,
            &format!(
                "SELECT {COLUMNS} FROM blocktrees WHERE box_id = ?1 AND hpath = ?2 AND type = 'd' ORDER BY path"
            ),
            params![box_id, hpath],
        )
    }

    /// Like [`root_by_hpath`](Self::root_by_hpath), but among documents sharing
    /// the hpath prefer the one whose parent document is `parent_id`.
    pub fn root_by_hpath_preferring_parent(
        &self,
        box_id: &str,
        hpath: &str,
        parent_id: &str,
    ) -> IndexResult<Option<BlockTreeEntry>> {
        let mut roots = self.roots_by_hpath(box_id, hpath)?;
        let preferred = roots.iter().position(|e| {
            DocPath::parse(&e.path)
                .ok()
                .and_then(|p| p.parent())
                .is_some_and(|p| p.doc_id().as_str() == parent_id)
        });
        Ok(match preferred {
            Some(i) => Some(roots.swap_remove(i)),
            None => roots.into_iter().next(),
        })
    }

    /// Every block of one document.
    pub fn by_root(&self, root_id: &str) -> IndexResult<Vec<BlockTreeEntry>> {
        self.select(
            "by_root",
            root_id,
            &format!("SELECT {COLUMNS} FROM blocktrees WHERE root_id = ?1"),
            [root_id],
        )
    }

    /// Every block in one box.
    pub fn by_box(&self, box_id: &str) -> IndexResult<Vec<BlockTreeEntry>> {
        self.select(
            "by_box",
            box_id,
            &format!("SELECT {COLUMNS} FROM blocktrees WHERE box_id = ?1"),
            [box_id],
        )
    }

    /// Every block whose path starts with the raw string `prefix`.
    pub fn by_path_prefix(&self, box_id: &str, prefix: &str) -> IndexResult<Vec<BlockTreeEntry>> {
        self.select(
            "by_path_prefix",
            prefix,
            &format!("SELECT {COLUMNS} FROM blocktrees WHERE box_id = ?1 AND substr(path, 1, ?2) = ?3"),
            params![box_id, prefix.chars().count() as i64, prefix],
        )
    }

    /// Every block of a document and of all documents nested beneath it.
    pub fn subtree(&self, box_id: &str, doc: &DocPath) -> IndexResult<Vec<BlockTreeEntry>> {
        let dir = format!("/{}/", doc.children_dir());
        self.select(
            "subtree",
            doc.as_str(),
            &format!(
                "SELECT {COLUMNS} FROM blocktrees WHERE box_id = ?1 AND (path = ?2 OR substr(path, 1, ?3) = ?4)"
            ),
            params![box_id, doc.as_str(), dir.chars().count() as i64, dir],
        )
    }

    /// Up to `limit` blocks of one type.
    pub fn by_type(&self, block_type: &BlockType, limit: usize) -> IndexResult<Vec<BlockTreeEntry>> {
        self.select(
            "by_type",
            block_type.as_str(),
            &format!("SELECT {COLUMNS} FROM blocktrees WHERE type = ?1 LIMIT ?2"),
            params![block_type.as_str(), limit as i64],
        )
    }

    pub fn count_blocks(&self) -> IndexResult<u64> {
        self.count("SELECT count(*) FROM blocktrees")
    }

    pub fn count_documents(&self) -> IndexResult<u64> {
        self.count("SELECT count(*) FROM blocktrees WHERE type = 'd'")
    }

    /// Rows changed by this connection since it was opened.
    pub fn total_changes(&self) -> IndexResult<u64> {
        self.count("SELECT total_changes()")
    }

    // ---------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------

    /// Bring the rows of one document in line with `tree`, touching only
    /// rows that changed. Re-upserting an unchanged tree writes nothing.
    pub fn upsert_document(&self, tree: &DocumentTree) -> IndexResult<UpsertReport> {
        let started = Instant::now();
        let fresh = tree.block_entries();
        let root_id = tree.id.to_string();

        let mut conn = self.lock()?;
        let existing = query_rows(
            &conn,
            &format!("SELECT {COLUMNS} FROM blocktrees WHERE root_id = ?1"),
            [root_id.as_str()],
        )
        .map_err(|e| self.sql_err(e))?;
        let diff = compute_diff(&existing, &fresh);
        if diff.is_empty() {
            debug!(root = %root_id, "block tree unchanged");
            return Ok(UpsertReport {
                root_id,
                ..UpsertReport::default()
            });
        }
        let (inserted, deleted) = apply_diff(&mut conn, &diff).map_err(|e| self.sql_err(e))?;
        drop(conn);
        self.observe("upsert_document", &root_id, started);

        debug!(root = %root_id, inserted, deleted, "block tree upserted");
        Ok(UpsertReport {
            root_id,
            inserted,
            deleted,
            touched_ids: diff.touched_ids(),
        })
    }

    /// Replace every row of one document without diffing. Used when
    /// refilling an empty store from files.
    pub fn index_document(&self, tree: &DocumentTree) -> IndexResult<UpsertReport> {
        let fresh = tree.block_entries();
        let root_id = tree.id.to_string();
        let mut conn = self.lock()?;
        let stale = query_rows(
            &conn,
            &format!("SELECT {COLUMNS} FROM blocktrees WHERE root_id = ?1"),
            [root_id.as_str()],
        )
        .map_err(|e| self.sql_err(e))?;
        let live: HashSet<&str> = fresh.iter().map(|e| e.id.as_str()).collect();
        let diff = IndexDiff {
            removals: stale
                .into_iter()
                .map(|e| e.id)
                .filter(|id| !live.contains(id.as_str()))
                .collect(),
            upserts: fresh.clone(),
        };
        let (inserted, deleted) = apply_diff(&mut conn, &diff).map_err(|e| self.sql_err(e))?;
        Ok(UpsertReport {
            root_id,
            inserted,
            deleted,
            touched_ids: diff.touched_ids(),
        })
    }

    fn remove(&self, op: &str, key: &str, filter: &str, args: &[&dyn ToSql]) -> IndexResult<Vec<String>> {
        let started = Instant::now();
        let mut conn = self.lock()?;
        let ids = remove_matching(&mut conn, filter, args).map_err(|e| self.sql_err(e))?;
        drop(conn);
        self.observe(op, key, started);
        if !ids.is_empty() {
            debug!(op, key, removed = ids.len(), "block tree rows removed");
        }
        Ok(ids)
    }

    /// Remove every row of one document. Returns the removed block IDs.
    pub fn remove_root(&self, root_id: &str) -> IndexResult<Vec<String>> {
        self.remove("remove_root", root_id, "root_id = ?1", &[&root_id])
    }

    /// Remove every row in one box. Returns the removed block IDs.
    pub fn remove_box(&self, box_id: &str) -> IndexResult<Vec<String>> {
        self.remove("remove_box", box_id, "box_id = ?1", &[&box_id])
    }

    /// Remove every row whose path starts with the raw string `prefix`.
    pub fn remove_path_prefix(&self, box_id: &str, prefix: &str) -> IndexResult<Vec<String>> {
        let len = prefix.chars().count() as i64;
        self.remove(
            "remove_path_prefix",
            prefix,
            "box_id = ?1 AND substr(path, 1, ?2) = ?3",
            &[&box_id, &len, &prefix],
        )
    }

    /// Remove the rows of a document and every document beneath it.
    pub fn remove_subtree(&self, box_id: &str, doc: &DocPath) -> IndexResult<Vec<String>> {
        let dir = format!("/{}/", doc.children_dir());
        let len = dir.chars().count() as i64;
        self.remove(
            "remove_subtree",
            doc.as_str(),
            "box_id = ?1 AND (path = ?2 OR substr(path, 1, ?3) = ?4)",
            &[&box_id, &doc.as_str(), &len, &dir],
        )
    }

    /// Remove one block's row. Returns `true` if it existed.
    pub fn remove_block(&self, id: &str) -> IndexResult<bool> {
        Ok(!self.remove("remove_block", id, "id = ?1", &[&id])?.is_empty())
    }

    /// Drop and recreate the schema, leaving the store empty.
    pub fn reset(&self) -> IndexResult<()> {
        let conn = self.lock()?;
        schema::recreate(&conn).map_err(|e| self.sql_err(e))?;
        info!(path = %self.path.display(), "block tree store reset");
        Ok(())
    }
}
