//! Schema and connection setup for the block-tree store.

use std::time::Duration;

use rusqlite::Connection;

/// Table and index definitions. Safe to run on an existing store.
pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS blocktrees (
    id TEXT NOT NULL,
    root_id TEXT NOT NULL,
    parent_id TEXT NOT NULL,
    box_id TEXT NOT NULL,
    path TEXT NOT NULL,
    hpath TEXT NOT NULL,
    updated TEXT NOT NULL,
    type TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_blocktrees_id ON blocktrees(id);
CREATE INDEX IF NOT EXISTS idx_blocktrees_root_id ON blocktrees(root_id);
CREATE INDEX IF NOT EXISTS idx_blocktrees_box_path ON blocktrees(box_id, path);
CREATE INDEX IF NOT EXISTS idx_blocktrees_box_hpath ON blocktrees(box_id, hpath);
";

const DROP_SQL: &str = "DROP TABLE IF EXISTS blocktrees;";

/// Column list in the order [`crate::index`] reads rows.
pub const COLUMNS: &str = "id, root_id, parent_id, box_id, path, hpath, updated, type";

/// Apply connection pragmas: WAL journal, no fsync on commit (the index is
/// rebuildable) and a busy timeout so lock contention cannot block forever.
pub fn configure(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=OFF;
         PRAGMA temp_store=MEMORY;",
    )
}

/// Create the table and indexes if they do not exist.
pub fn bootstrap(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

/// Drop and recreate the table and indexes.
pub fn recreate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(DROP_SQL)?;
    bootstrap(conn)
}

/// Whether the store passes SQLite's quick integrity check.
pub fn is_intact(conn: &Connection) -> rusqlite::Result<bool> {
    let verdict: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    Ok(verdict == "ok")
}
