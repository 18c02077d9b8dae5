use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use loam_index::BlockTreeIndex;
use loam_workspace::{WorkspaceDescriptor, WorkspaceKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};

/// One open index and its usage bookkeeping.
struct PooledConnection {
    index: Arc<BlockTreeIndex>,
    created_at: DateTime<Utc>,
    last_used: Instant,
    access_count: u64,
}

impl PooledConnection {
    fn touch(&mut self) -> Arc<BlockTreeIndex> {
        self.last_used = Instant::now();
        self.access_count += 1;
        Arc::clone(&self.index)
    }

    /// Borrowers hold clones of the `Arc`; the pool's own copy is the only
    /// one left once every borrow has ended.
    fn is_borrowed(&self) -> bool {
        Arc::strong_count(&self.index) > 1
    }

    fn is_reapable(&self, now: Instant, idle_timeout: Duration) -> bool {
        !self.is_borrowed() && now.duration_since(self.last_used) >= idle_timeout
    }
}

/// Snapshot of one pooled handle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleStats {
    pub key: WorkspaceKey,
    pub db_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub idle_secs: u64,
    pub access_count: u64,
    pub borrowed: bool,
}

/// Snapshot of the whole pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total: usize,
    pub max_handles: usize,
    pub idle_timeout_secs: u64,
    pub handles: Vec<HandleStats>,
}

/// Pool of per-workspace [`BlockTreeIndex`] handles.
///
/// All creation, touch and removal happens under one write lock, so the idle
/// sweep never closes a handle between a borrower finding it and marking it
/// used. Handles still referenced by a borrower are never reaped.
pub struct ConnectionPool {
    config: PoolConfig,
    handles: RwLock<HashMap<WorkspaceKey, PooledConnection>>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_handles", &self.config.max_handles)
            .field("open", &self.len())
            .finish()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> PoolError {
    PoolError::LockPoisoned(e.to_string())
}

fn reap_idle(
    handles: &mut HashMap<WorkspaceKey, PooledConnection>,
    idle_timeout: Duration,
) -> Vec<WorkspaceKey> {
    let now = Instant::now();
    let stale: Vec<WorkspaceKey> = handles
        .iter()
        .filter(|(_, conn)| conn.is_reapable(now, idle_timeout))
        .map(|(key, _)| key.clone())
        .collect();
    for key in &stale {
        handles.remove(key);
    }
    stale
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.handles.read().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &WorkspaceKey) -> bool {
        self.handles
            .read()
            .map(|h| h.contains_key(key))
            .unwrap_or(false)
    }

    fn write(&self) -> PoolResult<RwLockWriteGuard<'_, HashMap<WorkspaceKey, PooledConnection>>> {
        self.handles.write().map_err(poisoned)
    }

    /// Borrow the index of `ws`, opening it on first use.
    ///
    /// Opening creates the store file and schema if needed. When the pool is
    /// full, idle handles are reaped first; if none can be reaped the call
    /// fails with [`PoolError::CapacityExceeded`].
    pub fn get_or_create(&self, ws: &WorkspaceDescriptor) -> PoolResult<Arc<BlockTreeIndex>> {
        let key = ws.key();
        let known = self.handles.read().map_err(poisoned)?.contains_key(key);

        let mut handles = self.write()?;
        if let Some(conn) = handles.get_mut(key) {
            return Ok(conn.touch());
        }
        if known {
            debug!(workspace = %key, "handle evicted between lookup and borrow");
        }

        if handles.len() >= self.config.max_handles {
            let reaped = reap_idle(&mut handles, self.config.idle_timeout());
            if !reaped.is_empty() {
                info!(count = reaped.len(), "reaped idle index handles under capacity pressure");
            }
            if handles.len() >= self.config.max_handles {
                warn!(
                    workspace = %key,
                    limit = self.config.max_handles,
                    "connection pool full"
                );
                return Err(PoolError::CapacityExceeded {
                    limit: self.config.max_handles,
                });
            }
        }

        let index = Arc::new(BlockTreeIndex::open(
            ws.blocktree_db_path(),
            self.config.index_options(),
        )?);
        info!(
            workspace = %key,
            path = %ws.blocktree_db_path().display(),
            boot = ?index.boot_state(),
            "opened index handle"
        );
        handles.insert(
            key.clone(),
            PooledConnection {
                index: Arc::clone(&index),
                created_at: Utc::now(),
                last_used: Instant::now(),
                access_count: 1,
            },
        );
        Ok(index)
    }

    /// Close handles idle longer than the configured timeout.
    ///
    /// Returns the number of handles closed.
    pub fn sweep_idle(&self) -> PoolResult<usize> {
        let mut handles = self.write()?;
        let reaped = reap_idle(&mut handles, self.config.idle_timeout());
        for key in &reaped {
            debug!(workspace = %key, "closed idle index handle");
        }
        Ok(reaped.len())
    }

    /// Close one workspace's handle. Borrowers keep their handle alive until
    /// they drop it. Returns `true` if a handle was pooled.
    pub fn close(&self, key: &WorkspaceKey) -> PoolResult<bool> {
        let removed = self.write()?.remove(key).is_some();
        if removed {
            info!(workspace = %key, "closed index handle");
        }
        Ok(removed)
    }

    /// Close every handle. Returns the number closed.
    pub fn close_all(&self) -> PoolResult<usize> {
        let mut handles = self.write()?;
        let count = handles.len();
        handles.clear();
        info!(count, "closed all index handles");
        Ok(count)
    }

    /// Drop the pooled handle of `ws` and open a fresh one, which recreates
    /// the store if it is missing or unreadable.
    pub fn reopen(&self, ws: &WorkspaceDescriptor) -> PoolResult<Arc<BlockTreeIndex>> {
        self.close(ws.key())?;
        self.get_or_create(ws)
    }

    pub fn stats(&self) -> PoolResult<PoolStats> {
        let handles = self.handles.read().map_err(poisoned)?;
        let now = Instant::now();
        let mut entries: Vec<HandleStats> = handles
            .iter()
            .map(|(key, conn)| HandleStats {
                key: key.clone(),
                db_path: conn.index.path().to_path_buf(),
                created_at: conn.created_at,
                idle_secs: now.duration_since(conn.last_used).as_secs(),
                access_count: conn.access_count,
                borrowed: conn.is_borrowed(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(PoolStats {
            total: entries.len(),
            max_handles: self.config.max_handles,
            idle_timeout_secs: self.config.idle_timeout_secs,
            handles: entries,
        })
    }
}
