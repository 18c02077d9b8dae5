use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use loam_workspace::WorkspaceKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::tenant::{TenantCache, TenantCacheStats};

struct TenantSlot {
    cache: Arc<TenantCache>,
    last_access: Instant,
}

impl TenantSlot {
    fn is_reapable(&self, now: Instant, idle_timeout: Duration) -> bool {
        Arc::strong_count(&self.cache) == 1 && now.duration_since(self.last_access) >= idle_timeout
    }
}

/// Snapshot of every tenant cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheManagerStats {
    pub total: usize,
    pub max_tenants: usize,
    pub tenants: Vec<(WorkspaceKey, TenantCacheStats)>,
}

/// Owns one [`TenantCache`] per workspace, capped and swept like the
/// connection pool.
pub struct TenantCacheManager {
    config: CacheConfig,
    tenants: RwLock<HashMap<WorkspaceKey, TenantSlot>>,
}

impl std::fmt::Debug for TenantCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCacheManager")
            .field("max_tenants", &self.config.max_tenants)
            .field("tenants", &self.len())
            .finish()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> CacheError {
    CacheError::LockPoisoned(e.to_string())
}

fn reap_idle(tenants: &mut HashMap<WorkspaceKey, TenantSlot>, idle_timeout: Duration) -> usize {
    let now = Instant::now();
    let before = tenants.len();
    tenants.retain(|key, slot| {
        if slot.is_reapable(now, idle_timeout) {
            slot.cache.clear();
            debug!(workspace = %key, "dropped idle tenant cache");
            false
        } else {
            true
        }
    });
    before - tenants.len()
}

impl TenantCacheManager {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            tenants: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.tenants.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The cache set of `key`, created on first use.
    pub fn get_or_create(&self, key: &WorkspaceKey) -> CacheResult<Arc<TenantCache>> {
        let mut tenants = self.tenants.write().map_err(poisoned)?;
        if let Some(slot) = tenants.get_mut(key) {
            slot.last_access = Instant::now();
            return Ok(Arc::clone(&slot.cache));
        }

        if tenants.len() >= self.config.max_tenants {
            let reaped = reap_idle(&mut tenants, self.config.idle_timeout());
            if reaped > 0 {
                info!(count = reaped, "reaped idle tenant caches under capacity pressure");
            }
            if tenants.len() >= self.config.max_tenants {
                warn!(workspace = %key, limit = self.config.max_tenants, "tenant cache limit reached");
                return Err(CacheError::CapacityExceeded {
                    limit: self.config.max_tenants,
                });
            }
        }

        let cache = Arc::new(TenantCache::new(key.clone(), &self.config));
        tenants.insert(
            key.clone(),
            TenantSlot {
                cache: Arc::clone(&cache),
                last_access: Instant::now(),
            },
        );
        debug!(workspace = %key, "created tenant cache");
        Ok(cache)
    }

    /// The cache set of `key` if one exists, without creating or touching it.
    pub fn peek(&self, key: &WorkspaceKey) -> CacheResult<Option<Arc<TenantCache>>> {
        Ok(self
            .tenants
            .read()
            .map_err(poisoned)?
            .get(key)
            .map(|slot| Arc::clone(&slot.cache)))
    }

    /// Empty one tenant's caches. Returns `false` if the tenant has none.
    pub fn clear(&self, key: &WorkspaceKey) -> CacheResult<bool> {
        match self.peek(key)? {
            Some(cache) => {
                cache.clear();
                info!(workspace = %key, "cleared tenant cache");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Invalidate blocks in one tenant's caches, if it has any.
    pub fn invalidate<S: AsRef<str>>(&self, key: &WorkspaceKey, ids: &[S]) -> CacheResult<()> {
        if let Some(cache) = self.peek(key)? {
            cache.invalidate_many(ids);
        }
        Ok(())
    }

    /// Drop one tenant's cache set entirely.
    pub fn remove(&self, key: &WorkspaceKey) -> CacheResult<bool> {
        let removed = self.tenants.write().map_err(poisoned)?.remove(key);
        if let Some(slot) = &removed {
            slot.cache.clear();
        }
        Ok(removed.is_some())
    }

    /// Clear and drop tenant caches idle past the timeout. Returns the
    /// number dropped.
    pub fn sweep_idle(&self) -> CacheResult<usize> {
        let mut tenants = self.tenants.write().map_err(poisoned)?;
        Ok(reap_idle(&mut tenants, self.config.idle_timeout()))
    }

    pub fn stats(&self) -> CacheResult<CacheManagerStats> {
        let tenants = self.tenants.read().map_err(poisoned)?;
        let mut entries: Vec<(WorkspaceKey, TenantCacheStats)> = tenants
            .iter()
            .map(|(key, slot)| (key.clone(), slot.cache.stats()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(CacheManagerStats {
            total: entries.len(),
            max_tenants: self.config.max_tenants,
            tenants: entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::CachedBlock;

    fn manager(max_tenants: usize, idle_timeout_secs: u64) -> TenantCacheManager {
        TenantCacheManager::new(CacheConfig {
            max_tenants,
            idle_timeout_secs,
            ..CacheConfig::default()
        })
    }

    fn key(i: usize) -> WorkspaceKey {
        WorkspaceKey::new(format!("/ws/{i}"))
    }

    fn block(id: &str) -> CachedBlock {
        CachedBlock {
            id: id.into(),
            root_id: id.into(),
            box_id: "box".into(),
            path: format!("/{id}.sy"),
            updated: String::new(),
            content: "text".into(),
        }
    }

    #[test]
    fn same_key_shares_cache() {
        let m = manager(10, 60);
        let a = m.get_or_create(&key(0)).unwrap();
        let b = m.get_or_create(&key(0)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn tenants_are_isolated() {
        let m = manager(10, 60);
        m.get_or_create(&key(0)).unwrap().put_block(block("x"));
        assert!(m.get_or_create(&key(1)).unwrap().get_block("x").is_none());
    }

    #[test]
    fn ceiling_is_enforced() {
        let m = manager(2, 3600);
        let _a = m.get_or_create(&key(0)).unwrap();
        let _b = m.get_or_create(&key(1)).unwrap();
        let err = m.get_or_create(&key(2)).unwrap_err();
        assert!(matches!(err, CacheError::CapacityExceeded { limit: 2 }));
    }

    #[test]
    fn full_manager_reaps_idle_tenant() {
        let m = manager(2, 0);
        drop(m.get_or_create(&key(0)).unwrap());
        let _b = m.get_or_create(&key(1)).unwrap();
        m.get_or_create(&key(2)).unwrap();
        assert_eq!(m.len(), 2);
        assert!(m.peek(&key(0)).unwrap().is_none());
    }

    #[test]
    fn clear_and_invalidate_reach_existing_tenants_only() {
        let m = manager(10, 60);
        let c = m.get_or_create(&key(0)).unwrap();
        c.put_block(block("x"));
        c.put_block(block("y"));
        m.invalidate(&key(0), &["x"]).unwrap();
        assert!(c.get_block("x").is_none());
        assert!(c.get_block("y").is_some());
        assert!(m.clear(&key(0)).unwrap());
        assert!(c.get_block("y").is_none());

        assert!(!m.clear(&key(9)).unwrap());
        m.invalidate(&key(9), &["x"]).unwrap();
        assert!(m.peek(&key(9)).unwrap().is_none());
    }

    #[test]
    fn sweep_drops_idle_tenants() {
        let m = manager(10, 0);
        drop(m.get_or_create(&key(0)).unwrap());
        let _held = m.get_or_create(&key(1)).unwrap();
        assert_eq!(m.sweep_idle().unwrap(), 1);
        assert_eq!(m.len(), 1);
        assert!(m.remove(&key(1)).unwrap());
        assert!(m.is_empty());
    }

    #[test]
    fn stats_list_tenants() {
        let m = manager(10, 60);
        m.get_or_create(&key(1)).unwrap().put_block(block("x"));
        m.get_or_create(&key(0)).unwrap();
        let stats = m.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.tenants[0].0, key(0));
        assert_eq!(stats.tenants[1].1.blocks, 1);
    }
}
