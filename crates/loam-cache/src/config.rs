use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tenant cache limits.
///
/// Block cost is one unit per started KiB of content, so the default budget
/// admits roughly ten thousand small blocks per tenant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_tenants: usize,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub block_cost_budget: u64,
    pub ref_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_tenants: 100,
            idle_timeout_secs: 30 * 60,
            sweep_interval_secs: 5 * 60,
            block_cost_budget: 10240,
            ref_ttl_secs: 30 * 60,
        }
    }
}

impl CacheConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn ref_ttl(&self) -> Duration {
        Duration::from_secs(self.ref_ttl_secs)
    }
}
