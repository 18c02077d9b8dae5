use std::time::Duration;

use loam_index::IndexOptions;
use serde::{Deserialize, Serialize};

/// Connection pool limits and SQLite tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_handles: usize,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub busy_timeout_ms: u64,
    pub slow_query_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_handles: 100,
            idle_timeout_secs: 30 * 60,
            sweep_interval_secs: 5 * 60,
            busy_timeout_ms: 7000,
            slow_query_ms: 100,
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            slow_query: Duration::from_millis(self.slow_query_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = PoolConfig::default();
        assert_eq!(c.max_handles, 100);
        assert_eq!(c.idle_timeout(), Duration::from_secs(1800));
        assert_eq!(c.sweep_interval(), Duration::from_secs(300));
        assert_eq!(c.index_options().busy_timeout, Duration::from_secs(7));
    }
}
