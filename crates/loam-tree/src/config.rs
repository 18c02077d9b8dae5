use serde::{Deserialize, Serialize};

/// Loader and writer settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Upper bound on batch-load worker threads.
    pub max_workers: usize,
    /// Write tab-indented documents instead of single-line JSON.
    pub pretty: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            pretty: true,
        }
    }
}

impl LoaderConfig {
    /// Worker threads for a batch: the CPU count, capped at `max_workers`.
    pub fn worker_count(&self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cpus.min(self.max_workers).max(1)
    }
}
