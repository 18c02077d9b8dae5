//! Background idle sweeps.

use std::sync::{Arc, Weak};
use std::time::Duration;

use loam_cache::TenantCacheManager;
use loam_pool::ConnectionPool;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::KernelResult;
use crate::kernel::Kernel;

/// A manager whose idle entries are reaped on a timer.
pub trait IdleSweep: Send + Sync {
    fn name(&self) -> &'static str;
    fn interval(&self) -> Duration;
    /// Reap idle entries; returns how many went away.
    fn sweep(&self) -> KernelResult<usize>;
}

impl IdleSweep for ConnectionPool {
    fn name(&self) -> &'static str {
        "index handles"
    }

    fn interval(&self) -> Duration {
        self.config().sweep_interval()
    }

    fn sweep(&self) -> KernelResult<usize> {
        Ok(self.sweep_idle()?)
    }
}

impl IdleSweep for TenantCacheManager {
    fn name(&self) -> &'static str {
        "tenant caches"
    }

    fn interval(&self) -> Duration {
        self.config().sweep_interval()
    }

    fn sweep(&self) -> KernelResult<usize> {
        Ok(self.sweep_idle()?)
    }
}

/// Running sweep tasks. Dropping the handle stops them.
#[derive(Debug)]
pub struct SweeperHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Abort every sweep task. Dropping the handle does the same.
    pub fn stop(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        debug!("idle sweepers stopped");
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn run_sweep(target: &dyn IdleSweep) {
    match target.sweep() {
        Ok(0) => debug!(target = target.name(), "idle sweep found nothing"),
        Ok(n) => info!(target = target.name(), count = n, "idle sweep released entries"),
        Err(e) => error!(target = target.name(), error = %e, "idle sweep failed"),
    }
}

fn pool_target(kernel: &Kernel) -> &dyn IdleSweep {
    &kernel.pool
}

fn cache_target(kernel: &Kernel) -> &dyn IdleSweep {
    &kernel.caches
}

fn spawn_one(kernel: Weak<Kernel>, period: Duration, select: fn(&Kernel) -> &dyn IdleSweep) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(10)));
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(kernel) = kernel.upgrade() else {
                break;
            };
            run_sweep(select(&kernel));
        }
    })
}

impl Kernel {
    /// Start the idle sweeps of the connection pool and the tenant caches on
    /// the current tokio runtime.
    ///
    /// The tasks hold only a weak reference and end once the kernel is gone.
    pub fn spawn_sweepers(self: &Arc<Self>) -> SweeperHandle {
        let targets: [fn(&Kernel) -> &dyn IdleSweep; 2] = [pool_target, cache_target];
        let tasks = targets
            .into_iter()
            .map(|select| {
                let period = select(self).interval();
                spawn_one(Arc::downgrade(self), period, select)
            })
            .collect();
        info!("idle sweepers started");
        SweeperHandle { tasks }
    }
}
