//! Task-scoped workspace resolution.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::WorkspaceDescriptor;
use crate::error::{WorkspaceError, WorkspaceResult};

/// Identifier of one unit of work, issued by the dispatcher (UUID v7).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(uuid::Uuid);

impl TaskId {
    /// Issue a new, time-ordered task ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// Short representation (first 8 characters of the UUID).
    pub fn short_id(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.short_id())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn poisoned<E: fmt::Display>(e: E) -> WorkspaceError {
    WorkspaceError::LockPoisoned(e.to_string())
}

/// Registry of workspace contexts.
///
/// Holds three sources, consulted in order by [`ContextRegistry::resolve`]:
/// contexts attached to a task, the current-tenant pointer, and the default.
pub struct ContextRegistry {
    default: Arc<WorkspaceDescriptor>,
    attached: RwLock<HashMap<TaskId, Arc<WorkspaceDescriptor>>>,
    tenants: RwLock<HashMap<String, Arc<WorkspaceDescriptor>>>,
    current_tenant: RwLock<Option<Arc<WorkspaceDescriptor>>>,
}

impl ContextRegistry {
    /// Create a registry whose fallback is `default`.
    pub fn new(default: WorkspaceDescriptor) -> Self {
        Self {
            default: Arc::new(default),
            attached: RwLock::new(HashMap::new()),
            tenants: RwLock::new(HashMap::new()),
            current_tenant: RwLock::new(None),
        }
    }

    /// The single-tenant default workspace.
    pub fn default_workspace(&self) -> Arc<WorkspaceDescriptor> {
        Arc::clone(&self.default)
    }

    // ---------------------------------------------------------------
    // Task-scoped contexts
    // ---------------------------------------------------------------

    /// Attach `ctx` to `task` until the returned guard is dropped.
    ///
    /// The guard detaches on every exit path, including unwinding.
    pub fn attach(
        self: &Arc<Self>,
        task: TaskId,
        ctx: Arc<WorkspaceDescriptor>,
    ) -> WorkspaceResult<ContextGuard> {
        let mut attached = self.attached.write().map_err(poisoned)?;
        if attached.contains_key(&task) {
            return Err(WorkspaceError::AlreadyAttached(task));
        }
        debug!(task = %task.short_id(), workspace = %ctx.key(), "attach workspace");
        attached.insert(task, ctx);
        Ok(ContextGuard {
            registry: Arc::clone(self),
            task,
        })
    }

    /// The context attached to `task`, if any.
    pub fn attached(&self, task: TaskId) -> WorkspaceResult<Option<Arc<WorkspaceDescriptor>>> {
        Ok(self.attached.read().map_err(poisoned)?.get(&task).cloned())
    }

    /// Number of tasks with an attached context.
    pub fn attached_count(&self) -> usize {
        self.attached.read().map(|a| a.len()).unwrap_or(0)
    }

    fn detach(&self, task: TaskId) {
        // A poisoned map is still structurally valid; detaching must not be skipped.
        let mut attached = match self.attached.write() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        if attached.remove(&task).is_some() {
            debug!(task = %task.short_id(), "detach workspace");
        }
    }

    /// Run `f` as a fresh unit of work with `ctx` attached.
    pub fn run_scoped<R>(
        self: &Arc<Self>,
        ctx: Arc<WorkspaceDescriptor>,
        f: impl FnOnce(TaskId) -> R,
    ) -> WorkspaceResult<R> {
        let task = TaskId::new();
        let _guard = self.attach(task, ctx)?;
        Ok(f(task))
    }

    // ---------------------------------------------------------------
    // Tenants
    // ---------------------------------------------------------------

    /// Register a tenant workspace under its user ID.
    ///
    /// Descriptors without a tenant identity are registered under their key.
    pub fn register_tenant(&self, ctx: WorkspaceDescriptor) -> WorkspaceResult<Arc<WorkspaceDescriptor>> {
        let id = ctx
            .tenant()
            .map(|t| t.user_id.clone())
            .unwrap_or_else(|| ctx.key().to_string());
        let ctx = Arc::new(ctx);
        self.tenants
            .write()
            .map_err(poisoned)?
            .insert(id, Arc::clone(&ctx));
        Ok(ctx)
    }

    /// Look up a registered tenant.
    pub fn tenant(&self, user_id: &str) -> WorkspaceResult<Option<Arc<WorkspaceDescriptor>>> {
        Ok(self.tenants.read().map_err(poisoned)?.get(user_id).cloned())
    }

    /// Point the current-tenant fallback at a registered tenant.
    pub fn set_current_tenant(&self, user_id: &str) -> WorkspaceResult<()> {
        let ctx = self
            .tenant(user_id)?
            .ok_or_else(|| WorkspaceError::UnknownTenant(user_id.to_string()))?;
        *self.current_tenant.write().map_err(poisoned)? = Some(ctx);
        Ok(())
    }

    pub fn clear_current_tenant(&self) -> WorkspaceResult<()> {
        *self.current_tenant.write().map_err(poisoned)? = None;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Resolution
    // ---------------------------------------------------------------

    /// Resolve the workspace for a call site that has no explicit descriptor.
    pub fn resolve(&self, task: Option<TaskId>) -> WorkspaceResult<Arc<WorkspaceDescriptor>> {
        if let Some(task) = task {
            if let Some(ctx) = self.attached(task)? {
                return Ok(ctx);
            }
        }
        if let Some(ctx) = self.current_tenant.read().map_err(poisoned)?.clone() {
            return Ok(ctx);
        }
        Ok(self.default_workspace())
    }
}

impl fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("default", &self.default)
            .field("attached", &self.attached_count())
            .finish()
    }
}

/// Keeps a context attached to a task; detaches it when dropped.
#[must_use = "the context is detached as soon as the guard is dropped"]
pub struct ContextGuard {
    registry: Arc<ContextRegistry>,
    task: TaskId,
}

impl ContextGuard {
    pub fn task(&self) -> TaskId {
        self.task
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.registry.detach(self.task);
    }
}

impl fmt::Debug for ContextGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextGuard").field("task", &self.task).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{TenantIdentity, WorkspaceLayout};

    fn registry() -> Arc<ContextRegistry> {
        Arc::new(ContextRegistry::new(WorkspaceDescriptor::new("/srv/default")))
    }

    fn tenant(id: &str) -> WorkspaceDescriptor {
        WorkspaceDescriptor::for_tenant(
            format!("/srv/users/{id}"),
            &WorkspaceLayout::tenant(),
            TenantIdentity {
                user_id: id.into(),
                username: format!("user-{id}"),
            },
        )
    }

    #[test]
    fn falls_back_to_default() {
        let reg = registry();
        let ctx = reg.resolve(None).unwrap();
        assert_eq!(ctx.root(), std::path::Path::new("/srv/default"));
        let ctx = reg.resolve(Some(TaskId::new())).unwrap();
        assert_eq!(ctx.root(), std::path::Path::new("/srv/default"));
    }

    #[test]
    fn attached_context_wins_until_guard_drops() {
        let reg = registry();
        let task = TaskId::new();
        let ctx = Arc::new(tenant("u1"));
        {
            let guard = reg.attach(task, ctx).unwrap();
            assert_eq!(guard.task(), task);
            assert_eq!(reg.resolve(Some(task)).unwrap().tenant().unwrap().user_id, "u1");
            assert_eq!(reg.attached_count(), 1);
        }
        assert_eq!(reg.attached_count(), 0);
        assert!(reg.resolve(Some(task)).unwrap().tenant().is_none());
    }

    #[test]
    fn contexts_do_not_leak_between_tasks() {
        let reg = registry();
        let a = TaskId::new();
        let b = TaskId::new();
        let _ga = reg.attach(a, Arc::new(tenant("a"))).unwrap();
        let _gb = reg.attach(b, Arc::new(tenant("b"))).unwrap();
        assert_eq!(reg.resolve(Some(a)).unwrap().tenant().unwrap().user_id, "a");
        assert_eq!(reg.resolve(Some(b)).unwrap().tenant().unwrap().user_id, "b");
    }

    #[test]
    fn double_attach_is_rejected() {
        let reg = registry();
        let task = TaskId::new();
        let _g = reg.attach(task, Arc::new(tenant("a"))).unwrap();
        let err = reg.attach(task, Arc::new(tenant("b"))).unwrap_err();
        assert!(matches!(err, WorkspaceError::AlreadyAttached(t) if t == task));
    }

    #[test]
    fn guard_detaches_on_panic() {
        let reg = registry();
        let task = TaskId::new();
        let reg2 = Arc::clone(&reg);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = reg2.attach(task, Arc::new(tenant("p"))).unwrap();
            panic!("unit of work failed");
        }));
        assert!(result.is_err());
        assert_eq!(reg.attached_count(), 0);
    }

    #[test]
    fn current_tenant_is_second_choice() {
        let reg = registry();
        reg.register_tenant(tenant("u7")).unwrap();
        reg.set_current_tenant("u7").unwrap();
        assert_eq!(reg.resolve(None).unwrap().tenant().unwrap().user_id, "u7");

        let task = TaskId::new();
        let _g = reg.attach(task, Arc::new(tenant("u8"))).unwrap();
        assert_eq!(reg.resolve(Some(task)).unwrap().tenant().unwrap().user_id, "u8");

        reg.clear_current_tenant().unwrap();
        assert!(reg.resolve(None).unwrap().tenant().is_none());
    }

    #[test]
    fn unknown_tenant_cannot_become_current() {
        let reg = registry();
        let err = reg.set_current_tenant("ghost").unwrap_err();
        assert!(matches!(err, WorkspaceError::UnknownTenant(_)));
    }

    #[test]
    fn run_scoped_detaches_afterwards() {
        let reg = registry();
        let seen = reg
            .run_scoped(Arc::new(tenant("s")), |task| {
                reg.resolve(Some(task)).unwrap().tenant().unwrap().user_id.clone()
            })
            .unwrap();
        assert_eq!(seen, "s");
        assert_eq!(reg.attached_count(), 0);
    }
}
