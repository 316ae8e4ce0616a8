use hashbrown::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Identifier of a graphics context registered with a [`ContextManager`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ContextId(u32);

#[derive(Default)]
struct Registry {
    labels: HashMap<ContextId, String>,
    next_id: u32,
}

/// Serializes access to graphics contexts.
///
/// Several canvases may share one drawing worker; each registers a context and
/// must hold the manager's lock while issuing calls. The lock is a plain mutex:
/// one context is current at a time, everybody else blocks.
///
/// This is an ordinary value. Create one per process or per session and share
/// it (usually behind an `Arc`) with every canvas that draws on the same worker.
#[derive(Default)]
pub struct ContextManager {
    registry: Mutex<Registry>,
    current: Mutex<Option<ContextId>>,
}

impl ContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new context and returns its id.
    pub fn create(&self, label: impl Into<String>) -> ContextId {
        let mut registry = self.registry();
        let id = ContextId(registry.next_id);
        registry.next_id = registry.next_id.wrapping_add(1);
        let label = label.into();
        log::debug!("registered graphics context {:?} ({label})", id);
        registry.labels.insert(id, label);
        id
    }

    /// Unregisters a context. Returns `false` if it was unknown.
    pub fn destroy(&self, id: ContextId) -> bool {
        let removed = self.registry().labels.remove(&id).is_some();
        if removed {
            log::debug!("destroyed graphics context {:?}", id);
        }
        removed
    }

    /// Unregisters every context.
    pub fn destroy_all(&self) {
        self.registry().labels.clear();
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.registry().labels.contains_key(&id)
    }

    /// Number of registered contexts.
    pub fn len(&self) -> usize {
        self.registry().labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes `id` the current context, blocking while another context holds the lock.
    ///
    /// The lock is released when the returned guard is dropped.
    pub fn lock(&self, id: ContextId) -> ContextGuard<'_> {
        if !self.contains(id) {
            log::error!("locking unregistered graphics context {:?}", id);
        }
        let mut slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(id);
        log::trace!("context {:?} locked", id);
        ContextGuard { manager: self, slot, id }
    }

    /// Like [`lock`](Self::lock) but returns `None` instead of blocking.
    pub fn try_lock(&self, id: ContextId) -> Option<ContextGuard<'_>> {
        let mut slot = match self.current.try_lock() {
            Ok(slot) => slot,
            Err(std::sync::TryLockError::Poisoned(p)) => p.into_inner(),
            Err(std::sync::TryLockError::WouldBlock) => return None,
        };
        *slot = Some(id);
        Some(ContextGuard { manager: self, slot, id })
    }

    /// Whether some context currently holds the lock.
    pub fn is_locked(&self) -> bool {
        matches!(self.current.try_lock(), Err(std::sync::TryLockError::WouldBlock))
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof that a context is current. Unlocks on drop.
///
/// Only the guard of the owning context can unlock it, so unlocking "from the
/// wrong context" cannot be expressed.
pub struct ContextGuard<'a> {
    manager: &'a ContextManager,
    slot: MutexGuard<'a, Option<ContextId>>,
    id: ContextId,
}

impl<'a> ContextGuard<'a> {
    /// The context this guard keeps current.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Releases the lock.
    pub fn unlock(self) {
        drop(self);
    }

    /// Releases the lock while `f` runs, then takes it again for the same context.
    pub fn run_without_lock<R>(self, f: impl FnOnce() -> R) -> (ContextGuard<'a>, R) {
        let manager = self.manager;
        let id = self.id;
        drop(self);
        let out = f();
        (manager.lock(id), out)
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        debug_assert_eq!(*self.slot, Some(self.id));
        *self.slot = None;
        log::trace!("context {:?} unlocked", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    // ── registry ──────────────────────────────────────────────────────────

    #[test]
    fn create_and_destroy() {
        let mgr = ContextManager::new();
        let a = mgr.create("a");
        let b = mgr.create("b");
        assert_ne!(a, b);
        assert_eq!(mgr.len(), 2);
        assert!(mgr.destroy(a));
        assert!(!mgr.destroy(a));
        assert!(mgr.contains(b));
        mgr.destroy_all();
        assert!(mgr.is_empty());
    }

    // ── locking ───────────────────────────────────────────────────────────

    #[test]
    fn guard_reports_its_context() {
        let mgr = ContextManager::new();
        let id = mgr.create("canvas");
        let guard = mgr.lock(id);
        assert_eq!(guard.id(), id);
        guard.unlock();
        assert!(mgr.try_lock(id).is_some());
    }

    #[test]
    fn try_lock_fails_while_held() {
        let mgr = ContextManager::new();
        let a = mgr.create("a");
        let b = mgr.create("b");
        let guard = mgr.lock(a);
        assert!(mgr.try_lock(b).is_none());
        drop(guard);
        assert!(mgr.try_lock(b).is_some());
    }

    #[test]
    fn is_locked_follows_the_guard() {
        let mgr = ContextManager::new();
        let id = mgr.create("canvas");
        assert!(!mgr.is_locked());
        let guard = mgr.lock(id);
        assert!(mgr.is_locked());
        drop(guard);
        assert!(!mgr.is_locked());
    }

    #[test]
    fn run_without_lock_lets_others_in() {
        let mgr = ContextManager::new();
        let a = mgr.create("a");
        let b = mgr.create("b");
        let guard = mgr.lock(a);
        let (guard, got_other) = guard.run_without_lock(|| mgr.try_lock(b).is_some());
        assert!(got_other);
        assert_eq!(guard.id(), a);
        assert!(mgr.try_lock(b).is_none());
    }

    #[test]
    fn canvases_on_threads_never_overlap() {
        let mgr = Arc::new(ContextManager::new());
        let ids: Vec<_> = (0..4).map(|i| mgr.create(format!("canvas {i}"))).collect();
        let busy = Arc::new(AtomicBool::new(false));
        let entered = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|s| {
            for &id in &ids {
                let mgr = Arc::clone(&mgr);
                let busy = Arc::clone(&busy);
                let entered = Arc::clone(&entered);
                s.spawn(move || {
                    for _ in 0..50 {
                        let _guard = mgr.lock(id);
                        assert!(!busy.swap(true, Ordering::SeqCst));
                        entered.fetch_add(1, Ordering::SeqCst);
                        busy.store(false, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(entered.load(Ordering::SeqCst), 200);
    }
}
