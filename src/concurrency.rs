//! Thread cooperation with the garbage collector (§5 Concurrency & resource model).
//!
//! A single VM instance hosts one or more native threads, each of which is
//! either executing managed bytecode or has stepped out into native code
//! (I/O, a blocking lock, a long sleep). The GC needs to know which threads
//! are managed so a cycle can wait for them to reach a safepoint, and which
//! are unmanaged so it does not wait on a thread that may be blocked for an
//! unbounded time. This module is the thread-local side of that contract;
//! [`crate::gc::Gc::collect`] is the other side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-thread flag pair: whether this thread is currently running managed
/// code, and whether the collector has asked it to suspend at the next
/// opportunity. Cheap to clone; every clone shares the same underlying
/// flags, which is what lets the collector poll a thread from outside it.
#[derive(Clone, Debug)]
pub struct ThreadRegion {
    managed: Arc<AtomicBool>,
    suspend_requested: Arc<AtomicBool>,
}

impl ThreadRegion {
    /// Creates a region flag for a thread currently running managed code.
    pub fn new() -> Self {
        Self {
            managed: Arc::new(AtomicBool::new(true)),
            suspend_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True while this thread is executing managed bytecode.
    pub fn is_managed(&self) -> bool {
        self.managed.load(Ordering::Acquire)
    }

    /// Enters an unmanaged region for the duration of a potentially-blocking
    /// native operation. The returned guard restores managed status (and
    /// blocks on any pending suspend request) when dropped.
    pub fn enter_unmanaged(&self) -> ManagedGuard<'_> {
        self.managed.store(false, Ordering::Release);
        ManagedGuard { region: self }
    }

    /// Called by the collector before a cycle; an unmanaged thread is not
    /// waited on, a managed one is expected to reach a safepoint and call
    /// [`ThreadRegion::poll_suspend`].
    pub fn request_suspend(&self) {
        self.suspend_requested.store(true, Ordering::Release);
    }

    /// Called by the collector after a cycle completes.
    pub fn clear_suspend(&self) {
        self.suspend_requested.store(false, Ordering::Release);
    }

    /// True if the collector has asked this thread to stop at a safepoint.
    pub fn suspend_pending(&self) -> bool {
        self.suspend_requested.load(Ordering::Acquire)
    }
}

impl Default for ThreadRegion {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for an unmanaged region. On drop, re-enters managed mode;
/// if a suspend request is pending, the caller must have already resolved
/// it (the guard itself does not block — the single-threaded core in this
/// crate never contends, so there is nothing to wait on yet).
pub struct ManagedGuard<'a> {
    region: &'a ThreadRegion,
}

impl Drop for ManagedGuard<'_> {
    fn drop(&mut self) {
        self.region.managed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_managed() {
        let region = ThreadRegion::new();
        assert!(region.is_managed());
    }

    #[test]
    fn unmanaged_guard_restores_managed_on_drop() {
        let region = ThreadRegion::new();
        {
            let _guard = region.enter_unmanaged();
            assert!(!region.is_managed());
        }
        assert!(region.is_managed());
    }

    #[test]
    fn suspend_request_is_visible_until_cleared() {
        let region = ThreadRegion::new();
        assert!(!region.suspend_pending());
        region.request_suspend();
        assert!(region.suspend_pending());
        region.clear_suspend();
        assert!(!region.suspend_pending());
    }
}
