//! In-flight operation tracking.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::LoadingEngine;

/// Source of the "operations in flight" count the sweep trusts over the
/// loading flags.
///
/// Asked with the engine state locked: implementations must not call back
/// into the engine, and should count an operation before raising its
/// loading flag.
pub trait ActivityProbe: Send + Sync {
    fn active_operations(&self) -> usize;
}

/// Counts live [`OperationGuard`]s.
#[derive(Debug, Clone, Default)]
pub struct OperationTracker {
    active: Arc<AtomicUsize>,
}

impl OperationTracker {
    fn enter(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

impl ActivityProbe for OperationTracker {
    fn active_operations(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Brackets one operation: dynamic loading starts when the guard is created
/// and ends exactly once when it is dropped, including when the owning
/// future is cancelled mid-flight.
#[must_use = "the operation ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct OperationGuard {
    engine: LoadingEngine,
    tracker: OperationTracker,
}

impl OperationGuard {
    pub(super) fn new(engine: LoadingEngine, tracker: OperationTracker) -> Self {
        // Count and flag move together under the state lock
        {
            let mut state = engine.lock();
            tracker.enter();
            state.set_dynamic_loading(true);
        }
        Self { engine, tracker }
    }

    /// End the operation now. Same as dropping the guard.
    pub fn finish(self) {}
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let mut state = self.engine.lock();
        self.tracker.exit();
        state.set_dynamic_loading(false);
    }
}
