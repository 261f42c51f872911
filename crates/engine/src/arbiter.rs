//! Priority arbitration
//!
//! The engine never decides how urgent a request is. A [`PriorityArbiter`]
//! tags requests submitted through [`Engine::submit`](crate::Engine::submit)
//! and tells the work loop when to stop folding and hand control back.

use parking_lot::Mutex;
use std::sync::Arc;
use surge_concurrency::FoldProgress;
use surge_core::{Priority, UnitId};
use surge_storage::MergeMode;

/// Assigns priorities and budgets fold work
pub trait PriorityArbiter: Send + Sync {
    /// Priority for a request about to be queued for `unit`
    fn assign(&self, unit: UnitId, mode: MergeMode) -> Priority;

    /// Asked before every record is folded
    ///
    /// Returning true discards the attempt and ends the flush. The records
    /// stay pending.
    fn should_yield(&self, _progress: &FoldProgress) -> bool {
        false
    }
}

impl<A: PriorityArbiter + ?Sized> PriorityArbiter for Arc<A> {
    fn assign(&self, unit: UnitId, mode: MergeMode) -> Priority {
        (**self).assign(unit, mode)
    }

    fn should_yield(&self, progress: &FoldProgress) -> bool {
        (**self).should_yield(progress)
    }
}

/// Tags every request with one priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPriority(pub Priority);

impl Default for FixedPriority {
    fn default() -> Self {
        FixedPriority(Priority::TASK)
    }
}

impl PriorityArbiter for FixedPriority {
    fn assign(&self, _unit: UnitId, _mode: MergeMode) -> Priority {
        self.0
    }
}

/// Tags requests with whatever priority is in scope
///
/// ```
/// use std::sync::Arc;
/// use surge_core::{Priority, UnitId};
/// use surge_engine::{PriorityArbiter, ScopedPriority};
/// use surge_storage::MergeMode;
///
/// let arbiter = Arc::new(ScopedPriority::new(Priority::LOW));
/// let unit = UnitId::from_raw(1);
///
/// assert_eq!(arbiter.assign(unit, MergeMode::Merge), Priority::LOW);
/// arbiter.with_priority(Priority::SYNC, || {
///     assert_eq!(arbiter.assign(unit, MergeMode::Merge), Priority::SYNC);
/// });
/// assert_eq!(arbiter.assign(unit, MergeMode::Merge), Priority::LOW);
/// ```
#[derive(Debug)]
pub struct ScopedPriority {
    fallback: Priority,
    scopes: Mutex<Vec<Priority>>,
}

impl ScopedPriority {
    /// Create an arbiter that answers `fallback` outside any scope
    pub fn new(fallback: Priority) -> Self {
        Self {
            fallback,
            scopes: Mutex::new(Vec::new()),
        }
    }

    /// Priority currently in scope
    pub fn current(&self) -> Priority {
        self.scopes.lock().last().copied().unwrap_or(self.fallback)
    }

    /// Run `f` with `priority` in scope
    ///
    /// Scopes nest; the innermost wins. The scope ends even if `f` panics.
    pub fn with_priority<R>(&self, priority: Priority, f: impl FnOnce() -> R) -> R {
        self.scopes.lock().push(priority);
        let _scope = ScopeGuard { arbiter: self };
        f()
    }
}

impl Default for ScopedPriority {
    fn default() -> Self {
        Self::new(Priority::TASK)
    }
}

impl PriorityArbiter for ScopedPriority {
    fn assign(&self, _unit: UnitId, _mode: MergeMode) -> Priority {
        self.current()
    }
}

struct ScopeGuard<'a> {
    arbiter: &'a ScopedPriority,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.arbiter.scopes.lock().pop();
    }
}
