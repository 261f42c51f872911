//! Reconciliation hook
//!
//! Whatever consumes committed state (a renderer, a diffing pass) learns
//! about each commit through a [`Reconciler`], and may hand the unit a fresh
//! owner context for its next fold.

use std::sync::Arc;
use surge_core::{UnitId, Value};

/// Notified once per commit
pub trait Reconciler: Send + Sync {
    /// `unit` committed `state`
    ///
    /// Runs after the state is published and before the commit's callbacks.
    /// Returning a value replaces the unit's owner context.
    fn on_commit(&self, unit: UnitId, state: &Value) -> Option<Value>;
}

impl<R: Reconciler + ?Sized> Reconciler for Arc<R> {
    fn on_commit(&self, unit: UnitId, state: &Value) -> Option<Value> {
        (**self).on_commit(unit, state)
    }
}

/// Ignores every commit
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReconciler;

impl Reconciler for NoopReconciler {
    fn on_commit(&self, _unit: UnitId, _state: &Value) -> Option<Value> {
        None
    }
}
