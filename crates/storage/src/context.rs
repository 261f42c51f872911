//! Execution context threaded through payload evaluation
//!
//! A [`FoldContext`] is created for every payload evaluation. It carries the
//! priority of the fold that is running, so an update scheduled from inside
//! a payload inherits that priority deterministically instead of reading
//! some ambient global.

use crate::record::{Callback, MergeMode, Payload, UpdateRequest};
use surge_core::{Priority, UnitId, Value};

/// Context handed to payload functions
pub struct FoldContext<'a> {
    unit: UnitId,
    priority: Priority,
    owner: &'a Value,
    warn_on_enqueue: bool,
    spawned: Vec<UpdateRequest>,
}

impl<'a> FoldContext<'a> {
    /// Create a context for one payload evaluation
    ///
    /// `priority` is the threshold of the fold in progress.
    pub fn new(unit: UnitId, priority: Priority, owner: &'a Value, warn_on_enqueue: bool) -> Self {
        Self {
            unit,
            priority,
            owner,
            warn_on_enqueue,
            spawned: Vec::new(),
        }
    }

    /// Unit being folded
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Priority of the fold in progress
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// The unit's owner context as of this fold
    pub fn owner_context(&self) -> &Value {
        self.owner
    }

    /// Schedule another update for the same unit
    ///
    /// The update is stamped with the fold's priority. It never joins the
    /// fold that is running; it becomes pending as soon as the current
    /// payload returns and is picked up by the next fold at that priority.
    pub fn enqueue(&mut self, payload: impl Into<Payload>, mode: MergeMode) {
        self.push(UpdateRequest {
            payload: payload.into(),
            mode,
            callback: None,
        });
    }

    /// Schedule another update for the same unit, with a callback
    pub fn enqueue_with_callback(&mut self, payload: impl Into<Payload>, mode: MergeMode, callback: Callback) {
        self.push(UpdateRequest {
            payload: payload.into(),
            mode,
            callback: Some(callback),
        });
    }

    fn push(&mut self, request: UpdateRequest) {
        if self.warn_on_enqueue {
            tracing::warn!(
                unit = %self.unit,
                priority = %self.priority,
                "update scheduled from inside an update function"
            );
        }
        self.spawned.push(request);
    }

    /// Number of updates scheduled through this context
    pub fn spawned_len(&self) -> usize {
        self.spawned.len()
    }

    /// Take the updates scheduled through this context
    pub fn into_spawned(self) -> Vec<UpdateRequest> {
        self.spawned
    }
}
