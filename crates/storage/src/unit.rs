//! Stateful units
//!
//! A [`UnitSlot`] owns one committed state value, the owner context handed
//! to payload functions, and one [`UpdateQueue`]. It also records which fold
//! attempt, if any, currently holds the unit.

use crate::queue::UpdateQueue;
use crate::record::UpdateRecord;
use std::fmt;
use std::sync::Arc;
use surge_core::{Priority, Sequence, Value};

/// Identifier of one fold attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(u64);

impl AttemptId {
    /// Wrap a raw id
    pub const fn from_raw(raw: u64) -> Self {
        AttemptId(raw)
    }

    /// Get the raw id
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt-{}", self.0)
    }
}

/// Phase of the attempt holding a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldPhase {
    /// Evaluating records; may still be preempted
    Folding,
    /// State published; callbacks are being delivered
    Committing,
}

/// The attempt currently holding a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
    /// Attempt id
    pub attempt: AttemptId,
    /// Threshold the attempt folds at
    pub threshold: Priority,
    /// Current phase
    pub phase: FoldPhase,
    /// True while one of the attempt's payloads is running
    pub evaluating: bool,
}

/// What an enqueue did to the unit besides queueing the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnqueueEffect {
    /// The folding attempt this record preempted, if any
    pub preempted: Option<AttemptId>,
    /// True if the record arrived from inside a running payload of the unit
    pub reentrant: bool,
}

/// One stateful unit
#[derive(Debug)]
pub struct UnitSlot {
    /// Last committed state
    pub base_state: Value,
    /// Opaque data handed to payload functions
    pub owner_context: Value,
    /// Pending updates
    pub queue: UpdateQueue,
    /// Attempt currently holding the unit
    pub in_flight: Option<InFlight>,
    /// Number of commits applied so far
    pub commits: u64,
}

impl UnitSlot {
    /// Create a unit with an empty queue
    pub fn new(base_state: Value, owner_context: Value) -> Self {
        Self {
            base_state,
            owner_context,
            queue: UpdateQueue::new(),
            in_flight: None,
            commits: 0,
        }
    }

    /// True if no attempt holds the unit
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    /// Priority forced on records enqueued right now
    ///
    /// While a payload of this unit is running, anything it queues for the
    /// unit belongs to the fold in progress and takes the fold's threshold.
    pub fn reentrant_priority(&self) -> Option<Priority> {
        match self.in_flight {
            Some(InFlight {
                threshold,
                phase: FoldPhase::Folding,
                evaluating: true,
                ..
            }) => Some(threshold),
            _ => None,
        }
    }

    /// Queue a record, preempting a folding attempt it is more urgent than
    ///
    /// A preempted attempt loses the unit immediately, so a more urgent fold
    /// can begin before the old attempt notices. Attempts that have reached
    /// [`FoldPhase::Committing`] are never preempted, and neither is an
    /// attempt whose own payload queued the record.
    pub fn enqueue(&mut self, record: UpdateRecord) -> (Arc<UpdateRecord>, EnqueueEffect) {
        let mut effect = EnqueueEffect::default();
        if let Some(in_flight) = self.in_flight {
            if in_flight.phase == FoldPhase::Folding && in_flight.evaluating {
                effect.reentrant = true;
            } else if in_flight.phase == FoldPhase::Folding
                && record.priority().is_more_urgent_than(in_flight.threshold)
            {
                self.in_flight = None;
                effect.preempted = Some(in_flight.attempt);
            }
        }
        (self.queue.enqueue(record), effect)
    }

    /// Is `attempt` still the folding holder of this unit?
    pub fn is_folding(&self, attempt: AttemptId) -> bool {
        matches!(
            self.in_flight,
            Some(InFlight { attempt: a, phase: FoldPhase::Folding, .. }) if a == attempt
        )
    }

    /// Claim the unit for an attempt
    ///
    /// Returns false if another attempt holds it.
    pub fn claim(&mut self, attempt: AttemptId, threshold: Priority) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        self.in_flight = Some(InFlight {
            attempt,
            threshold,
            phase: FoldPhase::Folding,
            evaluating: false,
        });
        true
    }

    /// Mark whether a payload of `attempt` is running
    ///
    /// Returns false if `attempt` is not the folding holder.
    pub fn set_evaluating(&mut self, attempt: AttemptId, evaluating: bool) -> bool {
        match self.in_flight.as_mut() {
            Some(in_flight) if in_flight.attempt == attempt && in_flight.phase == FoldPhase::Folding => {
                in_flight.evaluating = evaluating;
                true
            }
            _ => false,
        }
    }

    /// Publish a folded state and prune the records it consumed
    ///
    /// Only the folding holder may apply. The attempt moves to
    /// [`FoldPhase::Committing`] and keeps the unit until it is released.
    /// Returns the number of records pruned, or `None` if `attempt` no
    /// longer holds the unit.
    pub fn apply(&mut self, attempt: AttemptId, state: Value, consumed: &[Sequence]) -> Option<usize> {
        if !self.is_folding(attempt) {
            return None;
        }
        self.base_state = state;
        let pruned = self.queue.prune(consumed);
        self.commits += 1;
        if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.phase = FoldPhase::Committing;
            in_flight.evaluating = false;
        }
        Some(pruned)
    }

    /// Release the unit if `attempt` still holds it
    pub fn release(&mut self, attempt: AttemptId) -> bool {
        match self.in_flight {
            Some(in_flight) if in_flight.attempt == attempt => {
                self.in_flight = None;
                true
            }
            _ => false,
        }
    }
}
