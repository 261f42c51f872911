//! Fold attempts
//!
//! An [`AttemptContext`] is one try at folding a unit's pending records at a
//! priority threshold. It snapshots the unit when it begins and then advances
//! one record per [`AttemptContext::step`]; the gap between two steps is the
//! only place an attempt can be interrupted.
//!
//! ## Lifecycle
//!
//! ```text
//!           begin()
//!   Idle ──────────────► Folding ──step()──► Folding ...
//!                           │
//!          ┌────────────────┼──────────────────┐
//!          ▼                ▼                  ▼
//!      Preempted          Failed          (all records folded)
//!   (unit released,    (unit released,      AttemptManager::commit
//!    nothing kept)      error surfaced)          ▼
//!                                            Committed
//! ```
//!
//! Preemption is detected lazily: a more urgent enqueue takes the unit away
//! from the attempt inside the store, and the next step observes that the
//! attempt no longer holds it.

use crate::materializer::{Fold, Materialized};
use std::fmt;
use std::sync::Arc;
use surge_core::{Error, Priority, Result, Sequence, UnitId, Value};
use surge_storage::{AttemptId, UnitStore, UpdateRecord};

/// Why an attempt stopped without committing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreemptReason {
    /// A strictly more urgent record arrived for the unit
    MoreUrgentWork,
    /// The driver's budget ran out
    Yielded,
    /// The driver dropped the attempt
    Abandoned,
    /// The unit was destroyed mid-fold
    UnitDestroyed,
}

impl fmt::Display for PreemptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PreemptReason::MoreUrgentWork => "more urgent work",
            PreemptReason::Yielded => "yielded",
            PreemptReason::Abandoned => "abandoned",
            PreemptReason::UnitDestroyed => "unit destroyed",
        };
        f.write_str(s)
    }
}

/// Attempt status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    /// Still evaluating records
    Folding,
    /// State published
    Committed,
    /// Stopped; the fold was discarded
    Preempted(PreemptReason),
    /// A payload failed; the fold was discarded
    Failed,
}

/// Result of advancing an attempt by one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// One record was folded
    Evaluated {
        /// The record just folded
        sequence: Sequence,
        /// Records left in this attempt
        remaining: usize,
    },
    /// Every record in scope has been folded; ready to commit
    Complete,
    /// The attempt lost the unit; nothing it folded will be kept
    Preempted(PreemptReason),
}

/// Where an attempt stands, as seen by a driver deciding whether to yield
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldProgress {
    /// Unit being folded
    pub unit: UnitId,
    /// The attempt
    pub attempt: AttemptId,
    /// Threshold the attempt folds at
    pub threshold: Priority,
    /// Records folded so far
    pub evaluated: usize,
    /// Records still to fold
    pub remaining: usize,
}

/// One fold attempt over a snapshot of a unit
pub struct AttemptContext {
    id: AttemptId,
    unit: UnitId,
    threshold: Priority,
    /// Owner context as of the moment the attempt began
    owner: Value,
    /// Records in scope, in commit order
    records: Vec<Arc<UpdateRecord>>,
    cursor: usize,
    fold: Fold,
    status: AttemptStatus,
    spawned: usize,
}

impl AttemptContext {
    /// Claim `unit` and snapshot everything pending at or below `threshold`
    ///
    /// Returns `Ok(None)` if nothing is pending in scope, in which case the
    /// unit is left unclaimed.
    ///
    /// # Errors
    /// - `UnitNotFound` if the unit does not exist
    /// - `UnitBusy` if another attempt holds the unit
    pub fn begin(
        store: &UnitStore,
        unit: UnitId,
        threshold: Priority,
        id: AttemptId,
        warn_on_enqueue: bool,
    ) -> Result<Option<Self>> {
        let snapshot = store
            .with_slot_mut(unit, |slot| {
                if !slot.is_idle() {
                    return Err(Error::UnitBusy(unit));
                }
                let Some(start) = slot.queue.first_unprocessed_at_or_below(threshold) else {
                    return Ok(None);
                };
                let records = slot.queue.peek_at_or_below(threshold);
                slot.claim(id, threshold);
                Ok(Some((slot.base_state.clone(), slot.owner_context.clone(), start, records)))
            })
            .ok_or(Error::UnitNotFound(unit))??;

        let Some((base, owner, start, records)) = snapshot else {
            return Ok(None);
        };

        tracing::debug!(
            %unit,
            attempt = %id,
            %threshold,
            %start,
            records = records.len(),
            "fold started"
        );

        Ok(Some(Self {
            id,
            unit,
            threshold,
            owner,
            records,
            cursor: 0,
            fold: Fold::new(unit, threshold, base, warn_on_enqueue),
            status: AttemptStatus::Folding,
            spawned: 0,
        }))
    }

    /// Attempt id
    pub fn id(&self) -> AttemptId {
        self.id
    }

    /// Unit being folded
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Threshold of this attempt
    pub fn threshold(&self) -> Priority {
        self.threshold
    }

    /// Current status
    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    /// True while the attempt may still fold or commit
    pub fn is_folding(&self) -> bool {
        self.status == AttemptStatus::Folding
    }

    /// Candidate state accumulated so far
    pub fn candidate(&self) -> &Value {
        self.fold.state()
    }

    /// Records in scope, in commit order
    pub fn records(&self) -> &[Arc<UpdateRecord>] {
        &self.records
    }

    /// Updates scheduled by payloads during this attempt
    pub fn spawned(&self) -> usize {
        self.spawned
    }

    /// Progress snapshot
    pub fn progress(&self) -> FoldProgress {
        FoldProgress {
            unit: self.unit,
            attempt: self.id,
            threshold: self.threshold,
            evaluated: self.cursor,
            remaining: self.records.len() - self.cursor,
        }
    }

    /// Fold the next record
    ///
    /// Checks first that the attempt still holds the unit. While the payload
    /// runs the unit is marked as evaluating, so an update it queues through
    /// any engine handle takes this attempt's threshold and cannot preempt
    /// it. Updates scheduled through the fold context are queued right after
    /// the payload returns, also at the threshold. Either way they are
    /// pending for the next fold but not this one.
    ///
    /// # Errors
    /// - `RecordFailed` / merge errors from the payload; the attempt is
    ///   marked failed and the unit released, leaving every record pending
    /// - `Internal` if the attempt already finished
    pub fn step(&mut self, store: &UnitStore) -> Result<Step> {
        match self.status {
            AttemptStatus::Folding => {}
            AttemptStatus::Preempted(reason) => return Ok(Step::Preempted(reason)),
            AttemptStatus::Committed | AttemptStatus::Failed => {
                return Err(Error::Internal(format!("{} is no longer folding", self.id)));
            }
        }

        let id = self.id;
        let Some(record) = self.records.get(self.cursor).cloned() else {
            return match store.with_slot(self.unit, |slot| slot.is_folding(id)) {
                None => Ok(self.mark_preempted(PreemptReason::UnitDestroyed)),
                Some(false) => Ok(self.mark_preempted(PreemptReason::MoreUrgentWork)),
                Some(true) => Ok(Step::Complete),
            };
        };

        // anything queued for the unit while the payload runs belongs to this fold
        match store.with_slot_mut(self.unit, |slot| slot.set_evaluating(id, true)) {
            None => return Ok(self.mark_preempted(PreemptReason::UnitDestroyed)),
            Some(false) => return Ok(self.mark_preempted(PreemptReason::MoreUrgentWork)),
            Some(true) => {}
        }
        let applied = self.fold.apply(&record, &self.owner);
        store.with_slot_mut(self.unit, |slot| slot.set_evaluating(id, false));

        let spawned = match applied {
            Ok(spawned) => spawned,
            Err(e) => {
                self.status = AttemptStatus::Failed;
                store.with_slot_mut(self.unit, |slot| slot.release(id));
                tracing::warn!(
                    unit = %self.unit,
                    attempt = %id,
                    sequence = %record.sequence(),
                    error = %e,
                    "fold failed"
                );
                return Err(e);
            }
        };
        self.cursor += 1;

        tracing::trace!(
            unit = %self.unit,
            attempt = %id,
            sequence = %record.sequence(),
            "record folded"
        );

        for request in spawned {
            self.spawned += 1;
            if store.enqueue(self.unit, self.threshold, request).is_none() {
                tracing::debug!(unit = %self.unit, "scheduled update dropped, unit destroyed");
            }
        }

        Ok(Step::Evaluated {
            sequence: record.sequence(),
            remaining: self.records.len() - self.cursor,
        })
    }

    /// Stop the attempt and give the unit back
    ///
    /// Returns true if the attempt was still folding.
    pub fn abandon(&mut self, store: &UnitStore, reason: PreemptReason) -> bool {
        if !self.is_folding() {
            return false;
        }
        let id = self.id;
        store.with_slot_mut(self.unit, |slot| slot.release(id));
        self.mark_preempted(reason);
        true
    }

    /// Consume the attempt, yielding what it folded
    ///
    /// Scheduled updates were already queued as they appeared.
    pub fn finish(self) -> Materialized {
        self.fold.finish()
    }

    pub(crate) fn mark_committed(&mut self) {
        self.status = AttemptStatus::Committed;
    }

    pub(crate) fn mark_preempted(&mut self, reason: PreemptReason) -> Step {
        self.status = AttemptStatus::Preempted(reason);
        tracing::debug!(unit = %self.unit, attempt = %self.id, %reason, "fold discarded");
        Step::Preempted(reason)
    }
}

impl fmt::Debug for AttemptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttemptContext")
            .field("id", &self.id)
            .field("unit", &self.unit)
            .field("threshold", &self.threshold)
            .field("cursor", &self.cursor)
            .field("records", &self.records.len())
            .field("status", &self.status)
            .finish()
    }
}
