//! Attempt manager for coordinating fold commits
//!
//! Commits a fold by orchestrating:
//! 1. Folding the rest of the records in scope
//! 2. Validation (the attempt still holds the unit)
//! 3. Publication (base state replaced, consumed records pruned)
//!
//! Core invariants:
//! - All-or-nothing: a fold publishes every record it consumed or none
//! - Exact pruning: records queued while the fold ran stay pending
//! - A committing attempt cannot be preempted
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. step() until Complete     - may end early with Preempted or an error
//! 2. finish()                  - take the candidate and its callbacks
//! 3. under the unit's guard:
//!      is_folding(attempt)?    - validation; fails if preempted meanwhile
//!      base_state = candidate  - publication
//!      prune(consumed)
//!      phase = Committing
//! 4. return the committed fold - the caller fires hooks and callbacks,
//!                                then calls release()
//! ```
//!
//! Step 3's checks and writes happen under one guard, so a more urgent
//! enqueue either lands before validation (and the commit is refused) or
//! after publication (and does not preempt).

use crate::attempt::{AttemptContext, PreemptReason, Step};
use crate::materializer::Callbacks;
use std::sync::atomic::{AtomicU64, Ordering};
use surge_core::{Priority, Result, UnitId, Value};
use surge_storage::{AttemptId, UnitStore};

/// A fold that has been published
#[derive(Debug)]
pub struct CommittedFold {
    /// Unit the fold was applied to
    pub unit: UnitId,
    /// Attempt that produced it; still holds the unit until released
    pub attempt: AttemptId,
    /// Threshold the fold ran at
    pub threshold: Priority,
    /// The new base state
    pub state: Value,
    /// Callbacks to fire, in fold order
    pub callbacks: Callbacks,
    /// Records pruned from the queue
    pub records: usize,
    /// True if a REPLACE record was folded
    pub fully_replaced: bool,
}

/// Outcome of [`AttemptManager::commit`]
#[derive(Debug)]
pub enum CommitOutcome {
    /// State published
    Committed(CommittedFold),
    /// Nothing published; every record stays pending
    Preempted(PreemptReason),
}

/// Snapshot of attempt counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptMetrics {
    /// Attempts begun
    pub started: u64,
    /// Attempts committed
    pub commits: u64,
    /// Attempts discarded before committing, abandonment excluded
    pub preemptions: u64,
    /// Attempts stopped by a failing payload
    pub failures: u64,
    /// Payload evaluations, counting replays
    pub records_evaluated: u64,
    /// Records published by commits
    pub records_committed: u64,
}

/// Manages fold attempt lifecycle and commits
///
/// Attempt ids come from one counter, so a stale attempt can never be
/// mistaken for the unit's current holder.
///
/// # Thread Safety
///
/// The manager itself holds only atomics. Exclusion between attempts is
/// enforced per unit by the store: at most one attempt holds a unit, and
/// validation plus publication happen under that unit's guard.
#[derive(Debug)]
pub struct AttemptManager {
    /// Next attempt id
    next_attempt: AtomicU64,
    /// Warn when a payload schedules another update
    warn_on_enqueue: bool,

    started: AtomicU64,
    commits: AtomicU64,
    preemptions: AtomicU64,
    failures: AtomicU64,
    records_evaluated: AtomicU64,
    records_committed: AtomicU64,
}

impl AttemptManager {
    /// Create a new attempt manager
    pub fn new(warn_on_enqueue: bool) -> Self {
        AttemptManager {
            next_attempt: AtomicU64::new(1),
            warn_on_enqueue,
            started: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            preemptions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            records_evaluated: AtomicU64::new(0),
            records_committed: AtomicU64::new(0),
        }
    }

    /// Allocate the next attempt id
    pub fn next_attempt_id(&self) -> AttemptId {
        AttemptId::from_raw(self.next_attempt.fetch_add(1, Ordering::Relaxed))
    }

    /// Begin an attempt on `unit` at `threshold`
    ///
    /// `Ok(None)` means nothing is pending in scope.
    pub fn begin(&self, store: &UnitStore, unit: UnitId, threshold: Priority) -> Result<Option<AttemptContext>> {
        let id = self.next_attempt_id();
        let ctx = AttemptContext::begin(store, unit, threshold, id, self.warn_on_enqueue)?;
        if ctx.is_some() {
            self.started.fetch_add(1, Ordering::Relaxed);
        }
        Ok(ctx)
    }

    /// Advance an attempt by one record, keeping the counters
    pub fn step(&self, store: &UnitStore, ctx: &mut AttemptContext) -> Result<Step> {
        let was_folding = ctx.is_folding();
        match ctx.step(store) {
            Ok(step) => {
                match step {
                    Step::Evaluated { .. } => {
                        self.records_evaluated.fetch_add(1, Ordering::Relaxed);
                    }
                    Step::Preempted(_) if was_folding => {
                        self.preemptions.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
                Ok(step)
            }
            Err(e) => {
                if was_folding {
                    // the failing payload ran too
                    self.records_evaluated.fetch_add(1, Ordering::Relaxed);
                    self.failures.fetch_add(1, Ordering::Relaxed);
                }
                Err(e)
            }
        }
    }

    /// Stop an attempt without committing
    pub fn abandon(&self, store: &UnitStore, ctx: &mut AttemptContext, reason: PreemptReason) -> bool {
        let stopped = ctx.abandon(store, reason);
        if stopped && reason != PreemptReason::Abandoned {
            self.preemptions.fetch_add(1, Ordering::Relaxed);
        }
        stopped
    }

    /// Fold whatever is left and publish the result
    ///
    /// # Returns
    /// - `Ok(Committed)` with the published fold; the unit stays held until
    ///   [`AttemptManager::release`]
    /// - `Ok(Preempted)` if the attempt lost the unit; nothing was published
    /// - `Err` if a payload failed; nothing was published
    pub fn commit(&self, store: &UnitStore, mut ctx: AttemptContext) -> Result<CommitOutcome> {
        loop {
            match self.step(store, &mut ctx)? {
                Step::Evaluated { .. } => continue,
                Step::Complete => break,
                Step::Preempted(reason) => return Ok(CommitOutcome::Preempted(reason)),
            }
        }

        let unit = ctx.unit();
        let attempt = ctx.id();
        let threshold = ctx.threshold();
        ctx.mark_committed();
        let materialized = ctx.finish();
        let state = materialized.state;

        let published = store.with_slot_mut(unit, |slot| slot.apply(attempt, state.clone(), &materialized.consumed));
        let records = match published {
            None => {
                self.preemptions.fetch_add(1, Ordering::Relaxed);
                return Ok(CommitOutcome::Preempted(PreemptReason::UnitDestroyed));
            }
            Some(None) => {
                self.preemptions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%unit, %attempt, "commit refused, attempt was preempted");
                return Ok(CommitOutcome::Preempted(PreemptReason::MoreUrgentWork));
            }
            Some(Some(pruned)) => pruned,
        };

        self.commits.fetch_add(1, Ordering::Relaxed);
        self.records_committed.fetch_add(records as u64, Ordering::Relaxed);
        tracing::debug!(
            %unit,
            %attempt,
            %threshold,
            records,
            replaced = materialized.fully_replaced,
            "fold committed"
        );

        Ok(CommitOutcome::Committed(CommittedFold {
            unit,
            attempt,
            threshold,
            state,
            callbacks: materialized.callbacks,
            records,
            fully_replaced: materialized.fully_replaced,
        }))
    }

    /// Give a committed unit back once its callbacks have run
    pub fn release(&self, store: &UnitStore, unit: UnitId, attempt: AttemptId) -> bool {
        store
            .with_slot_mut(unit, |slot| slot.release(attempt))
            .unwrap_or(false)
    }

    /// Counter snapshot
    pub fn metrics(&self) -> AttemptMetrics {
        AttemptMetrics {
            started: self.started.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            records_evaluated: self.records_evaluated.load(Ordering::Relaxed),
            records_committed: self.records_committed.load(Ordering::Relaxed),
        }
    }
}

impl Default for AttemptManager {
    fn default() -> Self {
        Self::new(true)
    }
}
