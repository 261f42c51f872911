//! State materializer
//!
//! Folds a committed base state through an ordered run of update records
//! and produces a *candidate* state. Nothing here commits: the base state,
//! the queue and the callbacks are left alone.
//!
//! ```text
//! acc = base
//! for record in records:
//!     result = evaluate(record.payload, acc, owner)
//!     acc = REPLACE ? result : shallow_merge(acc, result)
//!     collect(record.callback, acc)
//! ```
//!
//! Payload functions run once per fold. A fold that is later discarded has
//! still run them, so a payload may be observed to run more than once for
//! the same record. Payloads must tolerate being replayed.

use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use surge_core::{Error, Priority, Result, Sequence, UnitId, Value};
use surge_storage::{Callback, FoldContext, MergeMode, UpdateRecord, UpdateRequest};

/// A callback collected during a fold, waiting for the commit
pub struct CollectedCallback {
    /// Record the callback belongs to
    pub sequence: Sequence,
    /// Accumulated state right after that record was folded
    pub state: Value,
    callback: Callback,
}

impl CollectedCallback {
    /// Run the callback
    pub fn invoke(&self) {
        (self.callback)()
    }
}

impl fmt::Debug for CollectedCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectedCallback")
            .field("sequence", &self.sequence)
            .field("state", &self.state)
            .finish()
    }
}

/// Callbacks of one fold; most folds collect only a handful
pub type Callbacks = SmallVec<[CollectedCallback; 4]>;

/// Output of a completed fold
#[derive(Debug)]
pub struct Materialized {
    /// Candidate next state
    pub state: Value,
    /// Callbacks to fire if the candidate is committed, in fold order
    pub callbacks: Callbacks,
    /// True if any REPLACE record was folded
    pub fully_replaced: bool,
    /// Records folded, in fold order
    pub consumed: Vec<Sequence>,
}

/// An in-progress fold, advanced one record at a time
#[derive(Debug)]
pub struct Fold {
    unit: UnitId,
    priority: Priority,
    warn_on_enqueue: bool,
    acc: Value,
    callbacks: Callbacks,
    fully_replaced: bool,
    consumed: Vec<Sequence>,
}

impl Fold {
    /// Start folding from a committed base state
    ///
    /// `priority` is the fold's threshold; updates scheduled from inside a
    /// payload inherit it.
    pub fn new(unit: UnitId, priority: Priority, base: Value, warn_on_enqueue: bool) -> Self {
        Self {
            unit,
            priority,
            warn_on_enqueue,
            acc: base,
            callbacks: Callbacks::new(),
            fully_replaced: false,
            consumed: Vec::new(),
        }
    }

    /// State accumulated so far
    pub fn state(&self) -> &Value {
        &self.acc
    }

    /// Number of records folded so far
    pub fn evaluated(&self) -> usize {
        self.consumed.len()
    }

    /// Fold one record
    ///
    /// Returns the updates its payload scheduled. On failure the fold is
    /// unusable and must be discarded.
    pub fn apply(&mut self, record: &UpdateRecord, owner: &Value) -> Result<Vec<UpdateRequest>> {
        let unit = self.unit;
        let sequence = record.sequence();
        let failed = |source: anyhow::Error| Error::RecordFailed {
            unit,
            sequence,
            source,
        };

        let mut ctx = FoldContext::new(unit, self.priority, owner, self.warn_on_enqueue);
        let result = record.payload().evaluate(&self.acc, &mut ctx).map_err(failed)?;
        let spawned = ctx.into_spawned();

        match record.mode() {
            MergeMode::Replace => {
                self.acc = result;
                self.fully_replaced = true;
            }
            MergeMode::Merge => {
                let acc = std::mem::take(&mut self.acc);
                self.acc = acc
                    .shallow_merge(result)
                    .map_err(|e| failed(anyhow::Error::new(e)))?;
            }
        }

        if let Some(callback) = record.callback() {
            self.callbacks.push(CollectedCallback {
                sequence,
                state: self.acc.clone(),
                callback: Arc::clone(callback),
            });
        }
        self.consumed.push(sequence);
        Ok(spawned)
    }

    /// Finish the fold, yielding the candidate
    pub fn finish(self) -> Materialized {
        Materialized {
            state: self.acc,
            callbacks: self.callbacks,
            fully_replaced: self.fully_replaced,
            consumed: self.consumed,
        }
    }
}

/// Fold `records` on top of `base` in one go
///
/// Updates scheduled by payloads are returned alongside the candidate
/// rather than queued; the caller decides where they go.
pub fn materialize(
    unit: UnitId,
    priority: Priority,
    base: &Value,
    owner: &Value,
    records: &[Arc<UpdateRecord>],
) -> Result<(Materialized, Vec<UpdateRequest>)> {
    let mut fold = Fold::new(unit, priority, base.clone(), false);
    let mut spawned = Vec::new();
    for record in records {
        spawned.extend(fold.apply(record, owner)?);
    }
    Ok((fold.finish(), spawned))
}
