//! Step-wise fold attempts
//!
//! [`Engine::begin_fold`](crate::Engine::begin_fold) hands the driver a
//! [`FoldAttempt`]: the gaps between its [`FoldAttempt::step`] calls are the
//! points where a host may yield, and where more urgent work can take the
//! unit away.
//!
//! ```text
//! let attempt = engine.begin_fold(unit, Priority::LOW)?;   // claims the unit
//! attempt.step()?;                                          // A
//! attempt.step()?;                                          // B
//! engine.enqueue(unit, d, MergeMode::Merge, Priority::SYNC, None);
//!                                                           // unit taken away
//! attempt.commit()?  == Preempted(MoreUrgentWork)           // nothing kept
//! ```

use crate::engine::Engine;
use crate::report::AttemptOutcome;
use surge_concurrency::{AttemptContext, AttemptStatus, CommitOutcome, FoldProgress, PreemptReason, Step};
use surge_core::{Error, Priority, Result, UnitId, Value};
use surge_storage::AttemptId;

/// An in-progress fold over one unit
///
/// Dropping an attempt that has not committed discards it and gives the
/// unit back.
pub struct FoldAttempt {
    engine: Engine,
    ctx: Option<AttemptContext>,
}

impl FoldAttempt {
    pub(crate) fn new(engine: Engine, ctx: AttemptContext) -> Self {
        Self { engine, ctx: Some(ctx) }
    }

    fn ctx(&self) -> Result<&AttemptContext> {
        self.ctx
            .as_ref()
            .ok_or_else(|| Error::Internal("fold attempt already finished".into()))
    }

    /// Unit being folded
    pub fn unit(&self) -> Option<UnitId> {
        self.ctx.as_ref().map(AttemptContext::unit)
    }

    /// Attempt id
    pub fn id(&self) -> Option<AttemptId> {
        self.ctx.as_ref().map(AttemptContext::id)
    }

    /// Threshold of this attempt
    pub fn threshold(&self) -> Option<Priority> {
        self.ctx.as_ref().map(AttemptContext::threshold)
    }

    /// Current status
    pub fn status(&self) -> Option<AttemptStatus> {
        self.ctx.as_ref().map(AttemptContext::status)
    }

    /// Progress snapshot
    pub fn progress(&self) -> Result<FoldProgress> {
        Ok(self.ctx()?.progress())
    }

    /// Candidate state folded so far; never visible through the engine
    pub fn candidate(&self) -> Result<&Value> {
        Ok(self.ctx()?.candidate())
    }

    /// Fold the next record
    ///
    /// # Errors
    /// A failing payload ends the attempt; the unit is released and every
    /// record stays pending.
    pub fn step(&mut self) -> Result<Step> {
        let engine = &self.engine;
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| Error::Internal("fold attempt already finished".into()))?;
        engine.inner().manager.step(&engine.inner().store, ctx)
    }

    /// Discard the attempt and give the unit back
    ///
    /// Returns true if the attempt was still folding.
    pub fn abandon(mut self) -> bool {
        match self.ctx.as_mut() {
            Some(ctx) => {
                let inner = self.engine.inner();
                inner.manager.abandon(&inner.store, ctx, PreemptReason::Abandoned)
            }
            None => false,
        }
    }

    /// Fold the remaining records and commit
    ///
    /// Fires the reconciler and then the collected callbacks before
    /// returning. Returns [`AttemptOutcome::Preempted`] if the unit was
    /// taken away at any point since the attempt began.
    pub fn commit(mut self) -> Result<AttemptOutcome> {
        let ctx = self
            .ctx
            .take()
            .ok_or_else(|| Error::Internal("fold attempt already finished".into()))?;
        let inner = self.engine.inner();
        match inner.manager.commit(&inner.store, ctx)? {
            CommitOutcome::Committed(fold) => Ok(AttemptOutcome::Committed(self.engine.deliver(fold))),
            CommitOutcome::Preempted(reason) => Ok(AttemptOutcome::Preempted(reason)),
        }
    }
}

impl Drop for FoldAttempt {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.as_mut() {
            let inner = self.engine.inner();
            inner.manager.abandon(&inner.store, ctx, PreemptReason::Abandoned);
        }
    }
}

impl std::fmt::Debug for FoldAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FoldAttempt").field("ctx", &self.ctx).finish()
    }
}
