//! Engine: unit lifecycle, enqueue, and the work loop
//!
//! ## Work loop
//!
//! ```text
//! flush(threshold):
//!   loop:
//!     ready = idle units with records <= threshold, oldest request first
//!     for unit in ready:
//!       begin attempt            (claims the unit, snapshots its records)
//!       step until complete      (arbiter may yield between records)
//!       commit                   (refused if the unit was taken away)
//!       reconciler, callbacks    (unit still held, so they stay ordered)
//!       release
//!   until nothing is ready
//! ```
//!
//! A commit or callback may queue more work for the same threshold; the
//! loop picks it up in a later round of the same flush. The number of
//! attempts one flush may start is capped by
//! [`EngineConfig::max_flush_rounds`].

use crate::arbiter::{FixedPriority, PriorityArbiter};
use crate::attempt::FoldAttempt;
use crate::config::EngineConfig;
use crate::reconcile::{NoopReconciler, Reconciler};
use crate::report::{AttemptOutcome, CommitSummary, EngineMetrics, FlushReport};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use surge_concurrency::{AttemptContext, AttemptManager, CommitOutcome, CommittedFold, PreemptReason, Step};
use surge_core::{Error, Priority, Result, UnitId, Value};
use surge_storage::{AttemptId, Callback, MergeMode, Payload, UnitStore, UpdateRequest};

pub(crate) struct EngineInner {
    pub(crate) store: UnitStore,
    pub(crate) manager: AttemptManager,
    arbiter: Arc<dyn PriorityArbiter>,
    reconciler: RwLock<Arc<dyn Reconciler>>,
    config: EngineConfig,
}

/// Incremental, priority-aware state-update engine
///
/// Cheap to clone; clones share the same units. Callbacks and payloads may
/// hold a clone and call back into the engine.
///
/// # Example
///
/// ```
/// use surge_core::{Priority, Value};
/// use surge_engine::Engine;
/// use surge_storage::MergeMode;
///
/// let engine = Engine::new();
/// let unit = engine.create_unit(Value::object());
///
/// engine.enqueue(unit, Value::from_pairs([("a", "a")]), MergeMode::Merge, Priority::SYNC, None);
/// engine.enqueue(unit, Value::from_pairs([("b", "b")]), MergeMode::Merge, Priority::LOW, None);
///
/// engine.flush_at_or_below(Priority::SYNC).unwrap();
/// assert_eq!(engine.current_state(unit).unwrap(), Value::from_pairs([("a", "a")]));
///
/// engine.flush_at_or_below(Priority::LOW).unwrap();
/// assert_eq!(
///     engine.current_state(unit).unwrap(),
///     Value::from_pairs([("a", "a"), ("b", "b")])
/// );
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine with default settings
    pub fn new() -> Self {
        let config = EngineConfig::default();
        let arbiter = Arc::new(FixedPriority(config.default_priority));
        Self::from_parts(config, arbiter, Arc::new(NoopReconciler))
    }

    /// Create an engine from a configuration
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        EngineBuilder::new().config(config).build()
    }

    /// Create a builder for engine configuration
    ///
    /// # Example
    ///
    /// ```
    /// use surge_core::Priority;
    /// use surge_engine::{Engine, FixedPriority};
    ///
    /// let engine = Engine::builder()
    ///     .arbiter(FixedPriority(Priority::LOW))
    ///     .max_flush_rounds(100)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(engine.config().max_flush_rounds, 100);
    /// ```
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    fn from_parts(config: EngineConfig, arbiter: Arc<dyn PriorityArbiter>, reconciler: Arc<dyn Reconciler>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store: UnitStore::new(),
                manager: AttemptManager::new(config.warn_on_reentrant_enqueue),
                arbiter,
                reconciler: RwLock::new(reconciler),
                config,
            }),
        }
    }

    pub(crate) fn inner(&self) -> &EngineInner {
        &self.inner
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Swap the reconciler notified on every commit
    pub fn set_reconciler(&self, reconciler: impl Reconciler + 'static) {
        *self.inner.reconciler.write() = Arc::new(reconciler);
    }

    // ========================================================================
    // Unit lifecycle
    // ========================================================================

    /// Create a unit with an initial state and no owner context
    pub fn create_unit(&self, initial: impl Into<Value>) -> UnitId {
        self.create_unit_with_context(initial, Value::Null)
    }

    /// Create a unit with an initial state and owner context
    pub fn create_unit_with_context(&self, initial: impl Into<Value>, owner_context: impl Into<Value>) -> UnitId {
        let unit = self.inner.store.create(initial.into(), owner_context.into());
        tracing::debug!(%unit, "unit created");
        unit
    }

    /// Destroy a unit
    ///
    /// Pending records are dropped without firing their callbacks. An
    /// attempt folding the unit is discarded when it next steps or commits.
    /// Returns false if the unit did not exist.
    pub fn destroy_unit(&self, unit: UnitId) -> bool {
        match self.inner.store.destroy(unit) {
            Some(mut slot) => {
                let discarded = slot.queue.clear();
                tracing::debug!(%unit, discarded, "unit destroyed");
                true
            }
            None => false,
        }
    }

    /// Check if a unit exists
    pub fn contains_unit(&self, unit: UnitId) -> bool {
        self.inner.store.contains(unit)
    }

    /// Number of live units
    pub fn unit_count(&self) -> usize {
        self.inner.store.unit_count()
    }

    /// Last committed state of a unit
    pub fn current_state(&self, unit: UnitId) -> Result<Value> {
        self.inner
            .store
            .with_slot(unit, |slot| slot.base_state.clone())
            .ok_or(Error::UnitNotFound(unit))
    }

    /// Owner context handed to the unit's payloads
    pub fn owner_context(&self, unit: UnitId) -> Result<Value> {
        self.inner
            .store
            .with_slot(unit, |slot| slot.owner_context.clone())
            .ok_or(Error::UnitNotFound(unit))
    }

    /// Replace the unit's owner context
    ///
    /// Takes effect for folds that begin afterwards.
    pub fn set_owner_context(&self, unit: UnitId, owner_context: impl Into<Value>) -> Result<()> {
        let owner_context = owner_context.into();
        self.inner
            .store
            .with_slot_mut(unit, |slot| slot.owner_context = owner_context)
            .ok_or(Error::UnitNotFound(unit))
    }

    /// Number of records pending for a unit
    pub fn pending_count(&self, unit: UnitId) -> Result<usize> {
        self.inner
            .store
            .with_slot(unit, |slot| slot.queue.len())
            .ok_or(Error::UnitNotFound(unit))
    }

    /// Number of records pending for a unit at or below `threshold`
    pub fn pending_at_or_below(&self, unit: UnitId, threshold: Priority) -> Result<usize> {
        self.inner
            .store
            .with_slot(unit, |slot| slot.queue.count_at_or_below(threshold))
            .ok_or(Error::UnitNotFound(unit))
    }

    // ========================================================================
    // Enqueue
    // ========================================================================

    /// Queue an update for `unit` at `priority`
    ///
    /// Never fails. An update for a unit that does not exist is dropped. An
    /// update strictly more urgent than a fold in progress on the unit
    /// preempts that fold, unless one of that fold's payloads is queueing
    /// it: then it takes the fold's threshold instead.
    pub fn enqueue(
        &self,
        unit: UnitId,
        payload: impl Into<Payload>,
        mode: MergeMode,
        priority: Priority,
        callback: Option<Callback>,
    ) {
        let request = UpdateRequest {
            payload: payload.into(),
            mode,
            callback,
        };
        self.enqueue_request(unit, priority, request);
    }

    /// Queue a REPLACE update for `unit` at `priority`
    pub fn enqueue_replace(
        &self,
        unit: UnitId,
        payload: impl Into<Payload>,
        priority: Priority,
        callback: Option<Callback>,
    ) {
        self.enqueue(unit, payload, MergeMode::Replace, priority, callback);
    }

    /// Queue a MERGE update at the priority the arbiter assigns
    ///
    /// Returns the priority the update was queued at.
    pub fn submit(&self, unit: UnitId, payload: impl Into<Payload>, callback: Option<Callback>) -> Priority {
        let priority = self.inner.arbiter.assign(unit, MergeMode::Merge);
        let request = UpdateRequest {
            payload: payload.into(),
            mode: MergeMode::Merge,
            callback,
        };
        self.stamp_and_queue(unit, priority, request).unwrap_or(priority)
    }

    /// Queue a REPLACE update at the priority the arbiter assigns
    pub fn submit_replace(&self, unit: UnitId, payload: impl Into<Payload>, callback: Option<Callback>) -> Priority {
        let priority = self.inner.arbiter.assign(unit, MergeMode::Replace);
        let request = UpdateRequest {
            payload: payload.into(),
            mode: MergeMode::Replace,
            callback,
        };
        self.stamp_and_queue(unit, priority, request).unwrap_or(priority)
    }

    /// Queue a prepared request
    pub fn enqueue_request(&self, unit: UnitId, priority: Priority, request: UpdateRequest) {
        self.stamp_and_queue(unit, priority, request);
    }

    /// Returns the priority the record was stamped with, or `None` if the
    /// unit does not exist
    fn stamp_and_queue(&self, unit: UnitId, priority: Priority, request: UpdateRequest) -> Option<Priority> {
        let mode = request.mode;
        let Some((record, effect)) = self.inner.store.enqueue(unit, priority, request) else {
            tracing::warn!(%unit, %priority, "update for unknown unit dropped");
            return None;
        };
        let stamped = record.priority();
        tracing::debug!(
            %unit,
            priority = %stamped,
            sequence = %record.sequence(),
            ?mode,
            "update queued"
        );
        if effect.reentrant && self.inner.config.warn_on_reentrant_enqueue {
            tracing::warn!(
                %unit,
                requested = %priority,
                priority = %stamped,
                "update queued from inside a running payload; it takes the fold's priority"
            );
        }
        if let Some(attempt) = effect.preempted {
            tracing::debug!(%unit, %attempt, priority = %stamped, "fold preempted by more urgent update");
        }
        Some(stamped)
    }

    // ========================================================================
    // Work loop
    // ========================================================================

    /// Claim `unit` and start folding everything pending at or below `threshold`
    ///
    /// Returns `Ok(None)` if nothing is pending in scope.
    ///
    /// # Errors
    /// - `UnitNotFound` if the unit does not exist
    /// - `UnitBusy` if another attempt holds the unit
    pub fn begin_fold(&self, unit: UnitId, threshold: Priority) -> Result<Option<FoldAttempt>> {
        let ctx = self.inner.manager.begin(&self.inner.store, unit, threshold)?;
        Ok(ctx.map(|ctx| FoldAttempt::new(self.clone(), ctx)))
    }

    /// Fold `unit` at `threshold` and commit, unless preempted first
    ///
    /// The arbiter is asked before every record whether to yield.
    ///
    /// # Errors
    /// A failing payload aborts the fold; every record stays pending.
    pub fn run_to_completion_or_preemption(&self, unit: UnitId, threshold: Priority) -> Result<AttemptOutcome> {
        let inner = &self.inner;
        let Some(mut ctx) = inner.manager.begin(&inner.store, unit, threshold)? else {
            return Ok(AttemptOutcome::Idle);
        };

        if let Some(reason) = self.drive(&mut ctx)? {
            return Ok(AttemptOutcome::Preempted(reason));
        }

        match inner.manager.commit(&inner.store, ctx)? {
            CommitOutcome::Committed(fold) => Ok(AttemptOutcome::Committed(self.deliver(fold))),
            CommitOutcome::Preempted(reason) => Ok(AttemptOutcome::Preempted(reason)),
        }
    }

    /// Step `ctx` until every record is folded
    ///
    /// Returns the reason if the attempt stopped early.
    fn drive(&self, ctx: &mut AttemptContext) -> Result<Option<PreemptReason>> {
        let inner = &self.inner;
        loop {
            let progress = ctx.progress();
            if progress.remaining > 0 && inner.arbiter.should_yield(&progress) {
                inner.manager.abandon(&inner.store, ctx, PreemptReason::Yielded);
                return Ok(Some(PreemptReason::Yielded));
            }
            match inner.manager.step(&inner.store, ctx)? {
                Step::Evaluated { .. } => {}
                Step::Complete => return Ok(None),
                Step::Preempted(reason) => return Ok(Some(reason)),
            }
        }
    }

    /// Hand a published fold to the reconciler and its callbacks, then
    /// give the unit back
    pub(crate) fn deliver(&self, fold: CommittedFold) -> CommitSummary {
        let inner = &self.inner;
        let _release = ReleaseGuard {
            engine: self,
            unit: fold.unit,
            attempt: fold.attempt,
        };

        let reconciler = Arc::clone(&*inner.reconciler.read());
        if let Some(owner_context) = reconciler.on_commit(fold.unit, &fold.state) {
            inner
                .store
                .with_slot_mut(fold.unit, |slot| slot.owner_context = owner_context);
        }

        for callback in &fold.callbacks {
            tracing::trace!(unit = %fold.unit, sequence = %callback.sequence, "firing callback");
            callback.invoke();
        }

        CommitSummary {
            unit: fold.unit,
            state: fold.state,
            records: fold.records,
            callbacks: fold.callbacks.len(),
            fully_replaced: fold.fully_replaced,
        }
    }

    /// Drive every unit with work at or below `threshold` until none is left
    ///
    /// Returns the number of distinct units committed, or the first failure.
    /// Units that did not fail are still committed when another unit fails.
    pub fn flush_at_or_below(&self, threshold: Priority) -> Result<usize> {
        let mut report = self.flush_report(threshold)?;
        if report.failures.is_empty() {
            Ok(report.committed_count())
        } else {
            Err(report.failures.swap_remove(0))
        }
    }

    /// Like [`Engine::flush_at_or_below`], but reports everything
    ///
    /// A unit whose fold fails is skipped for the rest of the flush.
    ///
    /// # Errors
    /// `FlushLimitExceeded` if the flush starts more attempts than
    /// [`EngineConfig::max_flush_rounds`] allows.
    pub fn flush_report(&self, threshold: Priority) -> Result<FlushReport> {
        let limit = self.inner.config.max_flush_rounds;
        let mut report = FlushReport::default();
        let mut committed = BTreeSet::new();
        let mut failed = BTreeSet::new();
        let mut rounds = 0usize;

        tracing::debug!(%threshold, "flush started");

        loop {
            let ready: Vec<UnitId> = self
                .inner
                .store
                .ready_units(threshold)
                .into_iter()
                .filter(|unit| !failed.contains(unit))
                .collect();
            if ready.is_empty() {
                break;
            }

            for unit in ready {
                rounds += 1;
                if rounds > limit {
                    tracing::warn!(%threshold, rounds = limit, "flush round limit reached");
                    return Err(Error::FlushLimitExceeded { rounds: limit });
                }

                match self.run_to_completion_or_preemption(unit, threshold) {
                    Ok(AttemptOutcome::Committed(_)) => {
                        report.commits += 1;
                        if committed.insert(unit) {
                            report.committed_units.push(unit);
                        }
                    }
                    Ok(AttemptOutcome::Preempted(PreemptReason::Yielded)) => {
                        report.yielded = true;
                        tracing::debug!(%threshold, commits = report.commits, "flush yielded");
                        return Ok(report);
                    }
                    // taken by more urgent work or destroyed; the next round sees it
                    Ok(AttemptOutcome::Preempted(_)) | Ok(AttemptOutcome::Idle) => {}
                    // claimed elsewhere between listing and beginning
                    Err(Error::UnitBusy(_)) | Err(Error::UnitNotFound(_)) => {}
                    Err(e) => {
                        tracing::warn!(%unit, error = %e, "fold failed during flush");
                        failed.insert(unit);
                        report.failures.push(e);
                    }
                }
            }
        }

        tracing::debug!(
            %threshold,
            units = report.committed_units.len(),
            commits = report.commits,
            failures = report.failures.len(),
            "flush finished"
        );
        Ok(report)
    }

    /// Engine metrics
    pub fn metrics(&self) -> EngineMetrics {
        let attempts = self.inner.manager.metrics();
        EngineMetrics {
            units: self.inner.store.unit_count(),
            pending: self.inner.store.total_pending(),
            commits: attempts.commits,
            preemptions: attempts.preemptions,
            failures: attempts.failures,
            records_committed: attempts.records_committed,
            records_evaluated: attempts.records_evaluated,
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("units", &self.inner.store.unit_count())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Releases a committed unit even if a callback panics
struct ReleaseGuard<'a> {
    engine: &'a Engine,
    unit: UnitId,
    attempt: AttemptId,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        let inner = &self.engine.inner;
        inner.manager.release(&inner.store, self.unit, self.attempt);
    }
}

/// Builder for engine configuration
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use surge_core::Priority;
/// use surge_engine::{Engine, ScopedPriority};
///
/// let arbiter = Arc::new(ScopedPriority::new(Priority::LOW));
/// let engine = Engine::builder()
///     .arbiter(Arc::clone(&arbiter))
///     .warn_on_reentrant_enqueue(false)
///     .build()
///     .unwrap();
///
/// let unit = engine.create_unit(surge_core::Value::object());
/// let assigned = arbiter.with_priority(Priority::SYNC, || {
///     engine.submit(unit, surge_core::Value::from_pairs([("a", 1)]), None)
/// });
/// assert_eq!(assigned, Priority::SYNC);
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    arbiter: Option<Arc<dyn PriorityArbiter>>,
    reconciler: Option<Arc<dyn Reconciler>>,
}

impl EngineBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            arbiter: None,
            reconciler: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `arbiter` to assign priorities and budget folds
    ///
    /// Defaults to [`FixedPriority`] at the configured default priority.
    pub fn arbiter(mut self, arbiter: impl PriorityArbiter + 'static) -> Self {
        self.arbiter = Some(Arc::new(arbiter));
        self
    }

    /// Notify `reconciler` on every commit
    pub fn reconciler(mut self, reconciler: impl Reconciler + 'static) -> Self {
        self.reconciler = Some(Arc::new(reconciler));
        self
    }

    /// Warn when a payload schedules another update while folding
    pub fn warn_on_reentrant_enqueue(mut self, warn: bool) -> Self {
        self.config.warn_on_reentrant_enqueue = warn;
        self
    }

    /// Cap the attempts one flush may start
    pub fn max_flush_rounds(mut self, rounds: usize) -> Self {
        self.config.max_flush_rounds = rounds;
        self
    }

    /// Priority the default arbiter assigns
    pub fn default_priority(mut self, priority: Priority) -> Self {
        self.config.default_priority = priority;
        self
    }

    /// Build the engine
    ///
    /// # Errors
    /// `InvalidConfig` if the configuration does not validate.
    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;
        let arbiter = self
            .arbiter
            .unwrap_or_else(|| Arc::new(FixedPriority(self.config.default_priority)));
        let reconciler = self.reconciler.unwrap_or_else(|| Arc::new(NoopReconciler));
        Ok(Engine::from_parts(self.config, arbiter, reconciler))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("arbiter", &self.arbiter.is_some())
            .field("reconciler", &self.reconciler.is_some())
            .finish()
    }
}
