//! Preemption discards folds wholesale and retries them later

use crate::common::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use surge::prelude::*;
use surge::surge_engine::{AttemptStatus, FoldProgress};

#[test]
fn preempted_fold_is_discarded_and_replayed() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());
    let (a, b, c) = (Counter::new(), Counter::new(), Counter::new());

    engine.enqueue(unit, a.merging(obj(&[("a", "a")])), MergeMode::Merge, Priority::LOW, None);
    engine.enqueue(unit, b.merging(obj(&[("b", "b")])), MergeMode::Merge, Priority::LOW, None);
    engine.enqueue(unit, c.merging(obj(&[("c", "c")])), MergeMode::Merge, Priority::LOW, None);

    let mut attempt = engine.begin_fold(unit, Priority::LOW).unwrap().unwrap();
    for _ in 0..3 {
        assert!(matches!(attempt.step().unwrap(), Step::Evaluated { .. }));
    }
    assert_eq!((a.get(), b.get(), c.get()), (1, 1, 1));

    // more urgent work arrives before the fold commits
    engine.enqueue(unit, obj(&[("d", "d")]), MergeMode::Merge, Priority::SYNC, None);
    assert_eq!(engine.flush_at_or_below(Priority::SYNC).unwrap(), 1);
    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("d", "d")]));

    assert_eq!(
        attempt.commit().unwrap(),
        AttemptOutcome::Preempted(PreemptReason::MoreUrgentWork)
    );
    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("d", "d")]));

    // the discarded records run again, from the committed base
    engine.flush_at_or_below(Priority::LOW).unwrap();
    assert_eq!((a.get(), b.get(), c.get()), (2, 2, 2));
    assert_eq!(
        engine.current_state(unit).unwrap(),
        obj(&[("a", "a"), ("b", "b"), ("c", "c"), ("d", "d")])
    );
    assert_eq!(engine.pending_count(unit).unwrap(), 0);
}

#[test]
fn preemption_before_any_record_leaves_queue_unchanged() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());
    let counter = Counter::new();
    engine.enqueue(unit, counter.merging(obj(&[("a", "a")])), MergeMode::Merge, Priority::LOW, None);

    let mut attempt = engine.begin_fold(unit, Priority::LOW).unwrap().unwrap();
    engine.enqueue(unit, obj(&[("b", "b")]), MergeMode::Merge, Priority::SYNC, None);

    assert_eq!(attempt.step().unwrap(), Step::Preempted(PreemptReason::MoreUrgentWork));
    assert_eq!(
        attempt.status(),
        Some(AttemptStatus::Preempted(PreemptReason::MoreUrgentWork))
    );
    assert_eq!(counter.get(), 0);
    assert_eq!(engine.pending_count(unit).unwrap(), 2);
    assert_eq!(engine.current_state(unit).unwrap(), Value::object());
}

#[test]
fn equal_or_less_urgent_work_does_not_preempt() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());
    engine.enqueue(unit, obj(&[("a", "a")]), MergeMode::Merge, Priority::TASK, None);

    let mut attempt = engine.begin_fold(unit, Priority::TASK).unwrap().unwrap();
    attempt.step().unwrap();
    engine.enqueue(unit, obj(&[("same", "x")]), MergeMode::Merge, Priority::TASK, None);
    engine.enqueue(unit, obj(&[("later", "x")]), MergeMode::Merge, Priority::LOW, None);

    let outcome = attempt.commit().unwrap();
    assert_eq!(outcome.committed().unwrap().records, 1);

    // records queued mid-fold never join it
    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("a", "a")]));
    assert_eq!(engine.pending_count(unit).unwrap(), 2);
}

#[test]
fn a_busy_unit_is_skipped_by_flush() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());
    engine.enqueue(unit, obj(&[("a", "a")]), MergeMode::Merge, Priority::TASK, None);

    let attempt = engine.begin_fold(unit, Priority::TASK).unwrap().unwrap();
    assert_eq!(engine.flush_at_or_below(Priority::TASK).unwrap(), 0);

    drop(attempt);
    assert_eq!(engine.flush_at_or_below(Priority::TASK).unwrap(), 1);
}

#[test]
fn dropping_an_attempt_releases_the_unit() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());
    engine.enqueue(unit, obj(&[("a", "a")]), MergeMode::Merge, Priority::TASK, None);

    {
        let mut attempt = engine.begin_fold(unit, Priority::TASK).unwrap().unwrap();
        attempt.step().unwrap();
        assert!(matches!(engine.begin_fold(unit, Priority::TASK), Err(Error::UnitBusy(_))));
    }

    let attempt = engine.begin_fold(unit, Priority::TASK).unwrap().unwrap();
    assert!(attempt.abandon());
    assert_eq!(engine.current_state(unit).unwrap(), Value::object());
    assert_eq!(engine.pending_count(unit).unwrap(), 1);
}

#[test]
fn destroying_a_unit_discards_its_fold() {
    let engine = engine();
    let log = EventLog::new();
    let unit = engine.create_unit(Value::object());
    engine.enqueue(unit, obj(&[("a", "a")]), MergeMode::Merge, Priority::TASK, Some(log.callback("a")));

    let mut attempt = engine.begin_fold(unit, Priority::TASK).unwrap().unwrap();
    attempt.step().unwrap();
    assert!(engine.destroy_unit(unit));

    assert_eq!(
        attempt.commit().unwrap(),
        AttemptOutcome::Preempted(PreemptReason::UnitDestroyed)
    );
    assert!(log.events().is_empty());
}

/// Yields whenever its switch is on
struct Budget(AtomicBool);

impl PriorityArbiter for Budget {
    fn assign(&self, _unit: UnitId, _mode: MergeMode) -> Priority {
        Priority::TASK
    }

    fn should_yield(&self, progress: &FoldProgress) -> bool {
        self.0.load(Ordering::SeqCst) && progress.evaluated >= 1
    }
}

#[test]
fn arbiter_can_stop_a_flush_between_records() {
    let budget = Arc::new(Budget(AtomicBool::new(true)));
    let engine = Engine::builder().arbiter(Arc::clone(&budget)).build().unwrap();
    let unit = engine.create_unit(Value::object());
    let counter = Counter::new();

    engine.submit(unit, counter.merging(obj(&[("a", "a")])), None);
    engine.submit(unit, counter.merging(obj(&[("b", "b")])), None);

    let report = engine.flush_report(Priority::TASK).unwrap();
    assert!(report.yielded);
    assert_eq!(report.commits, 0);
    assert_eq!(counter.get(), 1);
    assert_eq!(engine.current_state(unit).unwrap(), Value::object());
    assert_eq!(engine.pending_count(unit).unwrap(), 2);

    budget.0.store(false, Ordering::SeqCst);
    assert_eq!(engine.flush_at_or_below(Priority::TASK).unwrap(), 1);
    assert_eq!(counter.get(), 3);
    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("a", "a"), ("b", "b")]));
}

#[test]
fn metrics_count_replays() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());
    engine.enqueue(unit, obj(&[("a", "a")]), MergeMode::Merge, Priority::LOW, None);
    engine.enqueue(unit, obj(&[("b", "b")]), MergeMode::Merge, Priority::LOW, None);

    let mut attempt = engine.begin_fold(unit, Priority::LOW).unwrap().unwrap();
    attempt.step().unwrap();
    attempt.step().unwrap();
    engine.enqueue(unit, obj(&[("c", "c")]), MergeMode::Merge, Priority::SYNC, None);
    attempt.step().unwrap();
    drop(attempt);

    engine.flush_at_or_below(Priority::LOW).unwrap();
    let metrics = engine.metrics();
    assert_eq!(metrics.preemptions, 1);
    assert_eq!(metrics.commits, 1);
    assert_eq!(metrics.records_evaluated, 5);
    assert_eq!(metrics.records_committed, 3);
}
