//! Updates scheduled from inside a payload

use crate::common::*;
use std::sync::Arc;
use surge::prelude::*;

/// Updater that merges `partial` and, the first time it runs, schedules
/// `follow_up` for the same unit
fn spawning(partial: Value, follow_up: Value) -> Payload {
    let spawned = Arc::new(std::sync::atomic::AtomicBool::new(false));
    Payload::updater(move |_, ctx| {
        if !spawned.swap(true, std::sync::atomic::Ordering::SeqCst) {
            ctx.enqueue(follow_up.clone(), MergeMode::Merge);
        }
        Ok(partial.clone())
    })
}

#[test]
fn scheduled_update_commits_in_the_same_flush() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());
    engine.enqueue(
        unit,
        spawning(obj(&[("a", "a")]), obj(&[("b", "b")])),
        MergeMode::Merge,
        Priority::LOW,
        None,
    );

    let report = engine.flush_report(Priority::LOW).unwrap();
    assert_eq!(report.commits, 2);
    assert_eq!(report.committed_count(), 1);
    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("a", "a"), ("b", "b")]));
    assert_eq!(engine.pending_count(unit).unwrap(), 0);
}

#[test]
fn scheduled_update_never_joins_the_running_fold() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());
    engine.enqueue(
        unit,
        spawning(obj(&[("a", "a")]), obj(&[("b", "b")])),
        MergeMode::Merge,
        Priority::TASK,
        None,
    );
    engine.enqueue(unit, obj(&[("c", "c")]), MergeMode::Merge, Priority::TASK, None);

    let attempt = engine.begin_fold(unit, Priority::TASK).unwrap().unwrap();
    let outcome = attempt.commit().unwrap();
    assert_eq!(outcome.committed().unwrap().records, 2);
    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("a", "a"), ("c", "c")]));
    assert_eq!(engine.pending_count(unit).unwrap(), 1);

    engine.flush_at_or_below(Priority::TASK).unwrap();
    assert_eq!(
        engine.current_state(unit).unwrap(),
        obj(&[("a", "a"), ("b", "b"), ("c", "c")])
    );
}

#[test]
fn scheduled_update_inherits_the_fold_priority() {
    // ambient priority says LOW; the fold runs at SYNC
    let arbiter = Arc::new(ScopedPriority::new(Priority::LOW));
    let engine = Engine::builder()
        .arbiter(Arc::clone(&arbiter))
        .warn_on_reentrant_enqueue(false)
        .build()
        .unwrap();
    let unit = engine.create_unit(Value::object());

    let seen = Arc::new(parking_lot::Mutex::new(None));
    let seen_in_payload = Arc::clone(&seen);
    engine.enqueue(
        unit,
        Payload::updater(move |_, ctx| {
            *seen_in_payload.lock() = Some(ctx.priority());
            ctx.enqueue(obj(&[("spawned", "y")]), MergeMode::Merge);
            Ok(obj(&[("a", "a")]))
        }),
        MergeMode::Merge,
        Priority::SYNC,
        None,
    );
    let attempt = engine.begin_fold(unit, Priority::SYNC).unwrap().unwrap();
    attempt.commit().unwrap();

    assert_eq!(*seen.lock(), Some(Priority::SYNC));
    assert_eq!(engine.pending_at_or_below(unit, Priority::SYNC).unwrap(), 1);

    engine.flush_at_or_below(Priority::SYNC).unwrap();
    assert_eq!(
        engine.current_state(unit).unwrap(),
        obj(&[("a", "a"), ("spawned", "y")])
    );
}

#[test]
fn scheduled_update_from_a_wide_fold_takes_the_threshold() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());
    engine.enqueue(
        unit,
        spawning(obj(&[("a", "a")]), obj(&[("b", "b")])),
        MergeMode::Merge,
        Priority::SYNC,
        None,
    );

    // a LOW fold picks up the SYNC record; what it spawns is LOW work
    let attempt = engine.begin_fold(unit, Priority::LOW).unwrap().unwrap();
    attempt.commit().unwrap();
    assert_eq!(engine.pending_at_or_below(unit, Priority::SYNC).unwrap(), 0);
    assert_eq!(engine.pending_at_or_below(unit, Priority::LOW).unwrap(), 1);

    assert_eq!(engine.flush_at_or_below(Priority::SYNC).unwrap(), 0);
    assert_eq!(engine.flush_at_or_below(Priority::LOW).unwrap(), 1);
    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("a", "a"), ("b", "b")]));
}

#[test]
fn enqueue_through_an_engine_handle_while_folding() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());
    let handle = engine.clone();
    let once = Arc::new(std::sync::atomic::AtomicBool::new(false));

    engine.enqueue(
        unit,
        Payload::updater(move |_, ctx| {
            if !once.swap(true, std::sync::atomic::Ordering::SeqCst) {
                handle.enqueue(ctx.unit(), obj(&[("side", "s")]), MergeMode::Merge, Priority::TASK, None);
            }
            Ok(obj(&[("main", "m")]))
        }),
        MergeMode::Merge,
        Priority::TASK,
        None,
    );

    let report = engine.flush_report(Priority::TASK).unwrap();
    assert_eq!(report.commits, 2);
    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("main", "m"), ("side", "s")]));
}

#[test]
fn scheduled_update_for_a_destroyed_unit_is_dropped() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());
    let handle = engine.clone();
    engine.enqueue(
        unit,
        Payload::updater(move |_, ctx| {
            handle.destroy_unit(ctx.unit());
            ctx.enqueue(obj(&[("b", "b")]), MergeMode::Merge);
            Ok(obj(&[("a", "a")]))
        }),
        MergeMode::Merge,
        Priority::TASK,
        None,
    );

    assert_eq!(engine.flush_at_or_below(Priority::TASK).unwrap(), 0);
    assert!(!engine.contains_unit(unit));
    assert_eq!(engine.metrics().pending, 0);
}

#[test]
fn submit_from_a_payload_ignores_the_ambient_priority() {
    init_tracing();
    let arbiter = Arc::new(ScopedPriority::new(Priority::LOW));
    let engine = Engine::builder()
        .arbiter(Arc::clone(&arbiter))
        .warn_on_reentrant_enqueue(false)
        .build()
        .unwrap();
    let unit = engine.create_unit(Value::object());

    let handle = engine.clone();
    let scoped = Arc::clone(&arbiter);
    let assigned = Arc::new(parking_lot::Mutex::new(None));
    let assigned_in_payload = Arc::clone(&assigned);
    engine.enqueue(
        unit,
        Payload::updater(move |_, ctx| {
            if assigned_in_payload.lock().is_none() {
                let priority = scoped.with_priority(Priority::SYNC, || {
                    handle.submit(ctx.unit(), obj(&[("b", "b")]), None)
                });
                *assigned_in_payload.lock() = Some(priority);
            }
            Ok(obj(&[("a", "a")]))
        }),
        MergeMode::Merge,
        Priority::LOW,
        None,
    );
    engine.enqueue(unit, obj(&[("c", "c")]), MergeMode::Merge, Priority::LOW, None);

    let mut attempt = engine.begin_fold(unit, Priority::LOW).unwrap().unwrap();
    assert!(matches!(attempt.step().unwrap(), Step::Evaluated { remaining: 1, .. }));
    assert_eq!(*assigned.lock(), Some(Priority::LOW));
    assert_eq!(engine.pending_at_or_below(unit, Priority::SYNC).unwrap(), 0);

    // the fold was not preempted by its own update
    assert!(matches!(attempt.step().unwrap(), Step::Evaluated { remaining: 0, .. }));
    let outcome = attempt.commit().unwrap();
    assert_eq!(outcome.committed().unwrap().records, 2);
    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("a", "a"), ("c", "c")]));

    // outside any fold the scope applies again
    assert_eq!(
        arbiter.with_priority(Priority::SYNC, || engine.submit(unit, obj(&[("d", "d")]), None)),
        Priority::SYNC
    );
    assert_eq!(engine.flush_at_or_below(Priority::LOW).unwrap(), 1);
    assert_eq!(
        engine.current_state(unit).unwrap(),
        obj(&[("a", "a"), ("b", "b"), ("c", "c"), ("d", "d")])
    );
}
