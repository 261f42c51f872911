//! Commit order across and within priority tiers

use crate::common::*;
use surge::prelude::*;

#[test]
fn end_to_end_scenario() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());

    engine.enqueue(unit, obj(&[("a", "a")]), MergeMode::Merge, Priority::SYNC, None);
    engine.enqueue(unit, obj(&[("b", "b")]), MergeMode::Merge, Priority::LOW, None);
    engine.enqueue(unit, obj(&[("c", "c")]), MergeMode::Merge, Priority::LOW, None);

    assert_eq!(engine.flush_at_or_below(Priority::SYNC).unwrap(), 1);
    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("a", "a")]));
    assert_eq!(engine.pending_count(unit).unwrap(), 2);

    assert_eq!(engine.flush_at_or_below(Priority::LOW).unwrap(), 1);
    assert_eq!(
        engine.current_state(unit).unwrap(),
        obj(&[("a", "a"), ("b", "b"), ("c", "c")])
    );
    assert_eq!(engine.pending_count(unit).unwrap(), 0);
}

#[test]
fn immediate_tier_commits_alone_regardless_of_enqueue_order() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());

    engine.enqueue(unit, obj(&[("low1", "x")]), MergeMode::Merge, Priority::LOW, None);
    engine.enqueue(unit, obj(&[("low2", "x")]), MergeMode::Merge, Priority::OFFSCREEN, None);
    engine.enqueue(unit, obj(&[("sync", "x")]), MergeMode::Merge, Priority::SYNC, None);
    engine.enqueue(unit, obj(&[("low3", "x")]), MergeMode::Merge, Priority::TASK, None);

    engine.flush_at_or_below(Priority::SYNC).unwrap();
    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("sync", "x")]));
    assert_eq!(engine.pending_count(unit).unwrap(), 3);
}

#[test]
fn equal_priority_folds_in_enqueue_order() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());

    for item in ["1", "2", "3", "4"] {
        engine.enqueue(unit, append(item), MergeMode::Merge, Priority::TASK, None);
    }
    engine.flush_at_or_below(Priority::TASK).unwrap();

    assert_eq!(log_of(&engine.current_state(unit).unwrap()), vec!["1", "2", "3", "4"]);
}

#[test]
fn later_keys_overwrite_earlier_ones() {
    let engine = engine();
    let unit = engine.create_unit(obj(&[("keep", "base"), ("k", "0")]));

    engine.enqueue(unit, obj(&[("k", "1")]), MergeMode::Merge, Priority::TASK, None);
    engine.enqueue(unit, obj(&[("k", "2")]), MergeMode::Merge, Priority::TASK, None);
    engine.flush_at_or_below(Priority::TASK).unwrap();

    assert_eq!(
        engine.current_state(unit).unwrap(),
        obj(&[("keep", "base"), ("k", "2")])
    );
}

#[test]
fn urgent_records_fold_first_when_tiers_are_flushed_together() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());

    engine.enqueue(unit, append("low"), MergeMode::Merge, Priority::LOW, None);
    engine.enqueue(unit, append("sync"), MergeMode::Merge, Priority::SYNC, None);
    engine.enqueue(unit, append("task"), MergeMode::Merge, Priority::TASK, None);

    engine.flush_at_or_below(Priority::LOW).unwrap();
    assert_eq!(log_of(&engine.current_state(unit).unwrap()), vec!["sync", "task", "low"]);
}

#[test]
fn deferred_work_is_rebased_on_urgent_commits() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());

    engine.enqueue(unit, append("deferred"), MergeMode::Merge, Priority::LOW, None);
    engine.enqueue(unit, append("urgent"), MergeMode::Merge, Priority::SYNC, None);

    engine.flush_at_or_below(Priority::SYNC).unwrap();
    assert_eq!(log_of(&engine.current_state(unit).unwrap()), vec!["urgent"]);

    // the deferred updater now sees the urgent commit as its previous state
    engine.flush_at_or_below(Priority::LOW).unwrap();
    assert_eq!(log_of(&engine.current_state(unit).unwrap()), vec!["urgent", "deferred"]);
}

#[test]
fn deferred_work_waits_for_its_tier() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());
    engine.enqueue(unit, obj(&[("x", "1")]), MergeMode::Merge, Priority::OFFSCREEN, None);

    for threshold in [Priority::SYNC, Priority::TASK, Priority::ANIMATION, Priority::HIGH, Priority::LOW] {
        assert_eq!(engine.flush_at_or_below(threshold).unwrap(), 0);
        assert_eq!(engine.current_state(unit).unwrap(), Value::object());
    }

    assert_eq!(engine.flush_at_or_below(Priority::OFFSCREEN).unwrap(), 1);
    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("x", "1")]));
}

#[test]
fn flush_counts_distinct_units() {
    let engine = engine();
    let units: Vec<_> = (0..3).map(|_| engine.create_unit(Value::object())).collect();
    let idle = engine.create_unit(Value::object());

    for unit in &units {
        engine.enqueue(*unit, obj(&[("v", "1")]), MergeMode::Merge, Priority::TASK, None);
    }
    engine.enqueue(idle, obj(&[("v", "1")]), MergeMode::Merge, Priority::LOW, None);

    let report = engine.flush_report(Priority::TASK).unwrap();
    assert_eq!(report.committed_count(), 3);
    assert_eq!(report.commits, 3);
    assert!(report.is_clean());
    assert!(!report.yielded);
    assert_eq!(report.committed_units, units);
}

#[test]
fn submit_uses_the_arbiter() {
    let arbiter = std::sync::Arc::new(ScopedPriority::new(Priority::LOW));
    let engine = Engine::builder()
        .arbiter(std::sync::Arc::clone(&arbiter))
        .build()
        .unwrap();
    let unit = engine.create_unit(Value::object());

    assert_eq!(engine.submit(unit, obj(&[("a", "a")]), None), Priority::LOW);
    let assigned = arbiter.with_priority(Priority::SYNC, || {
        engine.submit_replace(unit, obj(&[("b", "b")]), None)
    });
    assert_eq!(assigned, Priority::SYNC);

    engine.flush_at_or_below(Priority::SYNC).unwrap();
    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("b", "b")]));
    engine.flush_at_or_below(Priority::LOW).unwrap();
    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("a", "a"), ("b", "b")]));
}

#[test]
fn default_arbiter_uses_configured_priority() {
    let engine = Engine::builder().default_priority(Priority::HIGH).build().unwrap();
    let unit = engine.create_unit(Value::object());
    assert_eq!(engine.submit(unit, obj(&[("a", "a")]), None), Priority::HIGH);
    assert_eq!(engine.pending_at_or_below(unit, Priority::ANIMATION).unwrap(), 0);
    assert_eq!(engine.pending_at_or_below(unit, Priority::HIGH).unwrap(), 1);
}
