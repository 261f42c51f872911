//! REPLACE semantics

use crate::common::*;
use surge::prelude::*;

#[test]
fn replace_supersedes_earlier_merges() {
    let engine = engine();
    let unit = engine.create_unit(Value::object());

    engine.enqueue(unit, obj(&[("a", "a")]), MergeMode::Merge, Priority::TASK, None);
    engine.enqueue(unit, obj(&[("b", "b")]), MergeMode::Merge, Priority::TASK, None);
    engine.enqueue_replace(unit, obj(&[("c", "c")]), Priority::TASK, None);
    engine.flush_at_or_below(Priority::TASK).unwrap();

    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("c", "c")]));
}

#[test]
fn replace_discards_base_state() {
    let engine = engine();
    let unit = engine.create_unit(obj(&[("old", "x")]));

    engine.enqueue_replace(unit, obj(&[("new", "y")]), Priority::SYNC, None);
    let outcome = engine.run_to_completion_or_preemption(unit, Priority::SYNC).unwrap();

    assert!(outcome.committed().unwrap().fully_replaced);
    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("new", "y")]));
}

#[test]
fn merges_after_replace_build_on_it() {
    let engine = engine();
    let unit = engine.create_unit(obj(&[("old", "x")]));

    engine.enqueue_replace(unit, obj(&[("a", "a")]), Priority::TASK, None);
    engine.enqueue(unit, obj(&[("b", "b")]), MergeMode::Merge, Priority::TASK, None);
    engine.flush_at_or_below(Priority::TASK).unwrap();

    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("a", "a"), ("b", "b")]));
}

#[test]
fn replace_updater_sees_accumulated_state() {
    let engine = engine();
    let unit = engine.create_unit(Value::from_pairs([("count", 1)]));

    engine.enqueue(unit, Value::from_pairs([("count", 5)]), MergeMode::Merge, Priority::TASK, None);
    engine.enqueue_replace(
        unit,
        Payload::updater(|prev, _| {
            let count = prev.get("count").and_then(Value::as_int).unwrap_or(0);
            Ok(Value::from_pairs([("doubled", count * 2)]))
        }),
        Priority::TASK,
        None,
    );
    engine.flush_at_or_below(Priority::TASK).unwrap();

    assert_eq!(engine.current_state(unit).unwrap(), Value::from_pairs([("doubled", 10)]));
}

#[test]
fn deferred_replace_is_not_applied_by_an_urgent_flush() {
    let engine = engine();
    let unit = engine.create_unit(obj(&[("base", "x")]));

    engine.enqueue_replace(unit, obj(&[("replaced", "y")]), Priority::LOW, None);
    engine.enqueue(unit, obj(&[("urgent", "z")]), MergeMode::Merge, Priority::SYNC, None);

    engine.flush_at_or_below(Priority::SYNC).unwrap();
    assert_eq!(
        engine.current_state(unit).unwrap(),
        obj(&[("base", "x"), ("urgent", "z")])
    );
    assert_eq!(engine.pending_count(unit).unwrap(), 1);

    engine.flush_at_or_below(Priority::LOW).unwrap();
    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("replaced", "y")]));
}

#[test]
fn superseded_replace_still_fires_its_callback() {
    let engine = engine();
    let log = EventLog::new();
    let unit = engine.create_unit(Value::object());

    engine.enqueue_replace(unit, obj(&[("first", "1")]), Priority::TASK, Some(log.callback("first")));
    engine.enqueue_replace(unit, obj(&[("second", "2")]), Priority::TASK, Some(log.callback("second")));
    engine.flush_at_or_below(Priority::TASK).unwrap();

    assert_eq!(engine.current_state(unit).unwrap(), obj(&[("second", "2")]));
    assert_eq!(log.events(), vec!["first", "second"]);
}
