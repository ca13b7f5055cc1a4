//! Gate settlement scenarios with a paused clock.

use super::test_utils::harness;
use nbrequire::dispatch::{CommMessage, TARGET_CONFIG};
use nbrequire::error::RequireError;
use nbrequire::types::ModuleId;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn gate_succeeds_iff_every_module_resolves_in_time() {
    let h = harness();
    h.loader.define("a", json!({}));
    h.loader.define_after("b", Duration::from_millis(1_200), json!({}));

    h.engine
        .gate()
        .resolve_all(None, &["a".into(), "b".into()])
        .await
        .unwrap();

    // add one identifier that never resolves
    let err = h
        .engine
        .gate()
        .resolve_all(None, &["a".into(), "b".into(), "missing".into()])
        .await
        .unwrap_err();

    match err {
        RequireError::UnresolvedDependencies(failed) => {
            assert_eq!(failed, vec![ModuleId::from("missing")]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn empty_requirement_set_settles_with_no_event_and_no_timers() {
    let h = harness();
    let events = Arc::new(AtomicUsize::new(0));
    {
        let events = Arc::clone(&events);
        h.engine.gate().on_satisfied(move |_| {
            events.fetch_add(1, Ordering::SeqCst);
        });
    }

    h.engine.gate().resolve_all(None, &[]).await.unwrap();

    assert_eq!(events.load(Ordering::SeqCst), 0);
    assert_eq!(h.engine.gate().gauge().active(), 0);
}

#[tokio::test(start_paused = true)]
async fn no_poller_remains_after_settlement() {
    let h = harness();
    h.loader.define_after("late", Duration::from_millis(900), json!({}));

    h.engine
        .gate()
        .resolve_all(None, &["late".into()])
        .await
        .unwrap();
    assert_eq!(h.engine.gate().gauge().active(), 0);

    let _ = h
        .engine
        .gate()
        .resolve_all(None, &["never".into()])
        .await
        .unwrap_err();
    assert_eq!(h.engine.gate().gauge().active(), 0);
}

// Concrete scenario: config with foo resolvable after 300 ms settles before
// the default timeout and fires config_applied exactly once.
#[tokio::test(start_paused = true)]
async fn config_with_late_module_applies_exactly_once() {
    let h = harness();
    h.loader
        .define_after("foo", Duration::from_millis(300), json!({}));

    let applied = Arc::new(AtomicUsize::new(0));
    {
        let applied = Arc::clone(&applied);
        h.engine.dispatcher().on_config_applied(move |event| {
            assert_eq!(event.modules, vec![ModuleId::from("foo")]);
            applied.fetch_add(1, Ordering::SeqCst);
        });
    }

    h.engine
        .dispatcher()
        .dispatch(CommMessage::new(
            TARGET_CONFIG,
            json!({ "paths": { "foo": "/libs/foo.js" } }),
        ))
        .await;

    assert_eq!(applied.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.engine.notebook().config().unwrap().module_ids(),
        vec![ModuleId::from("foo")]
    );
    assert_eq!(h.engine.gate().gauge().active(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_gates_for_different_cells_are_independent() {
    let h = harness();
    h.loader
        .define_after("fast", Duration::from_millis(100), json!({}));
    h.loader
        .define_after("slow", Duration::from_millis(2_000), json!({}));

    let gate = h.engine.gate();
    let fast_set = [ModuleId::from("fast")];
    let slow_set = [ModuleId::from("slow")];
    let (fast, slow) = tokio::join!(
        gate.resolve_all(None, &fast_set),
        gate.resolve_all(None, &slow_set),
    );

    fast.unwrap();
    slow.unwrap();
    assert_eq!(gate.gauge().active(), 0);
}
