//! Freeze, finalize, persist, and restore across a simulated reload.

use super::test_utils::harness;
use nbrequire::dispatch::{CommMessage, TARGET_EXECUTE};
use nbrequire::notebook::PersistedNotebook;
use nbrequire::types::ModuleId;
use serde_json::json;
use std::time::Duration;

async fn execute_on_selected(h: &super::test_utils::TestHarness, script: &str) {
    h.engine
        .dispatcher()
        .dispatch(CommMessage::new(
            TARGET_EXECUTE,
            json!({ "script": script, "require": ["d3"] }),
        ))
        .await;
}

// Concrete scenario: a cell with two live records undergoes freeze_all;
// afterward both are frozen and neither retains an invokable closure.
#[tokio::test(start_paused = true)]
async fn freeze_all_leaves_no_executable_payload_behind() {
    let h = harness();
    h.loader.define("d3", json!({}));
    let cell = h.engine.notebook().add_code_cell();
    h.engine.notebook().select(cell);

    execute_on_selected(&h, "first()").await;
    execute_on_selected(&h, "second()").await;

    let frozen = h.engine.lifecycle().freeze_all();
    assert_eq!(frozen, 2);

    for output in h.engine.notebook().outputs(cell).unwrap() {
        let record = output.as_record().unwrap();
        assert!(record.is_frozen());
        assert!(!record.has_executable());
    }
}

#[tokio::test(start_paused = true)]
async fn finalize_survives_a_dead_control_connection() {
    let h = harness();
    h.loader.define("d3", json!({}));
    let cell = h.engine.notebook().add_code_cell();
    h.engine.notebook().select(cell);
    execute_on_selected(&h, "plot()").await;

    // control process is gone; finalization is purely local
    drop(h.control);
    h.engine.notebook().set_trusted(true);

    let stamp = h.engine.lifecycle().finalize_all();
    assert!(stamp.trusted);
    assert_eq!(h.engine.notebook().save_count(), 1);
    assert!(h.engine.notebook().finalized().is_some());
}

#[tokio::test(start_paused = true)]
async fn frozen_outputs_round_trip_through_the_persisted_document() {
    let h = harness();
    h.loader.define("d3", json!({}));
    let cell = h.engine.notebook().add_code_cell();
    h.engine.notebook().select(cell);
    execute_on_selected(&h, "chart()").await;

    let markup_before = h.engine.notebook().outputs(cell).unwrap()[0]
        .as_record()
        .unwrap()
        .current_html()
        .unwrap();

    h.engine.lifecycle().finalize_all();
    let json_doc = serde_json::to_string(&h.engine.notebook().to_document()).unwrap();

    // simulated reload on a fresh harness whose loader has nothing defined
    let h2 = harness();
    let doc: PersistedNotebook = serde_json::from_str(&json_doc).unwrap();
    let restored = nbrequire::notebook::Notebook::from_document(doc);
    let restored_cell = restored.cell_ids()[0];

    let lifecycle = nbrequire::lifecycle::OutputLifecycleManager::new(
        std::sync::Arc::new(restored),
        std::sync::Arc::clone(h2.engine.gate()),
    );
    let rendered = lifecycle.restore_all().await;

    assert_eq!(
        rendered.get(&restored_cell).map(String::as_str),
        Some(markup_before.as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn restore_rechecks_requirements_without_failing_the_restore() {
    let h = harness();
    h.loader.define("d3", json!({}));
    let cell = h.engine.notebook().add_code_cell();
    h.engine.notebook().select(cell);
    execute_on_selected(&h, "chart()").await;
    h.engine.lifecycle().freeze_all();

    // `d3` is still defined, so the fire-and-forget recheck settles cleanly;
    // restore itself must succeed either way.
    let rendered = h.engine.lifecycle().restore_all().await;
    assert!(rendered.contains_key(&cell));
    assert_eq!(
        h.engine.notebook().requirements(cell).unwrap(),
        vec![ModuleId::from("d3")]
    );

    // allow the spawned recheck to settle and its pollers to unwind
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.engine.gate().gauge().active(), 0);
}

#[tokio::test(start_paused = true)]
async fn engine_start_restores_persisted_config_and_outputs() {
    let h = harness();
    h.loader.define("d3", json!({}));
    let cell = h.engine.notebook().add_code_cell();
    h.engine.notebook().select(cell);
    h.engine
        .dispatcher()
        .dispatch(CommMessage::new(
            nbrequire::dispatch::TARGET_CONFIG,
            json!({ "paths": { "d3": "https://cdn/d3" } }),
        ))
        .await;
    execute_on_selected(&h, "chart()").await;
    h.engine.lifecycle().finalize_all();

    let doc = h.engine.notebook().to_document();

    // reopen with a loader that still serves d3
    let h2 = harness();
    h2.loader.define("d3", json!({}));
    let engine = nbrequire::engine::RequireEngine::open(
        &nbrequire::config::EngineConfig::default(),
        h2.loader.clone(),
        h2.executor.clone(),
        None,
        doc,
    );
    engine.start().await;

    let cells = engine.notebook().cell_ids();
    assert_eq!(cells.len(), 1);
    let outputs = engine.notebook().outputs(cells[0]).unwrap();
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].as_record().unwrap().is_frozen());
    // the persisted configuration was re-registered with the loader
    assert_eq!(h2.loader.registered_configs().len(), 1);
}
