//! End-to-end execute / safe_execute request flows.

use super::test_utils::{harness, ThrowingExecutor};
use nbrequire::comm::{channel_pair, Messenger};
use nbrequire::config::EngineConfig;
use nbrequire::dispatch::{CommMessage, TARGET_EXECUTE, TARGET_SAFE_EXECUTE};
use nbrequire::engine::RequireEngine;
use nbrequire::error::ExecutionErrorKind;
use nbrequire::loader::StaticLoader;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// Concrete scenario: execute requiring a module that never resolves gains
// exactly one dependency_timeout error record and never invokes the script.
#[tokio::test(start_paused = true)]
async fn unresolvable_requirement_yields_one_error_record_and_no_invocation() {
    let h = harness();
    let cell = h.engine.notebook().add_code_cell();
    h.engine.notebook().select(cell);

    h.engine
        .dispatcher()
        .dispatch(CommMessage::new(
            TARGET_EXECUTE,
            json!({ "script": "return 1+1", "require": ["bar"] }),
        ))
        .await;

    let outputs = h.engine.notebook().outputs(cell).unwrap();
    assert_eq!(outputs.len(), 1);
    let error = outputs[0].as_error().unwrap();
    assert_eq!(error.kind, ExecutionErrorKind::DependencyTimeout);
    assert_eq!(error.ename, "RequireError");
    assert_eq!(h.executor.invocation_count(), 0);
}

// Concrete scenario: safe_execute with a synchronously throwing script
// produces exactly one script_error record; the gate is never consulted.
#[tokio::test(start_paused = true)]
async fn throwing_safe_execute_yields_one_script_error_record() {
    let config = EngineConfig::default();
    let loader = Arc::new(StaticLoader::new());
    let (comm, _control) = channel_pair("communicate");
    let messenger = Arc::new(Messenger::new(Arc::new(comm), config.channel_timeout()));
    let engine = RequireEngine::new(
        &config,
        loader,
        Arc::new(ThrowingExecutor),
        Some(messenger),
    );

    let cell = engine.notebook().add_code_cell();
    engine.notebook().select(cell);

    engine
        .dispatcher()
        .dispatch(CommMessage::new(
            TARGET_SAFE_EXECUTE,
            json!({ "script": "boom()" }),
        ))
        .await;

    let outputs = engine.notebook().outputs(cell).unwrap();
    assert_eq!(outputs.len(), 1);
    let error = outputs[0].as_error().unwrap();
    assert_eq!(error.kind, ExecutionErrorKind::ScriptError);
    assert!(!error.traceback.is_empty());
    // nothing polled, so no poller can be in flight
    assert_eq!(engine.gate().gauge().active(), 0);
}

#[tokio::test(start_paused = true)]
async fn successful_execute_captures_a_live_output() {
    let h = harness();
    h.loader
        .define_after("d3", Duration::from_millis(250), json!({ "version": 5 }));
    let cell = h.engine.notebook().add_code_cell();
    h.engine.notebook().select(cell);

    h.engine
        .dispatcher()
        .dispatch(CommMessage::new(
            TARGET_EXECUTE,
            json!({
                "script": "element.append(d3.select('svg'))",
                "require": ["d3"],
                "parameters": ["d3"],
            }),
        ))
        .await;

    let outputs = h.engine.notebook().outputs(cell).unwrap();
    assert_eq!(outputs.len(), 1);
    let record = outputs[0].as_record().unwrap();
    assert!(record.executed());
    assert!(record.has_executable());
    assert_eq!(h.executor.invocation_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn dispatcher_serves_a_request_stream_without_propagating_failures() {
    let h = harness();
    h.loader.define("three", json!({}));
    let cell = h.engine.notebook().add_code_cell();
    h.engine.notebook().select(cell);

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    tx.send(CommMessage::new(
        TARGET_EXECUTE,
        json!({ "script": "scene()", "require": ["three"] }),
    ))
    .unwrap();
    // malformed payload must be swallowed at the boundary
    tx.send(CommMessage::new(TARGET_EXECUTE, json!({ "bogus": true })))
        .unwrap();
    tx.send(CommMessage::new(
        TARGET_SAFE_EXECUTE,
        json!({ "script": "styles()" }),
    ))
    .unwrap();
    drop(tx);

    h.engine.dispatcher().serve(rx).await;

    let outputs = h.engine.notebook().outputs(cell).unwrap();
    assert_eq!(outputs.len(), 2);
    assert!(outputs.iter().all(|o| o.as_record().is_some()));
}

#[tokio::test(start_paused = true)]
async fn execution_timeout_is_independent_from_the_dependency_timeout() {
    use async_trait::async_trait;
    use nbrequire::error::ScriptError;
    use nbrequire::loader::ModuleHandle;
    use nbrequire::output::Anchor;
    use nbrequire::sandbox::{ExecutionRequest, ScriptExecutor};

    struct SlowExecutor;

    #[async_trait]
    impl ScriptExecutor for SlowExecutor {
        async fn evaluate(
            &self,
            _source: &str,
            _names: &[String],
            _values: &[ModuleHandle],
            _anchor: &Anchor,
        ) -> Result<serde_json::Value, ScriptError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(serde_json::Value::Null)
        }
    }

    let config = EngineConfig {
        execution_timeout_ms: 1_000,
        ..Default::default()
    };
    let loader = Arc::new(StaticLoader::new());
    loader.define("d3", json!({}));
    let engine = RequireEngine::new(&config, loader, Arc::new(SlowExecutor), None);

    let cell = engine.notebook().add_code_cell();
    let err = engine
        .sandbox()
        .run(
            ExecutionRequest {
                script: "spin()".to_string(),
                required: vec!["d3".into()],
                parameters: vec![],
            },
            cell,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ExecutionErrorKind::ExecutionTimeout);
    let outputs = engine.notebook().outputs(cell).unwrap();
    assert_eq!(
        outputs[0].as_error().unwrap().kind,
        ExecutionErrorKind::ExecutionTimeout
    );
}
