//! Shared test fixtures: scripted evaluators and a wired-up engine.

use async_trait::async_trait;
use nbrequire::comm::{channel_pair, ControlEnd, Messenger};
use nbrequire::config::EngineConfig;
use nbrequire::engine::RequireEngine;
use nbrequire::error::ScriptError;
use nbrequire::loader::{ModuleHandle, StaticLoader};
use nbrequire::output::Anchor;
use nbrequire::sandbox::ScriptExecutor;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Evaluator that renders the script source into the anchor and counts
/// invocations.
pub struct EchoExecutor {
    pub invocations: AtomicUsize,
}

impl EchoExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            invocations: AtomicUsize::new(0),
        })
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptExecutor for EchoExecutor {
    async fn evaluate(
        &self,
        source: &str,
        _names: &[String],
        values: &[ModuleHandle],
        anchor: &Anchor,
    ) -> Result<Value, ScriptError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        anchor.set_html(format!("<pre>{source} [{} modules]</pre>", values.len()));
        Ok(Value::Null)
    }
}

/// Evaluator that fails synchronously, as a malformed script would.
pub struct ThrowingExecutor;

#[async_trait]
impl ScriptExecutor for ThrowingExecutor {
    async fn evaluate(
        &self,
        _source: &str,
        _names: &[String],
        _values: &[ModuleHandle],
        _anchor: &Anchor,
    ) -> Result<Value, ScriptError> {
        Err(ScriptError::with_traceback(
            "ReferenceError: boom is not defined",
            vec!["at <user script>:1:1".to_string()],
        ))
    }
}

pub struct TestHarness {
    pub engine: RequireEngine,
    pub loader: Arc<StaticLoader>,
    pub executor: Arc<EchoExecutor>,
    pub control: ControlEnd,
}

/// Build an engine around a static loader, an echo evaluator, and an
/// in-process communicate channel.
pub fn harness() -> TestHarness {
    let config = EngineConfig::default();
    let loader = Arc::new(StaticLoader::new());
    let executor = EchoExecutor::new();
    let (comm, control) = channel_pair("communicate");
    let messenger = Arc::new(Messenger::new(Arc::new(comm), config.channel_timeout()));

    let engine = RequireEngine::new(
        &config,
        loader.clone(),
        executor.clone(),
        Some(messenger),
    );

    TestHarness {
        engine,
        loader,
        executor,
        control,
    }
}
