//! Execution sandbox.
//!
//! Wraps arbitrary user script text plus a declared parameter list into a
//! callable unit, gates it on the cell's required modules, and invokes it
//! with the resolved handles plus a private anchor element. The concrete
//! evaluation strategy lives behind the [`ScriptExecutor`] capability so it
//! can be swapped (embedded interpreter, subprocess, restricted VM) and
//! tested in isolation.

use crate::error::{ExecutionError, RequireError, ScriptError};
use crate::events::{Observers, OutputAdded};
use crate::gate::DependencyGate;
use crate::loader::{ModuleHandle, ModuleLoader};
use crate::notebook::Notebook;
use crate::output::{Anchor, CellOutput, ErrorOutput, OutputContext, OutputRecord, ReplayFn};
use crate::poll::bounded_future;
use crate::types::{CellId, ModuleId};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Characters stripped from user-supplied parameter names.
const UNSAFE_CHARS: &[char] = &[
    '|', '&', '$', '%', '@', '"', '<', '>', '(', ')', '+', '-', '.', ',', ';',
];

/// Name of the fixed trailing parameter bound to the invocation's anchor.
pub const ANCHOR_PARAMETER: &str = "element";

/// Sanitize user parameter names: strip unsafe characters, drop names that
/// end up empty, then append the fixed anchor parameter.
pub fn sanitize_parameters(names: &[String]) -> Vec<String> {
    let mut sanitized: Vec<String> = names
        .iter()
        .map(|name| name.chars().filter(|c| !UNSAFE_CHARS.contains(c)).collect())
        .filter(|name: &String| !name.is_empty())
        .collect();
    sanitized.push(ANCHOR_PARAMETER.to_string());
    sanitized
}

/// Narrow evaluator boundary the sandbox depends on.
///
/// `names` and `values` are order-aligned; the final name is always the
/// anchor parameter, whose "value" is the anchor itself. The body is free to
/// suspend internally; the sandbox awaits completion under its own deadline.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn evaluate(
        &self,
        source: &str,
        names: &[String],
        values: &[ModuleHandle],
        anchor: &Anchor,
    ) -> Result<serde_json::Value, ScriptError>;
}

/// An execute request as delivered over the channel.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub script: String,
    pub required: Vec<ModuleId>,
    pub parameters: Vec<String>,
}

impl ExecutionRequest {
    pub fn unchecked(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            required: Vec::new(),
            parameters: Vec::new(),
        }
    }
}

pub struct ExecutionSandbox {
    loader: Arc<dyn ModuleLoader>,
    gate: Arc<DependencyGate>,
    executor: Arc<dyn ScriptExecutor>,
    notebook: Arc<Notebook>,
    execution_timeout: Duration,
    output_added: Observers<OutputAdded>,
}

impl ExecutionSandbox {
    pub fn new(
        loader: Arc<dyn ModuleLoader>,
        gate: Arc<DependencyGate>,
        executor: Arc<dyn ScriptExecutor>,
        notebook: Arc<Notebook>,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            loader,
            gate,
            executor,
            notebook,
            execution_timeout,
            output_added: Observers::new(),
        }
    }

    /// Register an observer for newly captured outputs.
    pub fn on_output_added(&self, f: impl Fn(&OutputAdded) + Send + Sync + 'static) {
        self.output_added.subscribe(f);
    }

    /// Gate on the request's modules, then invoke the script and capture its
    /// output on the cell. Failures are converted into an error record on
    /// the cell and also returned to the caller.
    pub async fn run(&self, request: ExecutionRequest, cell: CellId) -> Result<usize, ExecutionError> {
        self.notebook.set_running(cell, true);
        let result = self.run_gated(&request, cell).await;
        self.notebook.set_running(cell, false);

        match result {
            Ok(index) => Ok(index),
            Err(err) => {
                self.report(cell, &err);
                Err(err)
            }
        }
    }

    /// Restricted entry point for scripts that declare no requirements.
    /// Skips the dependency gate; still applies the execution timeout and
    /// output capture.
    pub async fn run_unchecked(
        &self,
        request: ExecutionRequest,
        cell: CellId,
    ) -> Result<usize, ExecutionError> {
        match self.invoke(&request.script, &[], &[], cell).await {
            Ok(index) => Ok(index),
            Err(err) => {
                self.report(cell, &err);
                Err(err)
            }
        }
    }

    async fn run_gated(
        &self,
        request: &ExecutionRequest,
        cell: CellId,
    ) -> Result<usize, ExecutionError> {
        match self.gate.resolve_all(Some(cell), &request.required).await {
            Ok(()) => {}
            Err(RequireError::UnresolvedDependencies(failed)) => {
                // The callable is never constructed on gate failure.
                return Err(ExecutionError::DependencyTimeout(failed));
            }
            Err(other) => {
                return Err(ScriptError::new(other.to_string()).into());
            }
        }

        // Handles order-aligned with the declared parameters.
        let mut handles = Vec::with_capacity(request.required.len());
        for id in &request.required {
            let handle = self.loader.resolve(id).ok_or_else(|| {
                ScriptError::new(format!("module '{id}' vanished after resolution"))
            })?;
            handles.push(handle);
        }

        let declared = if request.parameters.is_empty() {
            request
                .required
                .iter()
                .map(|id| id.as_str().to_string())
                .collect()
        } else {
            request.parameters.clone()
        };

        self.invoke(&request.script, &declared, &handles, cell).await
    }

    async fn invoke(
        &self,
        script: &str,
        declared_parameters: &[String],
        handles: &[ModuleHandle],
        cell: CellId,
    ) -> Result<usize, ExecutionError> {
        let names = sanitize_parameters(declared_parameters);
        let ctx = OutputContext::new(cell);

        debug!(cell = %cell, parameters = ?names, "invoking user script");

        let evaluation = self
            .executor
            .evaluate(script, &names, handles, &ctx.anchor);

        match bounded_future(evaluation, self.execution_timeout).await {
            Some(Ok(_value)) => {}
            Some(Err(script_err)) => return Err(script_err.into()),
            None => return Err(ExecutionError::ExecutionTimeout),
        }

        // Capture a live record whose replay re-invokes the evaluator with
        // the same script and bindings against a fresh context's anchor.
        let executor = Arc::clone(&self.executor);
        let script: Arc<str> = Arc::from(script);
        let replay_names = names.clone();
        let replay_handles = handles.to_vec();
        let replay: ReplayFn = Arc::new(move |fresh: OutputContext| {
            let executor = Arc::clone(&executor);
            let script = Arc::clone(&script);
            let names = replay_names.clone();
            let handles = replay_handles.clone();
            Box::pin(async move {
                executor
                    .evaluate(&script, &names, &handles, &fresh.anchor)
                    .await?;
                Ok(())
            })
        });

        let mut record = OutputRecord::live(replay, ctx.anchor.clone());
        record.mark_executed();

        let index = self
            .notebook
            .push_output(cell, CellOutput::DisplayData(record))
            .ok_or_else(|| ScriptError::new("cell was deleted during execution"))?;

        self.output_added.notify(&OutputAdded { cell, index });
        Ok(index)
    }

    /// Shared error-reporting path: append a structured error record to the
    /// originating cell. A vanished cell drops the report silently.
    fn report(&self, cell: CellId, err: &ExecutionError) {
        warn!(cell = %cell, error = %err, "execution failed");

        let error_output = match err {
            ExecutionError::Script(script_err) if !script_err.traceback.is_empty() => {
                ErrorOutput::with_traceback(
                    err.kind(),
                    script_err.message.clone(),
                    script_err.traceback.clone(),
                )
            }
            _ => ErrorOutput::with_traceback(
                err.kind(),
                err.to_string(),
                vec![format!("{}: {err}", ErrorOutput::ENAME)],
            ),
        };

        self.notebook.push_output(cell, CellOutput::Error(error_output));
    }
}
