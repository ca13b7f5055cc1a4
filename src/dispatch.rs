//! Channel dispatcher.
//!
//! Routes inbound named requests from the control process to the dependency
//! gate and execution sandbox. Every dispatched request that fails is caught
//! here and converted into a reported error; the dispatcher never propagates
//! an exception to its caller.

use crate::comm::Messenger;
use crate::error::RequireError;
use crate::events::{ConfigApplied, Observers};
use crate::gate::DependencyGate;
use crate::loader::{LoadConfiguration, ModuleLoader};
use crate::notebook::Notebook;
use crate::sandbox::{ExecutionRequest, ExecutionSandbox};
use crate::types::ModuleId;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Target names of the request channels.
pub const TARGET_CONFIG: &str = "config";
pub const TARGET_EXECUTE: &str = "execute";
pub const TARGET_SAFE_EXECUTE: &str = "safe_execute";

/// One inbound request message.
#[derive(Debug, Clone)]
pub struct CommMessage {
    pub target: String,
    pub data: Value,
}

impl CommMessage {
    pub fn new(target: impl Into<String>, data: Value) -> Self {
        Self {
            target: target.into(),
            data,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExecutePayload {
    script: String,
    #[serde(default)]
    require: Vec<ModuleId>,
    #[serde(default)]
    parameters: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SafeExecutePayload {
    script: String,
}

pub struct ChannelDispatcher {
    notebook: Arc<Notebook>,
    loader: Arc<dyn ModuleLoader>,
    gate: Arc<DependencyGate>,
    sandbox: Arc<ExecutionSandbox>,
    messenger: Option<Arc<Messenger>>,
    config_applied: Observers<ConfigApplied>,
}

impl ChannelDispatcher {
    pub fn new(
        notebook: Arc<Notebook>,
        loader: Arc<dyn ModuleLoader>,
        gate: Arc<DependencyGate>,
        sandbox: Arc<ExecutionSandbox>,
        messenger: Option<Arc<Messenger>>,
    ) -> Self {
        Self {
            notebook,
            loader,
            gate,
            sandbox,
            messenger,
            config_applied: Observers::new(),
        }
    }

    /// Register an observer for applied load configurations.
    pub fn on_config_applied(&self, f: impl Fn(&ConfigApplied) + Send + Sync + 'static) {
        self.config_applied.subscribe(f);
    }

    /// Announce to the control process that the request targets are live.
    /// Best-effort; an unreachable control process is logged and ignored.
    pub async fn announce_targets(&self) {
        let Some(messenger) = &self.messenger else {
            return;
        };
        messenger
            .notify_best_effort(
                "targets_registered",
                serde_json::json!({
                    "targets": [TARGET_CONFIG, TARGET_EXECUTE, TARGET_SAFE_EXECUTE],
                }),
            )
            .await;
    }

    /// Route one request. Failures are reported (logged, and already
    /// surfaced on the owning cell by the sandbox where one is implicated)
    /// and never returned.
    pub async fn dispatch(&self, message: CommMessage) {
        debug!(target = %message.target, "dispatching request");
        let target = message.target.clone();
        if let Err(err) = self.handle(message).await {
            error!(target = %target, error = %err, "request failed");
        }
    }

    /// Serve requests until the inbound stream closes.
    pub async fn serve(&self, mut requests: mpsc::UnboundedReceiver<CommMessage>) {
        while let Some(message) = requests.recv().await {
            self.dispatch(message).await;
        }
        info!("request stream closed");
    }

    async fn handle(&self, message: CommMessage) -> Result<(), RequireError> {
        match message.target.as_str() {
            TARGET_CONFIG => self.handle_config(message.data).await,
            TARGET_EXECUTE => self.handle_execute(message.data).await,
            TARGET_SAFE_EXECUTE => self.handle_safe_execute(message.data).await,
            other => {
                warn!(target = %other, "unknown request target");
                Ok(())
            }
        }
    }

    /// Register a load configuration and gate on all of its modules.
    /// Registration is wholesale replacement; the last dispatched
    /// configuration wins.
    async fn handle_config(&self, data: Value) -> Result<(), RequireError> {
        let config: LoadConfiguration =
            serde_json::from_value(data).map_err(|e| RequireError::Payload(e.to_string()))?;

        if config.is_empty() {
            debug!("no libraries to load");
            return Ok(());
        }

        info!(modules = ?config.module_ids(), "applying load configuration");
        self.notebook.set_config(config.clone());
        self.loader.configure(&config);

        let modules = config.module_ids();
        self.gate.resolve_all(None, &modules).await?;

        self.config_applied.notify(&ConfigApplied { modules });
        Ok(())
    }

    async fn handle_execute(&self, data: Value) -> Result<(), RequireError> {
        let payload: ExecutePayload =
            serde_json::from_value(data).map_err(|e| RequireError::Payload(e.to_string()))?;

        let cell = self.notebook.resolve_target()?;
        self.notebook
            .set_requirements(cell, payload.require.clone());

        let request = ExecutionRequest {
            script: payload.script,
            required: payload.require,
            parameters: payload.parameters,
        };

        // The sandbox has already appended an error record to the cell;
        // nothing further to surface here.
        self.sandbox.run(request, cell).await?;
        Ok(())
    }

    async fn handle_safe_execute(&self, data: Value) -> Result<(), RequireError> {
        let payload: SafeExecutePayload =
            serde_json::from_value(data).map_err(|e| RequireError::Payload(e.to_string()))?;

        let cell = self.notebook.resolve_target()?;
        self.sandbox
            .run_unchecked(ExecutionRequest::unchecked(payload.script), cell)
            .await?;
        Ok(())
    }
}

/// Builders for the JSON payloads the control process sends. These mirror
/// the styling/script injection helpers on the control side and are all
/// dispatched through `safe_execute`.
pub mod payloads {
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    fn attr_assignments(attrs: &BTreeMap<String, String>, var: &str) -> String {
        attrs
            .iter()
            .map(|(k, v)| format!("{var}.setAttribute('{k}', '{v}');"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Link an external stylesheet by href.
    pub fn link_css(href: &str, attrs: &BTreeMap<String, String>) -> Value {
        let script = format!(
            "let link = document.createElement('link');\n\
             link.rel = 'stylesheet';\n\
             link.type = 'text/css';\n\
             link.href = '{href}';\n\
             {attrs}\n\
             document.head.appendChild(link);",
            attrs = attr_assignments(attrs, "link"),
        );
        json!({ "script": script })
    }

    /// Inject an inline style element.
    pub fn load_css(style: &str, attrs: &BTreeMap<String, String>) -> Value {
        let script = format!(
            "let style = document.createElement('style');\n\
             style.type = 'text/css';\n\
             style.textContent = `{style}`;\n\
             {attrs}\n\
             document.head.appendChild(style);",
            attrs = attr_assignments(attrs, "style"),
        );
        json!({ "script": script })
    }

    /// Inject an inline script element.
    pub fn load_js(source: &str, attrs: &BTreeMap<String, String>) -> Value {
        let script = format!(
            "let script = document.createElement('script');\n\
             script.textContent = `{source}`;\n\
             {attrs}\n\
             document.head.appendChild(script);",
            attrs = attr_assignments(attrs, "script"),
        );
        json!({ "script": script })
    }
}
