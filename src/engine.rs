//! Engine facade.
//!
//! Wires the loader, gate, sandbox, lifecycle manager and dispatcher
//! together from one [`EngineConfig`]. Hosts construct this once per open
//! document and drive it from their event loop.

use crate::comm::Messenger;
use crate::config::EngineConfig;
use crate::dispatch::ChannelDispatcher;
use crate::gate::DependencyGate;
use crate::lifecycle::OutputLifecycleManager;
use crate::loader::ModuleLoader;
use crate::notebook::{Notebook, PersistedNotebook};
use crate::sandbox::{ExecutionSandbox, ScriptExecutor};
use crate::types::now_millis;
use serde_json::json;
use std::sync::Arc;

pub struct RequireEngine {
    notebook: Arc<Notebook>,
    gate: Arc<DependencyGate>,
    sandbox: Arc<ExecutionSandbox>,
    lifecycle: Arc<OutputLifecycleManager>,
    dispatcher: Arc<ChannelDispatcher>,
    messenger: Option<Arc<Messenger>>,
}

impl RequireEngine {
    pub fn new(
        config: &EngineConfig,
        loader: Arc<dyn ModuleLoader>,
        executor: Arc<dyn ScriptExecutor>,
        messenger: Option<Arc<Messenger>>,
    ) -> Self {
        Self::with_notebook(config, loader, executor, messenger, Arc::new(Notebook::new()))
    }

    /// Open an engine over a persisted document.
    pub fn open(
        config: &EngineConfig,
        loader: Arc<dyn ModuleLoader>,
        executor: Arc<dyn ScriptExecutor>,
        messenger: Option<Arc<Messenger>>,
        document: PersistedNotebook,
    ) -> Self {
        let notebook = Arc::new(Notebook::from_document(document));
        Self::with_notebook(config, loader, executor, messenger, notebook)
    }

    fn with_notebook(
        config: &EngineConfig,
        loader: Arc<dyn ModuleLoader>,
        executor: Arc<dyn ScriptExecutor>,
        messenger: Option<Arc<Messenger>>,
        notebook: Arc<Notebook>,
    ) -> Self {
        let gate = Arc::new(DependencyGate::new(Arc::clone(&loader), config));
        let sandbox = Arc::new(ExecutionSandbox::new(
            Arc::clone(&loader),
            Arc::clone(&gate),
            executor,
            Arc::clone(&notebook),
            config.execution_timeout(),
        ));
        let lifecycle = Arc::new(OutputLifecycleManager::new(
            Arc::clone(&notebook),
            Arc::clone(&gate),
        ));
        let dispatcher = Arc::new(ChannelDispatcher::new(
            Arc::clone(&notebook),
            loader,
            Arc::clone(&gate),
            Arc::clone(&sandbox),
            messenger.clone(),
        ));

        Self {
            notebook,
            gate,
            sandbox,
            lifecycle,
            dispatcher,
            messenger,
        }
    }

    /// Announce the engine to the control process and apply any load
    /// configuration persisted on the notebook, then restore existing
    /// outputs. Invoked once after open.
    pub async fn start(&self) {
        if let Some(messenger) = &self.messenger {
            messenger
                .notify_best_effort("extension_loaded", json!({ "timestamp": now_millis() }))
                .await;
        }
        self.dispatcher.announce_targets().await;

        if let Some(config) = self.notebook.config() {
            if !config.is_empty() {
                // Configuration persisted by the previous session; gate over
                // it so restored cells find their modules.
                if let Ok(value) = serde_json::to_value(&config) {
                    let message = crate::dispatch::CommMessage::new(
                        crate::dispatch::TARGET_CONFIG,
                        value,
                    );
                    self.dispatcher.dispatch(message).await;
                }
            }
        }

        self.lifecycle.restore_all().await;
    }

    pub fn notebook(&self) -> &Arc<Notebook> {
        &self.notebook
    }

    pub fn gate(&self) -> &Arc<DependencyGate> {
        &self.gate
    }

    pub fn sandbox(&self) -> &Arc<ExecutionSandbox> {
        &self.sandbox
    }

    pub fn lifecycle(&self) -> &Arc<OutputLifecycleManager> {
        &self.lifecycle
    }

    pub fn dispatcher(&self) -> &Arc<ChannelDispatcher> {
        &self.dispatcher
    }
}
