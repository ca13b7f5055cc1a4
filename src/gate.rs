//! Dependency gate.
//!
//! Fans out one readiness poller per required module and aggregates into a
//! single all-or-nothing outcome. Partial success is not acceptable for
//! gating execution: the downstream script may reference any subset of its
//! declared dependencies, so one timed-out module fails the whole gate.

use crate::config::EngineConfig;
use crate::error::RequireError;
use crate::events::{Observers, RequireSatisfied};
use crate::loader::ModuleLoader;
use crate::poll::{await_module, PollerGauge};
use crate::types::{CellId, ModuleId};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct DependencyGate {
    loader: Arc<dyn ModuleLoader>,
    poll_interval: Duration,
    resolve_timeout: Duration,
    gauge: PollerGauge,
    satisfied: Observers<RequireSatisfied>,
}

impl DependencyGate {
    pub fn new(loader: Arc<dyn ModuleLoader>, config: &EngineConfig) -> Self {
        Self {
            loader,
            poll_interval: config.poll_interval(),
            resolve_timeout: config.resolve_timeout(),
            gauge: PollerGauge::new(),
            satisfied: Observers::new(),
        }
    }

    /// Gauge of pollers currently in flight. Zero whenever no gate is
    /// mid-resolution.
    pub fn gauge(&self) -> &PollerGauge {
        &self.gauge
    }

    /// Register an observer for satisfied requirement sets.
    pub fn on_satisfied(&self, f: impl Fn(&RequireSatisfied) + Send + Sync + 'static) {
        self.satisfied.subscribe(f);
    }

    /// Wait until every identifier is resolvable, or fail with the subset
    /// that timed out.
    ///
    /// Duplicate identifiers are resolved once; a repeated entry never
    /// registers a second poller. An empty sequence resolves immediately
    /// with no event and no pollers.
    pub async fn resolve_all(
        &self,
        cell: Option<CellId>,
        required: &[ModuleId],
    ) -> Result<(), RequireError> {
        if required.is_empty() {
            return Ok(());
        }

        let mut seen = HashSet::new();
        let distinct: Vec<&ModuleId> = required
            .iter()
            .filter(|id| seen.insert((*id).clone()))
            .collect();

        debug!(
            cell = ?cell,
            modules = ?distinct,
            "gating on required modules"
        );

        let polls = distinct.iter().map(|id| {
            await_module(
                self.loader.as_ref(),
                id,
                self.poll_interval,
                self.resolve_timeout,
                &self.gauge,
            )
        });

        let outcomes = join_all(polls).await;

        let failed: Vec<ModuleId> = outcomes
            .iter()
            .filter(|o| !o.is_resolved())
            .map(|o| o.module_id().clone())
            .collect();

        if !failed.is_empty() {
            warn!(cell = ?cell, failed = ?failed, "unresolved dependencies");
            return Err(RequireError::UnresolvedDependencies(failed));
        }

        self.satisfied.notify(&RequireSatisfied {
            cell,
            required: required.to_vec(),
        });

        Ok(())
    }
}
