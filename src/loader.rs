//! Module loader interface.
//!
//! The engine never fetches scripts itself; the host supplies a
//! [`ModuleLoader`] capability. The loader owns the namespace of defined
//! modules, and the engine only asks three things of it: register a
//! [`LoadConfiguration`], kick off a best-effort fetch, and answer whether an
//! identifier is currently resolvable.

use crate::types::ModuleId;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::time::{Duration, Instant};

/// Opaque handle to a resolved module, passed to user scripts as an argument.
pub type ModuleHandle = serde_json::Value;

/// Mapping of module identifiers to source locators, plus loader options.
///
/// Owned by notebook-level metadata under the `require` key. A new
/// configuration fully supersedes the old one for the identifiers it lists;
/// registration is wholesale replacement, never a field-by-field merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadConfiguration {
    /// Identifier → URL/path, without file extension.
    #[serde(default)]
    pub paths: BTreeMap<ModuleId, String>,

    /// Shim declarations for modules that do not register themselves.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub shim: BTreeMap<ModuleId, Vec<ModuleId>>,

    /// Cache-busting query appended to every locator.
    #[serde(default, rename = "urlArgs", skip_serializing_if = "Option::is_none")]
    pub url_args: Option<String>,
}

impl LoadConfiguration {
    /// Build a configuration from identifier/locator pairs.
    pub fn from_paths<I, K, V>(paths: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<ModuleId>,
        V: Into<String>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Default::default()
        }
    }

    /// Identifiers this configuration declares.
    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.paths.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Capability the host supplies for module resolution.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Register locators. Replaces prior registrations for the listed
    /// identifiers (last write wins).
    fn configure(&self, config: &LoadConfiguration);

    /// Whether the identifier is currently resolvable in the namespace.
    fn is_defined(&self, id: &ModuleId) -> bool;

    /// Resolve an identifier to its module handle, if defined.
    fn resolve(&self, id: &ModuleId) -> Option<ModuleHandle>;

    /// Kick off a best-effort asynchronous fetch of the identifiers.
    /// Completion is observed through [`is_defined`](Self::is_defined),
    /// not through this call.
    async fn request(&self, ids: &[ModuleId]);
}

struct StaticEntry {
    available_at: Option<Instant>,
    handle: ModuleHandle,
}

/// In-memory loader with scripted availability.
///
/// Modules become defined immediately or after a fixed delay from their
/// registration. Delays follow the tokio clock, so paused-clock test
/// harnesses control exactly when a module turns resolvable.
#[derive(Default)]
pub struct StaticLoader {
    entries: RwLock<HashMap<ModuleId, StaticEntry>>,
    configs: RwLock<Vec<LoadConfiguration>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a module resolvable immediately.
    pub fn define(&self, id: impl Into<ModuleId>, handle: ModuleHandle) {
        self.entries.write().insert(
            id.into(),
            StaticEntry {
                available_at: None,
                handle,
            },
        );
    }

    /// Make a module resolvable once `delay` has elapsed on the tokio clock.
    pub fn define_after(&self, id: impl Into<ModuleId>, delay: Duration, handle: ModuleHandle) {
        self.entries.write().insert(
            id.into(),
            StaticEntry {
                available_at: Some(Instant::now() + delay),
                handle,
            },
        );
    }

    /// Configurations registered so far, oldest first.
    pub fn registered_configs(&self) -> Vec<LoadConfiguration> {
        self.configs.read().clone()
    }
}

#[async_trait]
impl ModuleLoader for StaticLoader {
    fn configure(&self, config: &LoadConfiguration) {
        self.configs.write().push(config.clone());
    }

    fn is_defined(&self, id: &ModuleId) -> bool {
        match self.entries.read().get(id) {
            Some(entry) => match entry.available_at {
                Some(at) => Instant::now() >= at,
                None => true,
            },
            None => false,
        }
    }

    fn resolve(&self, id: &ModuleId) -> Option<ModuleHandle> {
        if !self.is_defined(id) {
            return None;
        }
        self.entries.read().get(id).map(|e| e.handle.clone())
    }

    async fn request(&self, _ids: &[ModuleId]) {
        // Nothing to fetch; availability is scripted at registration time.
    }
}
