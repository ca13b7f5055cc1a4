//! Core identifier types shared across the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of an external module as known to the module loader.
///
/// This is the key under which a library is registered in the
/// [`LoadConfiguration`](crate::loader::LoadConfiguration) paths map and the
/// name a cell lists in its requirement metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ModuleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

static CELL_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifier of a notebook cell.
///
/// Cells may be deleted while a gate or execution is in flight, so async
/// operations hold a `CellId` and re-resolve it against the notebook instead
/// of keeping a direct reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(pub u64);

impl CellId {
    /// Allocate the next cell id.
    pub fn next() -> Self {
        Self(CELL_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell-{}", self.0)
    }
}

/// MIME types used to key output renderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MimeType {
    #[serde(rename = "application/javascript")]
    Javascript,
    #[serde(rename = "text/html")]
    Html,
    #[serde(rename = "text/plain")]
    Text,
}

impl MimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MimeType::Javascript => "application/javascript",
            MimeType::Html => "text/html",
            MimeType::Text => "text/plain",
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current time as milliseconds since Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
