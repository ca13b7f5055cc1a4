//! Error types for the dependency-gated execution engine.

use crate::types::ModuleId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reason of a sandboxed execution.
///
/// Serialized into error output records so a restored notebook can still tell
/// which stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// A required module never became resolvable before the gate deadline.
    DependencyTimeout,
    /// The user script did not complete within the execution deadline.
    ExecutionTimeout,
    /// The script itself failed (malformed source or a raised error).
    ScriptError,
}

impl ExecutionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionErrorKind::DependencyTimeout => "dependency_timeout",
            ExecutionErrorKind::ExecutionTimeout => "execution_timeout",
            ExecutionErrorKind::ScriptError => "script_error",
        }
    }
}

/// Error raised by a [`ScriptExecutor`](crate::sandbox::ScriptExecutor)
/// while constructing or invoking a user script.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ScriptError {
    pub message: String,
    /// Stack frames as reported by the evaluator, if any.
    pub traceback: Vec<String>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            traceback: Vec::new(),
        }
    }

    pub fn with_traceback(message: impl Into<String>, traceback: Vec<String>) -> Self {
        Self {
            message: message.into(),
            traceback,
        }
    }
}

/// Failure during a sandboxed invocation.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("required modules did not resolve: {0:?}")]
    DependencyTimeout(Vec<ModuleId>),

    #[error("script execution exceeded its deadline")]
    ExecutionTimeout,

    #[error("script error: {0}")]
    Script(#[from] ScriptError),
}

impl ExecutionError {
    pub fn kind(&self) -> ExecutionErrorKind {
        match self {
            ExecutionError::DependencyTimeout(_) => ExecutionErrorKind::DependencyTimeout,
            ExecutionError::ExecutionTimeout => ExecutionErrorKind::ExecutionTimeout,
            ExecutionError::Script(_) => ExecutionErrorKind::ScriptError,
        }
    }
}

/// Channel-level errors when talking to the external control process.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("no acknowledgement on channel '{0}' within the deadline")]
    Timeout(String),

    #[error("channel '{0}' is closed")]
    Closed(String),
}

/// Top-level error taxonomy of the engine.
#[derive(Debug, Error)]
pub enum RequireError {
    #[error("unresolved dependencies: {}", format_ids(.0))]
    UnresolvedDependencies(Vec<ModuleId>),

    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("no target cell could be resolved for execution")]
    NoTargetCell,

    #[error("malformed request payload: {0}")]
    Payload(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for RequireError {
    fn from(err: config::ConfigError) -> Self {
        RequireError::Config(err.to_string())
    }
}

fn format_ids(ids: &[ModuleId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
