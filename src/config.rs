//! Engine configuration.
//!
//! All timing knobs of the engine live here. The defaults follow observed
//! library load times on slow networks and can be overridden per deployment
//! through an optional TOML file or `NBREQUIRE_*` environment variables.
//! Timeouts are configuration, never constants.

use crate::error::RequireError;
use crate::logging::LoggingConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between module resolution probes, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Deadline for a single module to become resolvable, in milliseconds.
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,

    /// Deadline for a sandboxed script invocation, in milliseconds.
    /// Independent from the resolve timeout.
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,

    /// Deadline for a control-process acknowledgement round-trip, in milliseconds.
    #[serde(default = "default_channel_timeout_ms")]
    pub channel_timeout_ms: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_resolve_timeout_ms() -> u64 {
    5_000
}

fn default_execution_timeout_ms() -> u64 {
    5_000
}

fn default_channel_timeout_ms() -> u64 {
    2_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            resolve_timeout_ms: default_resolve_timeout_ms(),
            execution_timeout_ms: default_execution_timeout_ms(),
            channel_timeout_ms: default_channel_timeout_ms(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration with layered precedence:
    /// built-in defaults, then an optional TOML file, then `NBREQUIRE_*`
    /// environment variables (e.g. `NBREQUIRE_RESOLVE_TIMEOUT_MS=10000`).
    pub fn load(config_file: Option<&Path>) -> Result<Self, RequireError> {
        let mut builder = Config::builder();

        if let Some(path) = config_file {
            if let Some(path_str) = path.to_str() {
                builder = builder.add_source(File::with_name(path_str).required(false));
            }
        }

        builder = builder.add_source(Environment::with_prefix("NBREQUIRE").try_parsing(true));

        let loaded = builder.build()?;
        let config: EngineConfig = loaded.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make the engine unable to settle.
    pub fn validate(&self) -> Result<(), RequireError> {
        if self.poll_interval_ms == 0 {
            return Err(RequireError::Config(
                "poll_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.resolve_timeout_ms == 0 || self.execution_timeout_ms == 0 {
            return Err(RequireError::Config(
                "timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }
}
