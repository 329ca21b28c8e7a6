//! Configuration.
//!
//! JSON, every field optional:
//!
//! ```json
//! {
//!   "autosave": { "enabled": true, "debounce_ms": 500, "flush_on_stop": true },
//!   "cache": { "retention": { "mode": "grace", "grace_ms": 30000 } }
//! }
//! ```
//!
//! Out-of-range values are clamped when turned into policies.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::autosave::{AutosavePolicy, DEFAULT_DEBOUNCE};
use crate::error::ConfigError;
use crate::handle::{RetentionPolicy, DEFAULT_GRACE};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub autosave: AutosaveConfig,
    pub cache: CacheConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
    pub flush_on_stop: bool,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            flush_on_stop: true,
        }
    }
}

impl AutosaveConfig {
    /// `None` when autosave is disabled.
    pub fn policy(&self) -> Option<AutosavePolicy> {
        self.enabled.then(|| {
            AutosavePolicy::new(Duration::from_millis(self.debounce_ms))
                .with_flush_on_stop(self.flush_on_stop)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub retention: RetentionConfig,
}

impl CacheConfig {
    pub fn retention(&self) -> RetentionPolicy {
        match self.retention {
            RetentionConfig::Immediate => RetentionPolicy::Immediate,
            RetentionConfig::Grace { grace_ms } => {
                RetentionPolicy::Grace(Duration::from_millis(grace_ms))
            }
            RetentionConfig::Forever => RetentionPolicy::Forever,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetentionConfig {
    Immediate,
    Grace { grace_ms: u64 },
    Forever,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self::Grace {
            grace_ms: DEFAULT_GRACE.as_millis() as u64,
        }
    }
}
