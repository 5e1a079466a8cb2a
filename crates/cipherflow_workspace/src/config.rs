// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workspace configuration stored as RON.

use crate::clone::PASTE_OFFSET;
use crate::history::MAX_HISTORY;
use cipherflow_graph::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current configuration format version
pub const CONFIG_FORMAT_VERSION: u32 = 1;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write the file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Failed to serialize
    #[error("Serialization failed: {0}")]
    Serialize(#[from] ron::Error),

    /// Written by a newer version
    #[error("Config version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version in the file
        found: u32,
        /// Newest readable version
        supported: u32,
    },
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `info,cipherflow_graph=debug`
    pub filter: String,
    /// Also print formatted events to stdout
    pub echo_to_stdout: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            echo_to_stdout: false,
        }
    }
}

/// Workspace configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Format version
    pub version: u32,
    /// Maximum undo depth
    pub history_depth: usize,
    /// Scheduler limits
    pub scheduler: SchedulerConfig,
    /// Layout offset of pasted nodes
    pub paste_offset: [f32; 2],
    /// Logging
    pub log: LogConfig,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_FORMAT_VERSION,
            history_depth: MAX_HISTORY,
            scheduler: SchedulerConfig::default(),
            paste_offset: PASTE_OFFSET,
            log: LogConfig::default(),
        }
    }
}

impl WorkspaceConfig {
    /// Parse from RON; missing fields take their defaults
    pub fn from_ron(s: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(s)?;
        if config.version > CONFIG_FORMAT_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: config.version,
                supported: CONFIG_FORMAT_VERSION,
            });
        }
        Ok(config)
    }

    /// Serialize to pretty RON
    pub fn to_ron(&self) -> Result<String, ConfigError> {
        let config = ron::ser::PrettyConfig::default().struct_names(true);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron(&content)
    }

    /// Save to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }
}
