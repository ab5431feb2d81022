//! Execution contexts for plugins and the agent itself.

use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppConfig;

/// Identity of the running agent, reported alongside the host id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentInfo {
    pub lang: String,
    pub name: String,
    pub version: String,
    pub os: String,
    pub os_version: String,
}

impl AgentInfo {
    /// Build agent info from the host configuration.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            lang: config.os.lang.clone(),
            name: config.agent.name.clone(),
            version: config.agent.version.clone(),
            os: config.os.name.clone(),
            os_version: config.os.version.clone(),
        }
    }
}

/// Context handed to a plugin for one step of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginContext {
    /// Document the step belongs to.
    pub message_id: String,

    /// Step identifier within the document.
    pub plugin_id: String,

    /// Working directory for the step.
    pub working_dir: PathBuf,

    /// Arbitrary metadata for plugin-specific needs.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl PluginContext {
    /// Create a context for one step.
    #[must_use]
    pub fn new(
        message_id: impl Into<String>,
        plugin_id: impl Into<String>,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            plugin_id: plugin_id.into(),
            working_dir,
            metadata: HashMap::new(),
        }
    }

    /// Get a metadata value by key.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Set a metadata value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }
}
