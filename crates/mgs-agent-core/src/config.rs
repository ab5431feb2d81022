//! Host-level agent configuration.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding the gateway region.
pub const ENV_REGION: &str = "MGS_REGION";
/// Environment variable overriding the gateway endpoint.
pub const ENV_ENDPOINT: &str = "MGS_ENDPOINT";
/// Environment variable overriding the host identity.
pub const ENV_INSTANCE_ID: &str = "MGS_INSTANCE_ID";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Agent identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AgentSection {
    pub name: String,
    pub version: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: "mgs-agent".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Operating system description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OsSection {
    pub lang: String,
    pub name: String,
    pub version: String,
}

impl Default for OsSection {
    fn default() -> Self {
        Self {
            lang: "en-US".to_string(),
            name: std::env::consts::OS.to_string(),
            version: String::new(),
        }
    }
}

/// Message gateway settings.
///
/// Empty `region`/`endpoint` mean "discover at startup".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MgsSection {
    pub region: String,
    pub endpoint: String,
    /// Empty means "ask the host metadata".
    pub instance_id: String,
    pub stop_timeout_millis: u64,
    pub session_workers_limit: usize,
}

impl Default for MgsSection {
    fn default() -> Self {
        Self {
            region: String::new(),
            endpoint: String::new(),
            instance_id: String::new(),
            stop_timeout_millis: 20_000,
            session_workers_limit: 1000,
        }
    }
}

impl MgsSection {
    /// Stop timeout as a duration.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_millis)
    }
}

/// Plugin output limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PluginsSection {
    pub max_stdout_length: usize,
    pub max_stderr_length: usize,
    pub output_truncated_suffix: String,
}

impl Default for PluginsSection {
    fn default() -> Self {
        Self {
            max_stdout_length: 2500,
            max_stderr_length: 2500,
            output_truncated_suffix: "--output truncated--".to_string(),
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub os: OsSection,
    pub mgs: MgsSection,
    pub plugins: PluginsSection,
}

impl AppConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_json(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    /// Returns error if the document is not valid.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v: &String| !v.trim().is_empty());
        if let Some(region) = get(ENV_REGION) {
            self.mgs.region = region;
        }
        if let Some(endpoint) = get(ENV_ENDPOINT) {
            self.mgs.endpoint = endpoint;
        }
        if let Some(instance_id) = get(ENV_INSTANCE_ID) {
            self.mgs.instance_id = instance_id;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let cfg = AppConfig::from_json(r#"{ "Mgs": { "Region": "us-west-2" } }"#).unwrap();
        assert_eq!(cfg.mgs.region, "us-west-2");
        assert_eq!(cfg.mgs.stop_timeout_millis, 20_000);
        assert_eq!(cfg.plugins.max_stdout_length, 2500);
        assert_eq!(cfg.agent.name, "mgs-agent");
    }

    #[test]
    fn test_missing_file_is_default() {
        let cfg = AppConfig::load(Path::new("/nonexistent/mgs-agent.json")).unwrap();
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        assert!(matches!(
            AppConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_overrides_skip_empty_values() {
        let env: HashMap<&str, &str> =
            HashMap::from([(ENV_REGION, "eu-west-1"), (ENV_ENDPOINT, "  ")]);
        let mut cfg = AppConfig::default();
        cfg.mgs.endpoint = "https://configured".into();
        cfg.apply_overrides(|k| env.get(k).map(|v| (*v).to_string()));
        assert_eq!(cfg.mgs.region, "eu-west-1");
        assert_eq!(cfg.mgs.endpoint, "https://configured");
        assert!(cfg.mgs.instance_id.is_empty());
    }
}
