//! Work-item contracts shared between the task engine, plugins and the reply path.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status taxonomy reported for plugins and whole documents.
///
/// The serialized form is the variant name, and it travels verbatim to the
/// gateway as `FinalTaskStatus`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultStatus {
    #[default]
    NotStarted,
    Pending,
    InProgress,
    Success,
    SuccessAndReboot,
    Failed,
    TimedOut,
    Cancelling,
    Cancelled,
}

impl ResultStatus {
    /// Wire string for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NotStarted",
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Success => "Success",
            Self::SuccessAndReboot => "SuccessAndReboot",
            Self::Failed => "Failed",
            Self::TimedOut => "TimedOut",
            Self::Cancelling => "Cancelling",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Whether no further transitions are expected.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::SuccessAndReboot | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    /// Merge a step status into a running document status.
    ///
    /// Failures dominate; cancellation and timeout dominate success.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        const fn rank(s: ResultStatus) -> u8 {
            match s {
                ResultStatus::Failed => 5,
                ResultStatus::TimedOut => 4,
                ResultStatus::Cancelled | ResultStatus::Cancelling => 3,
                ResultStatus::InProgress | ResultStatus::Pending => 2,
                ResultStatus::Success | ResultStatus::SuccessAndReboot => 1,
                ResultStatus::NotStarted => 0,
            }
        }
        if rank(other) > rank(self) { other } else { self }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the task engine should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopType {
    /// Let in-flight work finish.
    Soft,
    /// Abort in-flight work.
    Hard,
}

/// Result of a single plugin step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginResult {
    pub plugin_id: String,
    pub plugin_name: String,
    pub status: ResultStatus,
    pub code: i32,
    /// Textual output. `None` when the plugin produced nothing.
    pub output: Option<String>,
    /// Unix epoch milliseconds.
    pub start_date_time: u64,
    /// Unix epoch milliseconds.
    pub end_date_time: u64,
}

/// Result event published by the task engine.
///
/// `last_plugin` names the step that just completed. An empty value marks the
/// whole-document aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentResult {
    /// Correlates to the originating work item.
    pub message_id: String,
    pub document_name: String,
    pub plugin_results: HashMap<String, PluginResult>,
    pub last_plugin: String,
    pub status: ResultStatus,
}

impl DocumentResult {
    /// Whether this event is the whole-document aggregate.
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        self.last_plugin.is_empty()
    }
}

/// One step of a document: which plugin to run and with what input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginStep {
    /// Step identifier, unique within the document.
    pub id: String,
    /// Registered plugin name, e.g. `aws:runShellScript`.
    pub name: String,
    #[serde(default)]
    pub inputs: Value,
}

/// A unit of dispatched work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub message_id: String,
    #[serde(default)]
    pub document_name: String,
    pub steps: Vec<PluginStep>,
}

/// Raw output captured from a plugin run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub status: ResultStatus,
}

impl PluginOutput {
    /// Successful output with the given stdout.
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            status: ResultStatus::Success,
            ..Self::default()
        }
    }

    /// Failed output carrying an error message on stderr.
    #[must_use]
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code: 1,
            status: ResultStatus::Failed,
            ..Self::default()
        }
    }

    /// Combined textual output as reported to the gateway.
    #[must_use]
    pub fn text(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => format!("\n----------ERROR-------\n{}", self.stderr),
            (false, false) => format!("{}\n----------ERROR-------\n{}", self.stdout, self.stderr),
        }
    }
}
