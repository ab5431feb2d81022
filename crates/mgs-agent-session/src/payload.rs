//! Task-complete payload assembly.

use std::collections::HashMap;

use mgs_agent_core::PluginResult;
use mgs_agent_transport::{TaskCompletePayload, protocol::SCHEMA_VERSION};

/// Build the reply payload for the step `plugin_id` of task `task_id`.
///
/// An empty result map, or one without `plugin_id`, is logged and yields the
/// all-default payload. Callers still send it so the gateway sees a reply for
/// the step.
#[must_use]
pub fn build_task_complete_payload(
    results: &HashMap<String, PluginResult>,
    plugin_id: &str,
    task_id: &str,
    instance_id: &str,
    topic: &str,
) -> TaskCompletePayload {
    if results.is_empty() {
        tracing::error!(%task_id, plugin = %plugin_id, "Plugin results map is empty");
        return TaskCompletePayload::default();
    }

    let Some(result) = results.get(plugin_id) else {
        tracing::error!(%task_id, plugin = %plugin_id, "Plugin result missing from results map");
        return TaskCompletePayload::default();
    };

    TaskCompletePayload {
        schema_version: SCHEMA_VERSION,
        task_id: task_id.to_string(),
        topic: topic.to_string(),
        final_task_status: result.status.as_str().to_string(),
        is_routing_failure: false,
        account_id: String::new(),
        instance_id: instance_id.to_string(),
        output: result.output.clone().unwrap_or_default(),
    }
}
