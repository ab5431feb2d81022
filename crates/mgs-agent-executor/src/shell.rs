//! Shell script plugin.

use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use mgs_agent_core::{Plugin, PluginContext, PluginOutput, ResultStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    command::{ArgumentBuilder, CommandBuildError, CommandBuilder, CommandParts, shell_command},
    output::OutputLimits,
    runner::CommandRunner,
};

/// Registered plugin name.
pub const PLUGIN_NAME: &str = "aws:runShellScript";

const DEFAULT_TIMEOUT_SECONDS: u64 = 3600;

/// Commands accept either a single string or a list of lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunCommand {
    Single(String),
    Lines(Vec<String>),
}

/// Input of a shell script step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellScriptInput {
    pub run_command: RunCommand,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl ShellScriptInput {
    /// The script body, one command per line.
    #[must_use]
    pub fn script(&self) -> String {
        match &self.run_command {
            RunCommand::Single(s) => s.clone(),
            RunCommand::Lines(lines) => lines.join("\n"),
        }
    }
}

/// Wraps the script in the platform shell.
#[derive(Debug, Clone, Default)]
pub struct ShellArguments;

impl ArgumentBuilder<ShellScriptInput> for ShellArguments {
    fn build(&self, input: &ShellScriptInput) -> Result<CommandParts, CommandBuildError> {
        let script = input.script();
        if script.trim().is_empty() {
            return Err(CommandBuildError::InvalidParams("runCommand is empty".into()));
        }
        let (shell, flag) = shell_command();
        CommandBuilder::new(shell).params([flag, script.as_str()]).build()
    }
}

/// Runs a shell script.
pub struct ShellScriptPlugin<R, A = ShellArguments> {
    runner: R,
    arguments: A,
    limits: OutputLimits,
}

impl<R: CommandRunner> ShellScriptPlugin<R> {
    /// Create the plugin with the platform shell.
    #[must_use]
    pub fn new(runner: R, limits: OutputLimits) -> Self {
        Self::with_arguments(runner, ShellArguments, limits)
    }
}

impl<R, A> ShellScriptPlugin<R, A>
where
    R: CommandRunner,
    A: ArgumentBuilder<ShellScriptInput>,
{
    /// Create the plugin with a custom argument builder.
    #[must_use]
    pub fn with_arguments(runner: R, arguments: A, limits: OutputLimits) -> Self {
        Self {
            runner,
            arguments,
            limits,
        }
    }

    async fn run(&self, ctx: &PluginContext, input: &ShellScriptInput) -> PluginOutput {
        let command = match self.arguments.build(input) {
            Ok(command) => command,
            Err(e) => return PluginOutput::failed(e.to_string()),
        };
        let working_dir = input
            .working_directory
            .as_deref()
            .filter(|dir| !dir.is_empty())
            .map_or_else(|| ctx.working_dir.clone(), PathBuf::from);
        let timeout = Duration::from_secs(input.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS));

        match tokio::time::timeout(timeout, self.runner.run(&command, &working_dir)).await {
            Ok(result) => self.limits.finish(result),
            Err(_) => {
                tracing::warn!(plugin = %ctx.plugin_id, ?timeout, "Shell script timed out");
                PluginOutput {
                    stderr: format!("Execution timed out after {}s", timeout.as_secs()),
                    exit_code: 1,
                    status: ResultStatus::TimedOut,
                    ..PluginOutput::default()
                }
            }
        }
    }
}

#[async_trait]
impl<R, A> Plugin for ShellScriptPlugin<R, A>
where
    R: CommandRunner,
    A: ArgumentBuilder<ShellScriptInput>,
{
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn execute(&self, ctx: &PluginContext, input: &Value) -> PluginOutput {
        match serde_json::from_value::<ShellScriptInput>(input.clone()) {
            Ok(input) => self.run(ctx, &input).await,
            Err(e) => PluginOutput::failed(format!("Invalid shell script input: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::runner::{CommandOutput, ExecutorError};

    struct EchoRunner;

    #[async_trait]
    impl CommandRunner for EchoRunner {
        async fn run(
            &self,
            command: &CommandParts,
            working_dir: &Path,
        ) -> Result<CommandOutput, ExecutorError> {
            Ok(CommandOutput {
                exit_code: 0,
                stdout: format!("{} @ {}", command.args.join("|"), working_dir.display()),
                stderr: String::new(),
            })
        }
    }

    struct SlowRunner;

    #[async_trait]
    impl CommandRunner for SlowRunner {
        async fn run(
            &self,
            _command: &CommandParts,
            _working_dir: &Path,
        ) -> Result<CommandOutput, ExecutorError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(CommandOutput::default())
        }
    }

    fn ctx() -> PluginContext {
        PluginContext::new("m-1", "run-script", "/work".into())
    }

    #[test]
    fn test_script_accepts_string_or_lines() {
        let single: ShellScriptInput =
            serde_json::from_value(serde_json::json!({ "runCommand": "echo hi" })).unwrap();
        assert_eq!(single.script(), "echo hi");
        let lines: ShellScriptInput =
            serde_json::from_value(serde_json::json!({ "runCommand": ["a", "b"] })).unwrap();
        assert_eq!(lines.script(), "a\nb");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_runs_in_shell() {
        let plugin = ShellScriptPlugin::new(EchoRunner, OutputLimits::default());
        let out = plugin
            .execute(&ctx(), &serde_json::json!({ "runCommand": ["echo a", "echo b"] }))
            .await;
        assert_eq!(out.status, ResultStatus::Success);
        assert_eq!(out.stdout, "-c|echo a\necho b @ /work");
    }

    #[tokio::test]
    async fn test_working_directory_override() {
        let plugin = ShellScriptPlugin::new(EchoRunner, OutputLimits::default());
        let out = plugin
            .execute(
                &ctx(),
                &serde_json::json!({ "runCommand": "true", "workingDirectory": "/other" }),
            )
            .await;
        assert!(out.stdout.ends_with("@ /other"));
    }

    #[tokio::test]
    async fn test_empty_script_fails() {
        let plugin = ShellScriptPlugin::new(EchoRunner, OutputLimits::default());
        let out = plugin
            .execute(&ctx(), &serde_json::json!({ "runCommand": [] }))
            .await;
        assert_eq!(out.status, ResultStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_timed_out() {
        let plugin = ShellScriptPlugin::new(SlowRunner, OutputLimits::default());
        let out = plugin
            .execute(&ctx(), &serde_json::json!({ "runCommand": "sleep 60", "timeoutSeconds": 1 }))
            .await;
        assert_eq!(out.status, ResultStatus::TimedOut);
        assert_eq!(out.exit_code, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_process() {
        let plugin = ShellScriptPlugin::new(crate::ProcessRunner, OutputLimits::default());
        let out = plugin
            .execute(&ctx(), &serde_json::json!({ "runCommand": "echo hello", "workingDirectory": "/" }))
            .await;
        assert_eq!(out.status, ResultStatus::Success);
        assert_eq!(out.stdout, "hello\n");
    }
}
