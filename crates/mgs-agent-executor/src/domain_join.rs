//! Domain join plugin.
//!
//! Shells out to the domain join utility shipped with the agent. Both the
//! command runner and the argument builder are injected, so the plugin can be
//! exercised without the utility being present.

use async_trait::async_trait;
use mgs_agent_core::{Plugin, PluginContext, PluginOutput};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    command::{ArgumentBuilder, CommandBuildError, CommandBuilder, CommandParts},
    output::OutputLimits,
    runner::CommandRunner,
};

/// Registered plugin name.
pub const PLUGIN_NAME: &str = "aws:domainJoin";

/// Domain join utility, relative to the step's working directory.
pub const DOMAIN_JOIN_EXECUTABLE: &str = "./Ec2Config.DomainJoin.exe";

/// Input of a domain join step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainJoinInput {
    pub directory_id: String,
    pub directory_name: String,
    #[serde(default)]
    pub dns_ip_addresses: Vec<String>,
}

/// Default argument builder for the domain join utility.
#[derive(Debug, Clone)]
pub struct DomainJoinArguments {
    region: String,
}

impl DomainJoinArguments {
    /// Create a builder that passes `region` as the instance region.
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }
}

impl ArgumentBuilder<DomainJoinInput> for DomainJoinArguments {
    fn build(&self, input: &DomainJoinInput) -> Result<CommandParts, CommandBuildError> {
        if input.directory_id.trim().is_empty() {
            return Err(CommandBuildError::InvalidParams("directoryId is required".into()));
        }
        if input.directory_name.trim().is_empty() {
            return Err(CommandBuildError::InvalidParams("directoryName is required".into()));
        }

        let mut builder = CommandBuilder::new(DOMAIN_JOIN_EXECUTABLE).params([
            "--directory-id",
            input.directory_id.as_str(),
            "--directory-name",
            input.directory_name.as_str(),
            "--instance-region",
            self.region.as_str(),
        ]);
        if !input.dns_ip_addresses.is_empty() {
            builder = builder
                .extend_params(["--dns-addresses"])
                .extend_params(input.dns_ip_addresses.iter().map(String::as_str));
        }
        builder.build()
    }
}

/// Joins the host to a directory.
pub struct DomainJoinPlugin<R, A> {
    runner: R,
    arguments: A,
    limits: OutputLimits,
}

impl<R, A> DomainJoinPlugin<R, A>
where
    R: CommandRunner,
    A: ArgumentBuilder<DomainJoinInput>,
{
    /// Create the plugin with its execution strategies.
    #[must_use]
    pub fn new(runner: R, arguments: A, limits: OutputLimits) -> Self {
        Self {
            runner,
            arguments,
            limits,
        }
    }

    /// Run the utility for an already parsed input.
    pub async fn run(&self, ctx: &PluginContext, input: &DomainJoinInput) -> PluginOutput {
        let command = match self.arguments.build(input) {
            Ok(command) => command,
            Err(e) => return self.limits.apply(PluginOutput::failed(e.to_string())),
        };
        tracing::info!(
            plugin = %ctx.plugin_id,
            directory_id = %input.directory_id,
            "Running domain join"
        );
        self.limits
            .finish(self.runner.run(&command, &ctx.working_dir).await)
    }
}

#[async_trait]
impl<R, A> Plugin for DomainJoinPlugin<R, A>
where
    R: CommandRunner,
    A: ArgumentBuilder<DomainJoinInput>,
{
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn execute(&self, ctx: &PluginContext, input: &Value) -> PluginOutput {
        match serde_json::from_value::<DomainJoinInput>(input.clone()) {
            Ok(input) => self.run(ctx, &input).await,
            Err(e) => PluginOutput::failed(format!("Invalid domain join input: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Mutex};

    use mgs_agent_core::ResultStatus;

    use super::*;
    use crate::runner::{CommandOutput, ExecutorError};

    const DIRECTORY_ID: &str = "d-0123456789";
    const DIRECTORY_NAME: &str = "corp.test.com";

    fn input(ips: &[&str]) -> DomainJoinInput {
        DomainJoinInput {
            directory_id: DIRECTORY_ID.into(),
            directory_name: DIRECTORY_NAME.into(),
            dns_ip_addresses: ips.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Runner that records the command and returns a canned result.
    struct FakeRunner {
        fail: bool,
        seen: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(
            &self,
            command: &CommandParts,
            _working_dir: &Path,
        ) -> Result<CommandOutput, ExecutorError> {
            self.seen.lock().unwrap().push(command.command_line());
            if self.fail {
                Err(ExecutorError::SpawnFailed("err here".into()))
            } else {
                Ok(CommandOutput::default())
            }
        }
    }

    /// Argument builder that ignores its input.
    struct FixedArguments;

    impl ArgumentBuilder<DomainJoinInput> for FixedArguments {
        fn build(&self, _input: &DomainJoinInput) -> Result<CommandParts, CommandBuildError> {
            CommandBuilder::new("cmd").build()
        }
    }

    fn ctx() -> PluginContext {
        PluginContext::new("m-1", "domainJoin", "OrchesDir".into())
    }

    fn limits() -> OutputLimits {
        OutputLimits {
            max_stdout_length: 1000,
            max_stderr_length: 1000,
            truncated_suffix: "-more-".into(),
        }
    }

    #[test]
    fn test_make_arguments() {
        let command = DomainJoinArguments::new("us-east-1")
            .build(&input(&["172.31.4.141", "172.31.21.240"]))
            .unwrap();
        assert_eq!(
            command.command_line(),
            "./Ec2Config.DomainJoin.exe --directory-id d-0123456789 --directory-name corp.test.com --instance-region us-east-1 --dns-addresses 172.31.4.141 172.31.21.240"
        );
    }

    #[test]
    fn test_make_arguments_without_dns() {
        let command = DomainJoinArguments::new("us-west-2").build(&input(&[])).unwrap();
        assert!(!command.args.contains(&"--dns-addresses".to_string()));
    }

    #[test]
    fn test_make_arguments_requires_directory() {
        let mut bad = input(&[]);
        bad.directory_id.clear();
        assert!(matches!(
            DomainJoinArguments::new("us-east-1").build(&bad),
            Err(CommandBuildError::InvalidParams(_))
        ));
    }

    #[tokio::test]
    async fn test_run_commands_success() {
        let plugin = DomainJoinPlugin::new(FakeRunner::new(false), FixedArguments, limits());
        let raw = serde_json::to_value(input(&["10.0.0.0", "10.0.1.0"])).unwrap();

        let out = plugin.execute(&ctx(), &raw).await;
        assert_eq!(
            out,
            PluginOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
                status: ResultStatus::Success,
            }
        );
        assert_eq!(*plugin.runner.seen.lock().unwrap(), vec!["cmd".to_string()]);
    }

    #[tokio::test]
    async fn test_run_commands_failure() {
        let plugin = DomainJoinPlugin::new(FakeRunner::new(true), FixedArguments, limits());

        let out = plugin.run(&ctx(), &input(&["10.0.0.2", "10.0.1.2"])).await;
        assert_eq!(out.status, ResultStatus::Failed);
        assert_eq!(out.exit_code, 1);
    }

    #[tokio::test]
    async fn test_invalid_input_fails_without_running() {
        let plugin = DomainJoinPlugin::new(FakeRunner::new(false), FixedArguments, limits());
        let out = plugin
            .execute(&ctx(), &serde_json::json!({ "directoryId": 5 }))
            .await;
        assert_eq!(out.status, ResultStatus::Failed);
        assert!(plugin.runner.seen.lock().unwrap().is_empty());
    }
}
