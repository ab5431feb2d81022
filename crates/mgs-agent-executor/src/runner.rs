//! Command execution strategy.

use std::{path::Path, process::Stdio};

use async_trait::async_trait;
use command_group::AsyncCommandGroup;
use thiserror::Error;

use crate::command::{CommandBuildError, CommandParts};

/// Executor error.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Command build error: {0}")]
    CommandBuild(#[from] CommandBuildError),
}

/// Captured result of one command run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs a built command.
///
/// Plugins receive a runner at construction; tests inject a fake.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` in `working_dir` to completion.
    async fn run(
        &self,
        command: &CommandParts,
        working_dir: &Path,
    ) -> Result<CommandOutput, ExecutorError>;
}

/// Runs commands as child process groups of the agent.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        command: &CommandParts,
        working_dir: &Path,
    ) -> Result<CommandOutput, ExecutorError> {
        let program = command.resolve(working_dir).await?;
        tracing::debug!(program = %program.display(), args = ?command.args, "Spawning command");

        let child = tokio::process::Command::new(&program)
            .args(&command.args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .group_spawn()
            .map_err(|e| ExecutorError::SpawnFailed(format!("{}: {e}", program.display())))?;

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::command::CommandBuilder;

    #[tokio::test]
    async fn test_process_runner_captures_output() {
        let parts = CommandBuilder::new("sh -c")
            .params(["echo out; echo err 1>&2; exit 3"])
            .build()
            .unwrap();
        let output = ProcessRunner.run(&parts, Path::new("/")).await.unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_missing_program_is_a_build_error() {
        let parts = CommandParts::new("no-such-program-mgs".into(), vec![]);
        let err = ProcessRunner.run(&parts, Path::new("/")).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::CommandBuild(CommandBuildError::ExecutableNotFound(_))
        ));
    }
}
