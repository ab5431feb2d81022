//! Plugins and command execution for the session agent.
//!
//! Provides:
//! - Command building utilities and the `ArgumentBuilder` strategy
//! - `CommandRunner` strategy with a process-group backed default
//! - Shell script and domain join plugins

pub mod command;
pub mod domain_join;
pub mod output;
pub mod runner;
pub mod shell;

pub use command::{ArgumentBuilder, CommandBuildError, CommandBuilder, CommandParts};
pub use domain_join::{DomainJoinArguments, DomainJoinInput, DomainJoinPlugin};
pub use output::OutputLimits;
pub use runner::{CommandOutput, CommandRunner, ExecutorError, ProcessRunner};
pub use shell::{ShellArguments, ShellScriptInput, ShellScriptPlugin};
