//! Command building utilities.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
}

/// Builds the command line for one plugin input.
///
/// Injected into plugins so tests can substitute the command without
/// touching the plugin itself.
pub trait ArgumentBuilder<I>: Send + Sync {
    /// Build the command for `input`.
    ///
    /// # Errors
    /// Returns error if the input cannot be turned into a command.
    fn build(&self, input: &I) -> Result<CommandParts, CommandBuildError>;
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Create new command parts.
    #[must_use]
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Space-joined command line, for logs and assertions.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Resolve the program to an executable path.
    ///
    /// Programs with a directory component are taken relative to
    /// `working_dir`; bare names are searched on `PATH`.
    ///
    /// # Errors
    /// Returns error if executable not found.
    pub async fn resolve(&self, working_dir: &Path) -> Result<PathBuf, CommandBuildError> {
        let not_found = || CommandBuildError::ExecutableNotFound(self.program.clone());
        if self.program.trim().is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }

        let path = Path::new(&self.program);
        if path.is_absolute() {
            return path.is_file().then(|| path.to_path_buf()).ok_or_else(not_found);
        }
        if path.components().count() > 1 {
            let joined = working_dir.join(path);
            return joined.is_file().then_some(joined).ok_or_else(not_found);
        }

        let program = self.program.clone();
        tokio::task::spawn_blocking(move || which::which(program))
            .await
            .ok()
            .and_then(Result::ok)
            .ok_or_else(not_found)
    }
}

/// Builder for constructing commands.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// Base executable command.
    pub base: String,
    /// Optional parameters to append.
    pub params: Option<Vec<String>>,
}

impl CommandBuilder {
    /// Create a new command builder.
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            params: None,
        }
    }

    /// Add parameters.
    #[must_use]
    pub fn params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params = Some(params.into_iter().map(Into::into).collect());
        self
    }

    /// Extend parameters.
    #[must_use]
    pub fn extend_params<I>(mut self, more: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let extra: Vec<String> = more.into_iter().map(Into::into).collect();
        match &mut self.params {
            Some(p) => p.extend(extra),
            None => self.params = Some(extra),
        }
        self
    }

    /// Build the command.
    ///
    /// The base is split like a shell would; parameters are passed verbatim.
    ///
    /// # Errors
    /// Returns error if command is invalid.
    pub fn build(&self) -> Result<CommandParts, CommandBuildError> {
        let mut parts =
            shlex::split(&self.base).ok_or_else(|| CommandBuildError::InvalidBase(self.base.clone()))?;
        if let Some(ref params) = self.params {
            parts.extend(params.iter().cloned());
        }

        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }

        let program = parts.remove(0);
        Ok(CommandParts::new(program, parts))
    }
}

/// Shell program and flag used to run a script on this platform.
#[must_use]
pub const fn shell_command() -> (&'static str, &'static str) {
    if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") }
}
