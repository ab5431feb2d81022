//! Plugin output shaping.

use mgs_agent_core::{PluginOutput, ResultStatus, config::PluginsSection};

use crate::runner::{CommandOutput, ExecutorError};

/// Limits applied to captured plugin output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLimits {
    pub max_stdout_length: usize,
    pub max_stderr_length: usize,
    pub truncated_suffix: String,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self::from(&PluginsSection::default())
    }
}

impl From<&PluginsSection> for OutputLimits {
    fn from(section: &PluginsSection) -> Self {
        Self {
            max_stdout_length: section.max_stdout_length,
            max_stderr_length: section.max_stderr_length,
            truncated_suffix: section.output_truncated_suffix.clone(),
        }
    }
}

impl OutputLimits {
    /// Map a runner result to plugin output, applying the limits.
    ///
    /// Exit code zero is success; a non-zero exit or a runner error is a
    /// failure, the latter with exit code 1.
    #[must_use]
    pub fn finish(&self, result: Result<CommandOutput, ExecutorError>) -> PluginOutput {
        let output = match result {
            Ok(out) => PluginOutput {
                status: if out.exit_code == 0 {
                    ResultStatus::Success
                } else {
                    ResultStatus::Failed
                },
                exit_code: out.exit_code,
                stdout: out.stdout,
                stderr: out.stderr,
            },
            Err(e) => PluginOutput::failed(e.to_string()),
        };
        self.apply(output)
    }

    /// Truncate stdout and stderr to their limits.
    #[must_use]
    pub fn apply(&self, mut output: PluginOutput) -> PluginOutput {
        output.stdout = truncate(&output.stdout, self.max_stdout_length, &self.truncated_suffix);
        output.stderr = truncate(&output.stderr, self.max_stderr_length, &self.truncated_suffix);
        output
    }
}

fn truncate(text: &str, max_chars: usize, suffix: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{suffix}", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max: usize) -> OutputLimits {
        OutputLimits {
            max_stdout_length: max,
            max_stderr_length: max,
            truncated_suffix: "-more-".into(),
        }
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("héllo", 2, "~"), "hé~");
        assert_eq!(truncate("abc", 3, "~"), "abc");
        assert_eq!(truncate("", 0, "~"), "");
    }

    #[test]
    fn test_finish_maps_exit_codes() {
        let ok = limits(1000).finish(Ok(CommandOutput {
            exit_code: 0,
            stdout: "fine".into(),
            stderr: String::new(),
        }));
        assert_eq!(ok.status, ResultStatus::Success);
        assert_eq!(ok.exit_code, 0);

        let bad = limits(1000).finish(Ok(CommandOutput {
            exit_code: 2,
            ..CommandOutput::default()
        }));
        assert_eq!(bad.status, ResultStatus::Failed);
        assert_eq!(bad.exit_code, 2);
    }

    #[test]
    fn test_finish_maps_runner_error() {
        let out = limits(1000).finish(Err(ExecutorError::SpawnFailed("boom".into())));
        assert_eq!(out.status, ResultStatus::Failed);
        assert_eq!(out.exit_code, 1);
        assert_eq!(out.stderr, "Spawn failed: boom");
    }

    #[test]
    fn test_apply_truncates_both_streams() {
        let out = limits(4).apply(PluginOutput {
            stdout: "0123456789".into(),
            stderr: "abcdefgh".into(),
            exit_code: 0,
            status: ResultStatus::Success,
        });
        assert_eq!(out.stdout, "0123-more-");
        assert_eq!(out.stderr, "abcd-more-");
    }
}
