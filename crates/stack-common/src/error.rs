//! Error types for administrative command execution.

use std::io;
use thiserror::Error;

/// Result type alias for stack-common operations.
pub type StackResult<T> = Result<T, StackError>;

/// Errors that can occur while driving external commands.
#[derive(Debug, Error)]
pub enum StackError {
    /// Failed to spawn a command.
    #[error("Failed to execute command '{command}': {source}")]
    ShellExec {
        /// The command line that failed to start.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Command returned a non-zero exit code.
    #[error("Command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command line that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Command succeeded but its output could not be interpreted.
    #[error("Unexpected output from '{command}': {message}")]
    InvalidOutput {
        /// The command line whose output was rejected.
        command: String,
        /// What was wrong with it.
        message: String,
    },
}

impl StackError {
    /// Creates an invalid output error.
    pub fn invalid_output(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOutput {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Returns true if the command could not be started at all.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, StackError::ShellExec { .. })
    }
}
