//! Subprocess execution utilities.
//!
//! Commands are always spawned with an explicit argv. Arguments such as MAC
//! addresses and hostnames come straight out of syslog lines, so nothing here
//! goes through `/bin/sh`.
//!
//! # Example
//!
//! ```ignore
//! use stack_common::shell::{self, IP_CMD};
//!
//! let result = shell::exec(IP_CMD, &["-o", "-4", "address"]).await?;
//! if result.success() {
//!     println!("{}", result.stdout);
//! }
//! ```

use std::ffi::OsStr;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{StackError, StackResult};

/// Path to the cluster administrative command line.
pub const STACK_CMD: &str = "/opt/stack/bin/stack";

/// Path to the `ip` command used to inspect interface addresses.
pub const IP_CMD: &str = "/sbin/ip";

/// Result of a command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// The exit code of the command (0 = success, -1 = killed by a signal).
    pub exit_code: i32,
    /// Captured stdout, trimmed.
    pub stdout: String,
    /// Captured stderr, trimmed.
    pub stderr: String,
}

impl ExecResult {
    /// Builds a successful result carrying `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Builds a failed result carrying `stderr`.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Renders a program and its arguments as a single line for logs and errors.
pub fn command_line<S: AsRef<OsStr>>(program: &str, args: &[S]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.as_ref().to_string_lossy());
    }
    line
}

/// Runs `program` with `args` and waits for it to finish.
///
/// A non-zero exit is not an error at this level; callers inspect
/// [`ExecResult::success`]. Only a failure to spawn the process is returned
/// as `Err`.
pub async fn exec<S: AsRef<OsStr>>(program: &str, args: &[S]) -> StackResult<ExecResult> {
    let line = command_line(program, args);
    tracing::debug!(command = %line, "Executing command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| StackError::ShellExec {
            command: line.clone(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::trace!(command = %line, "Command succeeded");
    } else {
        tracing::warn!(
            command = %line,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Runs a command and turns a non-zero exit into an error.
///
/// Returns stdout on success.
pub async fn exec_or_fail<S: AsRef<OsStr>>(program: &str, args: &[S]) -> StackResult<String> {
    let result = exec(program, args).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(StackError::ShellCommandFailed {
            command: command_line(program, args),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}
