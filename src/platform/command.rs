//! Builder for the service-manager commands (`systemctl`, `launchctl`, `sc.exe`).
//!
//! Every platform strategy shells out through [`SystemCommand`] so command
//! logging, timeouts and failure reporting look the same everywhere.
//!
//! ```rust,no_run
//! use servicekit::platform::command::SystemCommand;
//!
//! # async fn example() -> anyhow::Result<()> {
//! SystemCommand::new("systemctl")
//!     .args(["restart", "heartbeat"])
//!     .with_context("heartbeat")
//!     .execute_success()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::ServiceError;

/// A command line to run against the platform's service manager.
#[derive(Debug, Clone)]
pub struct SystemCommand {
    program: String,
    args: Vec<String>,
    timeout_duration: Option<Duration>,
    context: Option<String>,
}

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl CommandOutput {
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

impl SystemCommand {
    /// A command running `program`, with a two minute timeout.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout_duration: Some(Duration::from_secs(120)),
            context: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set a custom timeout for the command (None for no timeout)
    pub const fn with_timeout(mut self, duration: Option<Duration>) -> Self {
        self.timeout_duration = duration;
        self
    }

    /// Label included in log lines, usually the service name.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// The command line as shown in logs and errors.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run and capture output regardless of the exit status.
    ///
    /// Fails only when the program cannot be started or times out.
    pub async fn output(&self) -> Result<CommandOutput> {
        let command_line = self.command_line();
        match &self.context {
            Some(ctx) => tracing::debug!(target: "platform", "({ctx}) Executing: {command_line}"),
            None => tracing::debug!(target: "platform", "Executing: {command_line}"),
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output_future = cmd.output();
        let output = if let Some(duration) = self.timeout_duration {
            match timeout(duration, output_future).await {
                Ok(result) => result.with_context(|| format!("execute {command_line:?} failed"))?,
                Err(_) => {
                    tracing::warn!(
                        target: "platform",
                        "Command timed out after {} seconds: {command_line}",
                        duration.as_secs()
                    );
                    return Err(ServiceError::CommandFailed {
                        command: command_line,
                        stderr: format!("timed out after {} seconds", duration.as_secs()),
                    }
                    .into());
                }
            }
        } else {
            output_future.await.with_context(|| format!("execute {command_line:?} failed"))?
        };

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            code: output.status.code(),
        };

        if !result.stdout.trim().is_empty() {
            tracing::debug!(target: "platform", "{}", result.stdout.trim());
        }
        if !result.stderr.trim().is_empty() {
            tracing::debug!(target: "platform", "{}", result.stderr.trim());
        }
        Ok(result)
    }

    /// Run and fail with [`ServiceError::CommandFailed`] on a non-zero exit.
    pub async fn execute(self) -> Result<CommandOutput> {
        let output = self.output().await?;
        if !output.success() {
            tracing::debug!(
                target: "platform",
                "Command failed with exit code: {:?}",
                output.code
            );
            let stderr = if output.stderr.trim().is_empty() {
                output.stdout.trim().to_string()
            } else {
                output.stderr.trim().to_string()
            };
            return Err(ServiceError::CommandFailed {
                command: self.command_line(),
                stderr,
            }
            .into());
        }
        Ok(output)
    }

    /// Run and return trimmed stdout.
    pub async fn execute_stdout(self) -> Result<String> {
        let output = self.execute().await?;
        Ok(output.stdout.trim().to_string())
    }

    /// Run and check for success.
    pub async fn execute_success(self) -> Result<()> {
        self.execute().await?;
        Ok(())
    }
}

/// Fail with [`ServiceError::PlatformNotSupported`] when `program` is not on `PATH`.
pub fn require_tool(program: &str, operation: &str) -> Result<()> {
    if std::path::Path::new(program).is_absolute() || which::which(program).is_ok() {
        return Ok(());
    }
    Err(ServiceError::PlatformNotSupported {
        operation: format!("{operation} ({program} not found)"),
    }
    .into())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_captures_stdout() {
        let out = SystemCommand::new("sh").args(["-c", "echo hello"]).execute_stdout().await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_failure_is_command_failed() {
        let err = SystemCommand::new("sh")
            .args(["-c", "echo nope >&2; exit 3"])
            .execute_success()
            .await
            .unwrap_err();

        match err.downcast_ref::<ServiceError>() {
            Some(ServiceError::CommandFailed { command, stderr }) => {
                assert!(command.starts_with("sh -c"));
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_output_keeps_non_zero_exit() {
        let output = SystemCommand::new("sh").args(["-c", "echo inactive; exit 3"]).output().await.unwrap();
        assert_eq!(output.code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "inactive");
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = SystemCommand::new("sleep")
            .arg("5")
            .with_timeout(Some(Duration::from_millis(50)))
            .execute_success()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_require_tool() {
        assert!(require_tool("sh", "status").is_ok());
        let err = require_tool("definitely-not-a-real-tool-xyz", "install").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ServiceError>(),
            Some(ServiceError::PlatformNotSupported { .. })
        ));
    }
}
