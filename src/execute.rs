//! Code execution against an external interpreter.
//!
//! Snippets run as `<interpreter> -c <code>` in a child process with piped
//! output and a hard timeout. There is no filesystem or network isolation;
//! the timeout is the only resource bound.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured output of one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionOutcome {
    /// An outcome where the runner itself failed; the reason goes to stderr.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: reason.into(),
        }
    }

    /// Whether anything was written to the error stream.
    pub fn is_error(&self) -> bool {
        !self.stderr.is_empty()
    }
}

/// Something that can execute a code snippet.
///
/// Never fails: runner problems (spawn errors, timeouts) are reported
/// through `stderr` so every attempt still counts as a run.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(&self, code: &str) -> ExecutionOutcome;
}

/// Runs snippets in a fresh interpreter process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    interpreter: String,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CodeRunner for ProcessRunner {
    async fn run(&self, code: &str) -> ExecutionOutcome {
        let child = Command::new(&self.interpreter)
            .arg("-c")
            .arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("Failed to spawn {}: {}", self.interpreter, e);
                return ExecutionOutcome::failed(e.to_string());
            }
        };

        // Dropping the child on timeout kills it.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => ExecutionOutcome {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(e)) => ExecutionOutcome::failed(e.to_string()),
            Err(_) => {
                tracing::debug!("Execution exceeded {:?}", self.timeout);
                ExecutionOutcome::failed(format!(
                    "Execution timed out after {} seconds",
                    self.timeout.as_secs_f64()
                ))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(timeout_ms: u64) -> ProcessRunner {
        ProcessRunner::new("sh", Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let outcome = shell(2000).run("echo hello").await;
        assert_eq!(outcome.stdout, "hello\n");
        assert!(!outcome.is_error());
    }

    #[tokio::test]
    async fn test_captures_stderr() {
        let outcome = shell(2000).run("echo oops 1>&2").await;
        assert_eq!(outcome.stderr, "oops\n");
        assert!(outcome.is_error());
    }

    #[tokio::test]
    async fn test_timeout_reports_error() {
        let outcome = ProcessRunner::new("sh", Duration::from_secs(1))
            .run("sleep 5")
            .await;
        assert_eq!(outcome.stderr, "Execution timed out after 1 seconds");
        assert!(outcome.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let outcome = ProcessRunner::new("definitely-not-an-interpreter", Duration::from_secs(1))
            .run("print(1)")
            .await;
        assert!(outcome.is_error());
        assert!(outcome.stdout.is_empty());
    }
}
