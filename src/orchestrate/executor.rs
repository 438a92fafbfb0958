// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Executors run a prompt inside an agent's workspace.
//!
//! The orchestrator only sees the [`Executor`] trait: hand it a prompt and a
//! working directory, await the output. Two implementations ship here:
//!
//! - [`PlaceholderExecutor`]: sleeps briefly and echoes the prompt back.
//! - [`CommandExecutor`]: runs an agent CLI (`claude -p`, `codex exec`, ...)
//!   in the workspace and returns its stdout.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::{ExecutorConfig, ExecutorKind};

/// Errors from executing a prompt.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The executor reported a failure; the message is recorded verbatim.
    #[error("{0}")]
    Failed(String),

    #[error("Failed to start agent command {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent command exited with {code:?}: {stderr}")]
    Exited { code: Option<i32>, stderr: String },

    #[error("Timed out after {0}ms")]
    Timeout(u64),
}

/// Runs one prompt against a working directory.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute `prompt` with `working_dir` as the agent's checkout.
    async fn execute(&self, prompt: &str, working_dir: &Path) -> Result<String, ExecutorError>;
}

/// Shared executor handle.
pub type SharedExecutor = Arc<dyn Executor>;

/// Build the executor described by configuration.
pub fn executor_from_config(config: &ExecutorConfig) -> SharedExecutor {
    match config.kind {
        ExecutorKind::Placeholder => Arc::new(PlaceholderExecutor::default()),
        ExecutorKind::Command => {
            let mut executor = CommandExecutor::new(config.command.clone(), config.args.clone());
            if let Some(ms) = config.timeout_ms {
                executor = executor.with_timeout(Duration::from_millis(ms));
            }
            Arc::new(executor)
        }
    }
}

// ============================================================================
// Placeholder
// ============================================================================

/// Stand-in executor that simulates work.
#[derive(Debug, Clone)]
pub struct PlaceholderExecutor {
    delay: Duration,
}

impl PlaceholderExecutor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for PlaceholderExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl Executor for PlaceholderExecutor {
    async fn execute(&self, prompt: &str, working_dir: &Path) -> Result<String, ExecutorError> {
        tokio::time::sleep(self.delay).await;
        Ok(format!(
            "Agent executed task in {}\n\nPrompt: {}",
            working_dir.display(),
            prompt
        ))
    }
}

// ============================================================================
// External command
// ============================================================================

/// Runs an external agent CLI with the prompt as its last argument.
///
/// The child is killed if the execution future is dropped, so aborting the
/// surrounding task stops the agent process too.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
        }
    }

    /// Fail executions that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn run(&self, prompt: &str, working_dir: &Path) -> Result<String, ExecutorError> {
        debug!("Running {} in {:?}", self.program, working_dir);
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(prompt)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExecutorError::Spawn {
                command: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(ExecutorError::Exited {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(&self, prompt: &str, working_dir: &Path) -> Result<String, ExecutorError> {
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.run(prompt, working_dir))
                .await
                .map_err(|_| ExecutorError::Timeout(timeout.as_millis() as u64))?,
            None => self.run(prompt, working_dir).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_placeholder_echoes_prompt() {
        let executor = PlaceholderExecutor::new(Duration::from_millis(1));
        let output = executor
            .execute("write tests", Path::new("/tmp/ws"))
            .await
            .unwrap();
        assert!(output.contains("write tests"));
        assert!(output.contains("/tmp/ws"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_executor_returns_stdout() {
        let dir = tempdir().unwrap();
        let executor = CommandExecutor::new("echo", vec!["prompt:".to_string()]);
        let output = executor.execute("hello", dir.path()).await.unwrap();
        assert_eq!(output.trim(), "prompt: hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_executor_runs_in_working_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let executor = CommandExecutor::new("cat", vec![]);
        let output = executor.execute("marker.txt", dir.path()).await.unwrap();
        assert_eq!(output, "here");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_executor_nonzero_exit() {
        let dir = tempdir().unwrap();
        let executor = CommandExecutor::new("sh", vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()]);
        let err = executor.execute("ignored", dir.path()).await.unwrap_err();
        match err {
            ExecutorError::Exited { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("Expected Exited, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_executor_timeout() {
        let dir = tempdir().unwrap();
        let executor = CommandExecutor::new("sleep", vec![])
            .with_timeout(Duration::from_millis(50));
        let err = executor.execute("5", dir.path()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Timeout(50)));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempdir().unwrap();
        let executor = CommandExecutor::new("minion-no-such-binary", vec![]);
        let err = executor.execute("x", dir.path()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Spawn { .. }));
    }

    #[test]
    fn test_failed_message_is_verbatim() {
        assert_eq!(ExecutorError::Failed("network error".into()).to_string(), "network error");
    }
}
