// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the structure of workspace and resolved configuration,
//! supporting JSON and YAML formats.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Workspace configuration for Minion.
/// Can be defined in .minion.json or .minion/config.json in the project root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Directory holding agent worktrees, relative to the repository root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktrees_dir: Option<PathBuf>,

    /// Prefix for agent branch names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_prefix: Option<String>,

    /// Branch that diffs and merges target by default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_target_branch: Option<String>,

    /// Maximum number of tasks executing at once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_tasks: Option<usize>,

    /// Events buffered per subscriber before the oldest are dropped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_capacity: Option<usize>,

    /// SQLite database for agent and task history
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Record agents, tasks and logs in the database
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist: Option<bool>,

    /// How tasks are executed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorConfig>,
}

/// Executor backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    /// Simulated work; echoes the prompt.
    #[default]
    Placeholder,
    /// External agent CLI.
    Command,
}

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorConfig {
    #[serde(default)]
    pub kind: ExecutorKind,

    /// Program to run for `command` executors
    #[serde(default = "default_executor_command")]
    pub command: String,

    /// Arguments placed before the prompt
    #[serde(default)]
    pub args: Vec<String>,

    /// Kill executions running longer than this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_executor_command() -> String {
    "claude".to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            kind: ExecutorKind::Placeholder,
            command: default_executor_command(),
            args: vec!["-p".to_string()],
            timeout_ms: None,
        }
    }
}

/// Resolved configuration with all values set.
/// This is the merged result of global, workspace, local, and CLI configs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub worktrees_dir: PathBuf,
    pub branch_prefix: String,
    pub default_target_branch: String,
    pub max_concurrent_tasks: usize,
    pub event_capacity: usize,
    pub database_path: PathBuf,
    pub persist: bool,
    pub executor: ExecutorConfig,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            worktrees_dir: PathBuf::from(".minion-worktrees"),
            branch_prefix: "minion/".to_string(),
            default_target_branch: "main".to_string(),
            max_concurrent_tasks: 4,
            event_capacity: 256,
            database_path: PathBuf::from(".minion/minion.db"),
            persist: true,
            executor: ExecutorConfig::default(),
        }
    }
}

impl ResolvedConfig {
    /// Database path resolved against the repository root.
    pub fn database_path_in(&self, repo_root: &std::path::Path) -> PathBuf {
        if self.database_path.is_absolute() {
            self.database_path.clone()
        } else {
            repo_root.join(&self.database_path)
        }
    }
}
