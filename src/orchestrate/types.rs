// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for agent orchestration.
//!
//! These are the records the lifecycle manager owns (agents, tasks) and the
//! records the workspace layer owns (workspaces). All of them serialize to the
//! camelCase JSON shape the transport layer hands to clients.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Agent
// ============================================================================

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Created, never assigned a task.
    Idle,
    /// Executing a task.
    Running,
    /// Last task finished successfully.
    Completed,
    /// Last task failed.
    Error,
    /// Stopped by a caller.
    Stopped,
}

impl AgentStatus {
    /// Whether a new task may be assigned in this state.
    pub fn is_assignable(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown agent status: {}", other)),
        }
    }
}

/// A logical worker bound to one isolated workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Caller-supplied display name. Not unique.
    pub name: String,
    /// Current status.
    pub status: AgentStatus,
    /// Absolute path of the agent's worktree.
    pub workspace_path: PathBuf,
    /// Branch checked out in the worktree.
    pub branch_name: String,
    /// Task currently or most recently assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Updated on every status transition.
    pub last_activity: DateTime<Utc>,
}

impl Agent {
    /// Create an idle agent record.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        workspace_path: PathBuf,
        branch_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            status: AgentStatus::Idle,
            workspace_path,
            branch_name: branch_name.into(),
            current_task: None,
            created_at: now,
            last_activity: now,
        }
    }

    /// Apply a status transition and bump `last_activity`.
    pub fn transition(&mut self, status: AgentStatus) {
        self.status = status;
        self.last_activity = Utc::now();
    }
}

// ============================================================================
// Task
// ============================================================================

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl TaskStatus {
    /// Check if this status represents a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// One unit of work submitted to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    /// Owning agent.
    pub agent_id: String,
    /// Instruction text.
    pub description: String,
    /// Supplementary text prepended to the description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Set only when the task completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Set only when the task failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// Create a pending task for an agent.
    pub fn new(agent_id: impl Into<String>, request: &TaskRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            description: request.description.clone(),
            context: request.context.clone(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
        }
    }

    /// Build the prompt handed to the executor.
    ///
    /// Context, when present, comes first separated by a blank line.
    pub fn prompt(&self) -> String {
        match self.context.as_deref() {
            Some(context) if !context.is_empty() => {
                format!("{}\n\n{}", context, self.description)
            }
            _ => self.description.clone(),
        }
    }

    /// Mark the task running.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the task completed with its output.
    pub fn complete(&mut self, output: impl Into<String>) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.output = Some(output.into());
        self.error = None;
    }

    /// Mark the task failed.
    ///
    /// A task failed before it ever started still gets `started_at` so that
    /// `started_at <= completed_at` holds for every terminal task.
    pub fn fail(&mut self, error: impl Into<String>) {
        let now = Utc::now();
        self.status = TaskStatus::Error;
        self.started_at.get_or_insert(now);
        self.completed_at = Some(now);
        self.error = Some(error.into());
        self.output = None;
    }
}

/// Request to assign a task to an agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl TaskRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

// ============================================================================
// Workspace
// ============================================================================

/// A git worktree bound to one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    /// Worktree directory.
    pub path: PathBuf,
    /// Branch checked out in the worktree.
    pub branch_name: String,
    /// Owning agent.
    pub agent_id: String,
    /// True from creation until removal.
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_without_context() {
        let task = Task::new("a1", &TaskRequest::new("write tests"));
        assert_eq!(task.prompt(), "write tests");
    }

    #[test]
    fn test_prompt_with_context() {
        let request = TaskRequest::new("write tests").with_context("repo uses tokio");
        let task = Task::new("a1", &request);
        assert_eq!(task.prompt(), "repo uses tokio\n\nwrite tests");
    }

    #[test]
    fn test_prompt_ignores_empty_context() {
        let request = TaskRequest::new("write tests").with_context("");
        let task = Task::new("a1", &request);
        assert_eq!(task.prompt(), "write tests");
    }

    #[test]
    fn test_task_outcomes_are_exclusive() {
        let mut task = Task::new("a1", &TaskRequest::new("x"));
        task.start();
        task.complete("done");
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.output.as_deref(), Some("done"));
        assert!(task.error.is_none());
        assert!(task.started_at.unwrap() <= task.completed_at.unwrap());

        let mut task = Task::new("a1", &TaskRequest::new("x"));
        task.start();
        task.fail("network error");
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.error.as_deref(), Some("network error"));
        assert!(task.output.is_none());
    }

    #[test]
    fn test_fail_before_start_sets_started_at() {
        let mut task = Task::new("a1", &TaskRequest::new("x"));
        task.fail("Agent stopped");
        assert!(task.started_at.is_some());
        assert!(task.started_at <= task.completed_at);
    }

    #[test]
    fn test_agent_status_assignable() {
        assert!(AgentStatus::Idle.is_assignable());
        assert!(AgentStatus::Completed.is_assignable());
        assert!(AgentStatus::Error.is_assignable());
        assert!(AgentStatus::Stopped.is_assignable());
        assert!(!AgentStatus::Running.is_assignable());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [AgentStatus::Idle, AgentStatus::Stopped] {
            assert_eq!(status.as_str().parse::<AgentStatus>(), Ok(status));
        }
        assert_eq!("error".parse::<TaskStatus>(), Ok(TaskStatus::Error));
        assert!("removed".parse::<AgentStatus>().is_err());
    }

    #[test]
    fn test_agent_serializes_camel_case() {
        let agent = Agent::new("id-1", "Alice", PathBuf::from("/tmp/wt/id-1"), "minion/alice-id-1");
        let json = serde_json::to_value(&agent).unwrap();
        assert_eq!(json["status"], "idle");
        assert_eq!(json["branchName"], "minion/alice-id-1");
        assert!(json.get("currentTask").is_none());
    }

    #[test]
    fn test_task_request_deserializes_without_context() {
        let request: TaskRequest = serde_json::from_str(r#"{"description":"fix bug"}"#).unwrap();
        assert_eq!(request.description, "fix bug");
        assert!(request.context.is_none());
    }
}
