// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Multi-agent orchestration module.
//!
//! Runs several coding agents in parallel against one git repository, each
//! in its own worktree on its own branch.
//!
//! # Architecture
//!
//! - **WorkspaceIsolator**: creates, diffs, merges and removes per-agent
//!   workspaces. [`GitWorktreeIsolator`] implements it with `git worktree`.
//!
//! - **AgentManager**: owns the agent and task registries, enforces the agent
//!   state machine and is the single entry point for callers.
//!
//! - **Task pipeline**: runs each assigned task asynchronously through an
//!   [`Executor`], bounded by a concurrency limit. Exactly one outcome is
//!   recorded per task, whichever of completion, failure or stop comes first.
//!
//! - **EventBus**: broadcasts every state change as an [`OrchestratorEvent`].
//!
//! ```text
//!  caller ──▶ AgentManager ──▶ WorkspaceIsolator ──▶ git worktree add/remove/merge
//!                  │
//!                  ├──▶ task pipeline ──▶ Executor (subprocess / placeholder)
//!                  │
//!                  └──▶ EventBus ──▶ subscribers (CLI, persistence sink, ...)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use minion::orchestrate::{
//!     AgentManager, GitWorktreeIsolator, ManagerOptions, PlaceholderExecutor, TaskRequest,
//! };
//!
//! let isolator = GitWorktreeIsolator::open(repo_root, ".minion-worktrees").await?;
//! let manager = AgentManager::new(
//!     Arc::new(isolator),
//!     Arc::new(PlaceholderExecutor::default()),
//!     ManagerOptions::default(),
//! );
//!
//! let agent = manager.create_agent("Alice").await?;
//! let task = manager.assign_task(&agent.id, TaskRequest::new("write tests")).await?;
//! let finished = manager.wait_for_task(&task.id).await;
//! println!("{}", manager.get_diff(&agent.id, None).await?);
//! manager.shutdown().await;
//! ```

pub mod events;
pub mod executor;
pub mod isolation;
pub mod manager;
mod pipeline;
pub mod types;
pub mod worktree;

pub use events::{EventBus, EventSubscription, OrchestratorEvent, DEFAULT_EVENT_CAPACITY};
pub use executor::{
    executor_from_config, CommandExecutor, Executor, ExecutorError, PlaceholderExecutor,
    SharedExecutor,
};
pub use isolation::{
    derive_branch_name, find_repo_root, normalize_name, validate_branch_name,
    worktree_path_for_agent, IsolationError, WorkspaceIsolator, DEFAULT_BRANCH_PREFIX,
};
pub use manager::{AgentManager, ErrorKind, ManagerError, ManagerOptions};
pub use pipeline::{AGENT_STOPPED, EXECUTOR_PANICKED};
pub use types::{Agent, AgentStatus, Task, TaskRequest, TaskStatus, Workspace};
pub use worktree::{GitWorktreeIsolator, DEFAULT_WORKTREES_DIR};
