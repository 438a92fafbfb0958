// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Minion - parallel coding agents in isolated git worktrees.
//!
//! Each agent gets its own branch and worktree inside the repository, runs
//! tasks asynchronously through a pluggable executor, and reports every state
//! change on an event bus. Results are reviewed as diffs and merged back.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`orchestrate`] - Agent lifecycle, task pipeline, events and worktree isolation
//! - [`store`] - SQLite history of agents, tasks and log lines
//! - [`config`] - Configuration loading and merging
//! - [`error`] - Error types and result aliases
//! - [`telemetry`] - Tracing and metrics infrastructure
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use minion::config::{load_config, CliOptions};
//! use minion::orchestrate::{executor_from_config, find_repo_root, GitWorktreeIsolator};
//! use minion::{AgentManager, ManagerOptions, TaskRequest};
//!
//! let repo = find_repo_root(&std::env::current_dir()?).expect("not a git repository");
//! let config = load_config(&repo, CliOptions::default())?;
//! let isolator = GitWorktreeIsolator::open(&repo, &config.worktrees_dir).await?;
//! let manager = AgentManager::new(
//!     Arc::new(isolator),
//!     executor_from_config(&config.executor),
//!     ManagerOptions::from(&config),
//! );
//!
//! let agent = manager.create_agent("Alice").await?;
//! manager.assign_task(&agent.id, TaskRequest::new("add unit tests")).await?;
//! ```

pub mod config;
pub mod error;
pub mod orchestrate;
pub mod store;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use error::{ConfigError, Result, StoreError};
pub use orchestrate::{
    Agent, AgentManager, AgentStatus, ErrorKind, EventBus, EventSubscription, ManagerError,
    ManagerOptions, OrchestratorEvent, Task, TaskRequest, TaskStatus, Workspace,
};

/// Minion version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let request = TaskRequest::new("write tests");
        assert_eq!(request.description, "write tests");
        assert_eq!(ManagerOptions::default().branch_prefix, "minion/");
    }
}
