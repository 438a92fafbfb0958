// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent lifecycle manager.
//!
//! Owns the agent and task registries, enforces the agent state machine and
//! coordinates the workspace isolator and the task pipeline.
//!
//! ```text
//!            assign_task                 executor ok
//!   idle ───────────────▶ running ─────────────────▶ completed
//!    ▲                     │   │  executor err          │
//!    │                     │   └─────────────────▶ error │
//!    │          stop_agent ▼                        │    │
//!    │                  stopped ◀───────────────────┴────┘
//!    │                     │ (completed/error/stopped accept new tasks)
//!    └── create_agent      ▼ remove_agent
//!                       removed
//! ```

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::config::ResolvedConfig;

use super::events::{EventBus, EventSubscription, OrchestratorEvent, DEFAULT_EVENT_CAPACITY};
use super::executor::SharedExecutor;
use super::isolation::{derive_branch_name, IsolationError, WorkspaceIsolator, DEFAULT_BRANCH_PREFIX};
use super::pipeline::{settle_locked, Outcome, Registry, SharedRegistry, TaskPipeline, AGENT_STOPPED};
use super::types::{Agent, AgentStatus, Task, TaskRequest, Workspace};

/// Error type for lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("name required")]
    NameRequired,

    #[error("description required")]
    DescriptionRequired,

    #[error("Agent {0} not found")]
    AgentNotFound(String),

    #[error("Agent {0} is already running a task")]
    AgentAlreadyRunning(String),

    #[error("Agent {0} is running. Use force=true to remove.")]
    AgentRunning(String),

    #[error("Agent {0} is being removed or merged")]
    AgentBusy(String),

    #[error(transparent)]
    Workspace(#[from] IsolationError),
}

/// Failure category of a [`ManagerError`], for mapping onto transport status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or an operation not allowed in the agent's current state.
    Validation,
    NotFound,
    /// Clashes with existing repository state (existing worktree, merge conflict).
    Conflict,
    /// An external process failed.
    External,
}

impl ManagerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NameRequired
            | Self::DescriptionRequired
            | Self::AgentAlreadyRunning(_)
            | Self::AgentRunning(_)
            | Self::AgentBusy(_) => ErrorKind::Validation,
            Self::AgentNotFound(_) => ErrorKind::NotFound,
            Self::Workspace(IsolationError::TargetNotFound(_)) => ErrorKind::NotFound,
            Self::Workspace(e) if e.is_not_found() => ErrorKind::NotFound,
            Self::Workspace(e) if e.is_conflict() => ErrorKind::Conflict,
            Self::Workspace(IsolationError::InvalidBranchName(_)) => ErrorKind::Validation,
            Self::Workspace(_) => ErrorKind::External,
        }
    }
}

/// Tunables for the lifecycle manager.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Prefix for derived agent branch names.
    pub branch_prefix: String,
    /// Target branch for diffs and merges when the caller names none.
    pub default_target_branch: String,
    /// Maximum number of tasks executing at once.
    pub max_concurrent_tasks: usize,
    /// Events buffered per subscriber.
    pub event_capacity: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            default_target_branch: "main".to_string(),
            max_concurrent_tasks: 4,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl From<&ResolvedConfig> for ManagerOptions {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            branch_prefix: config.branch_prefix.clone(),
            default_target_branch: config.default_target_branch.clone(),
            max_concurrent_tasks: config.max_concurrent_tasks,
            event_capacity: config.event_capacity,
        }
    }
}

/// Lifecycle manager for agents and their tasks.
pub struct AgentManager {
    isolator: Arc<dyn WorkspaceIsolator>,
    registry: SharedRegistry,
    pipeline: TaskPipeline,
    events: EventBus,
    options: ManagerOptions,
}

impl AgentManager {
    /// Create a manager over a workspace isolator and an executor.
    pub fn new(
        isolator: Arc<dyn WorkspaceIsolator>,
        executor: SharedExecutor,
        options: ManagerOptions,
    ) -> Self {
        let registry: SharedRegistry = Arc::new(RwLock::new(Registry::default()));
        let events = EventBus::new(options.event_capacity);
        let pipeline = TaskPipeline::new(
            Arc::clone(&registry),
            events.clone(),
            executor,
            options.max_concurrent_tasks,
        );

        Self {
            isolator,
            registry,
            pipeline,
            events,
            options,
        }
    }

    /// Publisher for orchestrator events.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to orchestrator events.
    pub fn subscribe(&self) -> EventSubscription {
        self.events.subscribe()
    }

    /// Create an agent with its own worktree and branch.
    ///
    /// The agent is registered only after its workspace exists.
    #[instrument(skip(self))]
    pub async fn create_agent(&self, name: &str) -> Result<Agent, ManagerError> {
        if name.trim().is_empty() {
            return Err(ManagerError::NameRequired);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let branch_name = derive_branch_name(&self.options.branch_prefix, name, &id);
        let workspace = self.isolator.create_worktree(&id, &branch_name).await?;

        let agent = Agent::new(&id, name, workspace.path, workspace.branch_name);
        self.registry
            .write()
            .await
            .agents
            .insert(id.clone(), agent.clone());

        info!("Created agent {} ({}) on {}", agent.name, agent.id, agent.branch_name);
        self.events.emit(OrchestratorEvent::AgentCreated {
            agent: agent.clone(),
            timestamp: Utc::now(),
        });

        Ok(agent)
    }

    /// Assign a task to an agent and start it in the background.
    ///
    /// Returns the task while still pending; progress is observable through
    /// events or [`get_task`](Self::get_task).
    #[instrument(skip(self, request), fields(description = %request.description))]
    pub async fn assign_task(
        &self,
        agent_id: &str,
        request: TaskRequest,
    ) -> Result<Task, ManagerError> {
        if request.description.trim().is_empty() {
            return Err(ManagerError::DescriptionRequired);
        }

        let (task, workspace_path) = {
            let mut registry = self.registry.write().await;
            if registry.retiring.contains(agent_id) {
                return Err(ManagerError::AgentBusy(agent_id.to_string()));
            }
            let agent = registry
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| ManagerError::AgentNotFound(agent_id.to_string()))?;
            if !agent.status.is_assignable() {
                return Err(ManagerError::AgentAlreadyRunning(agent_id.to_string()));
            }

            let task = Task::new(agent_id, &request);
            agent.current_task = Some(task.id.clone());
            agent.transition(AgentStatus::Running);
            let workspace_path = agent.workspace_path.clone();

            registry.tasks.insert(task.id.clone(), task.clone());
            self.events.emit(OrchestratorEvent::task_status_changed(&task));
            self.events
                .emit(OrchestratorEvent::agent_status_changed(agent_id, AgentStatus::Running));
            (task, workspace_path)
        };

        info!("Assigned task {} to agent {}", task.id, agent_id);
        self.pipeline.spawn(task.id.clone(), workspace_path);
        Ok(task)
    }

    /// Stop an agent. An unresolved current task fails with "Agent stopped"
    /// and its executor is aborted.
    #[instrument(skip(self))]
    pub async fn stop_agent(&self, agent_id: &str) -> Result<(), ManagerError> {
        let mut registry = self.registry.write().await;
        self.stop_locked(&mut registry, agent_id)
    }

    fn stop_locked(&self, registry: &mut Registry, agent_id: &str) -> Result<(), ManagerError> {
        let agent = registry
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| ManagerError::AgentNotFound(agent_id.to_string()))?;

        agent.transition(AgentStatus::Stopped);
        let current_task = agent.current_task.clone();
        self.events
            .emit(OrchestratorEvent::agent_status_changed(agent_id, AgentStatus::Stopped));

        if let Some(task_id) = current_task {
            settle_locked(
                registry,
                &self.events,
                &task_id,
                Outcome::Failed(AGENT_STOPPED.to_string()),
            );
        }

        info!("Stopped agent {}", agent_id);
        self.events.emit(OrchestratorEvent::AgentStopped {
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Remove an agent, its worktree and its tasks.
    ///
    /// A running agent is refused unless `force`, which stops it first.
    #[instrument(skip(self))]
    pub async fn remove_agent(&self, agent_id: &str, force: bool) -> Result<(), ManagerError> {
        self.begin_retiring(agent_id, force, ManagerError::AgentRunning)
            .await?;

        match self.isolator.remove_worktree(agent_id, force).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                warn!("Agent {} had no worktree to remove", agent_id);
            }
            Err(e) => {
                self.release_retiring(agent_id).await;
                return Err(e.into());
            }
        }

        self.forget_agent(agent_id).await;
        info!("Removed agent {}", agent_id);
        Ok(())
    }

    /// Mark an agent as retiring so no task can be assigned until
    /// [`release_retiring`](Self::release_retiring) or [`forget_agent`](Self::forget_agent).
    ///
    /// A running agent is refused with `refuse` unless `stop_running`, in
    /// which case it is stopped under the same lock.
    async fn begin_retiring(
        &self,
        agent_id: &str,
        stop_running: bool,
        refuse: fn(String) -> ManagerError,
    ) -> Result<Agent, ManagerError> {
        let mut registry = self.registry.write().await;
        let agent = registry
            .agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| ManagerError::AgentNotFound(agent_id.to_string()))?;
        if registry.retiring.contains(agent_id) {
            return Err(ManagerError::AgentBusy(agent_id.to_string()));
        }

        if agent.status == AgentStatus::Running {
            if !stop_running {
                return Err(refuse(agent_id.to_string()));
            }
            self.stop_locked(&mut registry, agent_id)?;
        }

        registry.retiring.insert(agent_id.to_string());
        Ok(agent)
    }

    async fn release_retiring(&self, agent_id: &str) {
        self.registry.write().await.retiring.remove(agent_id);
    }

    /// Drop an agent and its tasks from the registry.
    async fn forget_agent(&self, agent_id: &str) {
        {
            let mut registry = self.registry.write().await;
            registry.agents.remove(agent_id);
            registry.retiring.remove(agent_id);
            let task_ids: Vec<String> = registry
                .tasks
                .values()
                .filter(|task| task.agent_id == agent_id)
                .map(|task| task.id.clone())
                .collect();
            for task_id in task_ids {
                registry.tasks.remove(&task_id);
                if let Some(run) = registry.runs.remove(&task_id) {
                    run.abort();
                }
            }
        }

        self.events.emit(OrchestratorEvent::AgentRemoved {
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<Agent> {
        self.registry.read().await.agents.get(agent_id).cloned()
    }

    /// All agents, oldest first.
    pub async fn list_agents(&self) -> Vec<Agent> {
        let registry = self.registry.read().await;
        let mut agents: Vec<Agent> = registry.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        agents
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.registry.read().await.tasks.get(task_id).cloned()
    }

    /// Tasks of an agent, oldest first.
    pub async fn list_tasks_for_agent(&self, agent_id: &str) -> Vec<Task> {
        let registry = self.registry.read().await;
        let mut tasks: Vec<Task> = registry
            .tasks
            .values()
            .filter(|task| task.agent_id == agent_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// Wait until a task reaches a terminal status.
    ///
    /// Returns `None` if the task does not exist or is dropped while waiting.
    pub async fn wait_for_task(&self, task_id: &str) -> Option<Task> {
        let mut events = self.events.subscribe();
        loop {
            let task = self.get_task(task_id).await?;
            if task.status.is_terminal() {
                return Some(task);
            }
            match events.recv().await {
                Some(_) => continue,
                None => return self.get_task(task_id).await,
            }
        }
    }

    /// Diff of the agent's branch against `target_branch` (or the default).
    #[instrument(skip(self))]
    pub async fn get_diff(
        &self,
        agent_id: &str,
        target_branch: Option<&str>,
    ) -> Result<String, ManagerError> {
        self.require_agent(agent_id).await?;
        let target = target_branch.unwrap_or(&self.options.default_target_branch);
        Ok(self.isolator.get_diff(agent_id, target).await?)
    }

    /// Merge the agent's branch into `target_branch` (or the default).
    ///
    /// With `delete_branch` the agent is retired: its worktree and branch are
    /// removed and the agent leaves the registry.
    #[instrument(skip(self))]
    pub async fn merge_branch(
        &self,
        agent_id: &str,
        target_branch: Option<&str>,
        delete_branch: bool,
    ) -> Result<(), ManagerError> {
        let agent = self
            .begin_retiring(agent_id, false, ManagerError::AgentAlreadyRunning)
            .await?;

        let target = target_branch.unwrap_or(&self.options.default_target_branch);
        let merged = self
            .isolator
            .merge_branch(agent_id, target, delete_branch)
            .await;
        if let Err(e) = merged {
            self.release_retiring(agent_id).await;
            return Err(e.into());
        }
        info!("Merged {} into {}", agent.branch_name, target);

        if delete_branch {
            self.forget_agent(agent_id).await;
        } else {
            self.release_retiring(agent_id).await;
        }
        Ok(())
    }

    pub async fn list_workspaces(&self) -> Vec<Workspace> {
        self.isolator.list_workspaces().await
    }

    /// Force-remove every agent. Failures are logged per agent.
    pub async fn cleanup(&self) {
        let agent_ids: Vec<String> = self
            .registry
            .read()
            .await
            .agents
            .keys()
            .cloned()
            .collect();

        for agent_id in agent_ids {
            if let Err(e) = self.remove_agent(&agent_id, true).await {
                warn!("Failed to cleanup agent {}: {}", agent_id, e);
            }
        }
    }

    /// Remove every agent, then every remaining workspace.
    pub async fn shutdown(&self) {
        info!("Shutting down agent manager");
        self.cleanup().await;
        self.isolator.cleanup().await;
    }

    async fn require_agent(&self, agent_id: &str) -> Result<Agent, ManagerError> {
        self.get_agent(agent_id)
            .await
            .ok_or_else(|| ManagerError::AgentNotFound(agent_id.to_string()))
    }
}
