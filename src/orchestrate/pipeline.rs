// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Task execution pipeline.
//!
//! Each assigned task runs as its own tokio task, supervised by the pipeline:
//!
//! ```text
//! assign_task ──spawn──▶ run()
//!                          │ acquire permit (bounded concurrency)
//!                          │ pending → running
//!                          │ spawn executor, register abort handle
//!                          │ await executor
//!                          ▼
//!                        settle()  ◀── stop_agent (same path)
//! ```
//!
//! [`settle_locked`] is the only code that writes a terminal task status.
//! It applies an outcome only if the task is still unresolved, so a late
//! executor completion and a concurrent stop cannot both win.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
#[cfg(feature = "telemetry")]
use std::time::Instant;

use tokio::sync::{RwLock, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::events::{EventBus, OrchestratorEvent};
use super::executor::SharedExecutor;
use super::types::{Agent, AgentStatus, Task, TaskStatus};

/// Error recorded on a task whose agent was stopped.
pub const AGENT_STOPPED: &str = "Agent stopped";

/// Error recorded on a task whose executor panicked.
pub const EXECUTOR_PANICKED: &str = "Executor panicked";

/// In-memory agent and task records.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    pub agents: HashMap<String, Agent>,
    pub tasks: HashMap<String, Task>,
    /// Abort handles of in-flight executor calls by task id.
    pub runs: HashMap<String, AbortHandle>,
    /// Agents with a removal or merge in flight; they accept no tasks.
    pub retiring: HashSet<String>,
}

pub(crate) type SharedRegistry = Arc<RwLock<Registry>>;

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed(String),
    Failed(String),
}

/// Apply a terminal outcome to a task while holding the registry lock.
///
/// Returns false if the task is unknown or already terminal. The owning
/// agent moves to completed/error only while it is still running this task;
/// a stopped agent keeps its status.
pub(crate) fn settle_locked(
    registry: &mut Registry,
    events: &EventBus,
    task_id: &str,
    outcome: Outcome,
) -> bool {
    let Some(task) = registry.tasks.get_mut(task_id) else {
        return false;
    };
    if task.status.is_terminal() {
        debug!("Task {} already settled", task_id);
        return false;
    }

    let agent_status = match &outcome {
        Outcome::Completed(output) => {
            task.complete(output.clone());
            AgentStatus::Completed
        }
        Outcome::Failed(message) => {
            task.fail(message.clone());
            AgentStatus::Error
        }
    };
    let task = task.clone();

    if let Some(run) = registry.runs.remove(task_id) {
        run.abort();
    }

    events.emit(OrchestratorEvent::task_status_changed(&task));
    match outcome {
        Outcome::Completed(output) => {
            info!("Task {} completed", task_id);
            events.emit(OrchestratorEvent::TaskCompleted {
                agent_id: task.agent_id.clone(),
                task_id: task.id.clone(),
                output,
                timestamp: chrono::Utc::now(),
            });
        }
        Outcome::Failed(message) => {
            warn!("Task {} failed: {}", task_id, message);
            events.emit(OrchestratorEvent::TaskError {
                agent_id: task.agent_id.clone(),
                task_id: task.id.clone(),
                error: message,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    if let Some(agent) = registry.agents.get_mut(&task.agent_id) {
        let owns_agent = agent.current_task.as_deref() == Some(task_id);
        if owns_agent && agent.status == AgentStatus::Running {
            agent.transition(agent_status);
            events.emit(OrchestratorEvent::agent_status_changed(&agent.id, agent_status));
        }
    }

    true
}

/// Supervises task execution against agent workspaces.
#[derive(Clone)]
pub(crate) struct TaskPipeline {
    registry: SharedRegistry,
    events: EventBus,
    executor: SharedExecutor,
    permits: Arc<Semaphore>,
}

impl TaskPipeline {
    pub fn new(
        registry: SharedRegistry,
        events: EventBus,
        executor: SharedExecutor,
        max_concurrent: usize,
    ) -> Self {
        Self {
            registry,
            events,
            executor,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Start executing a pending task in the background.
    pub fn spawn(&self, task_id: String, workspace_path: PathBuf) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.run(task_id, workspace_path).await })
    }

    /// Apply an outcome under the registry write lock.
    pub async fn settle(&self, task_id: &str, outcome: Outcome) -> bool {
        let mut registry = self.registry.write().await;
        settle_locked(&mut registry, &self.events, task_id, outcome)
    }

    async fn run(self, task_id: String, workspace_path: PathBuf) {
        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.settle(&task_id, Outcome::Failed("Task pipeline closed".into()))
                    .await;
                return;
            }
        };

        let Some(prompt) = self.start_task(&task_id).await else {
            debug!("Task {} no longer pending, skipping", task_id);
            return;
        };

        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let executor = Arc::clone(&self.executor);
        let handle =
            tokio::spawn(async move { executor.execute(&prompt, &workspace_path).await });

        {
            let mut registry = self.registry.write().await;
            let still_running = registry
                .tasks
                .get(&task_id)
                .is_some_and(|task| task.status == TaskStatus::Running);
            if still_running {
                registry.runs.insert(task_id.clone(), handle.abort_handle());
            } else {
                handle.abort();
            }
        }

        let outcome = match handle.await {
            Ok(Ok(output)) => Outcome::Completed(output),
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(e) if e.is_cancelled() => {
                debug!("Executor for task {} cancelled", task_id);
                return;
            }
            Err(e) => {
                error!("Executor for task {} panicked: {}", task_id, e);
                Outcome::Failed(EXECUTOR_PANICKED.to_string())
            }
        };

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_task(
            start.elapsed(),
            matches!(outcome, Outcome::Completed(_)),
        );

        self.settle(&task_id, outcome).await;
    }

    /// Move a pending task to running and build its prompt.
    async fn start_task(&self, task_id: &str) -> Option<String> {
        let mut registry = self.registry.write().await;
        let task = registry.tasks.get_mut(task_id)?;
        if task.status != TaskStatus::Pending {
            return None;
        }
        task.start();
        let snapshot = task.clone();
        self.events
            .emit(OrchestratorEvent::task_status_changed(&snapshot));
        info!("Task {} running for agent {}", task_id, snapshot.agent_id);
        Some(snapshot.prompt())
    }
}
