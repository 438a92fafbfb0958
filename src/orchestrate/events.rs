// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Orchestrator event fan-out.
//!
//! Every state change in the lifecycle manager and task pipeline is published
//! as an [`OrchestratorEvent`] on an [`EventBus`]. The bus is a bounded
//! `tokio::sync::broadcast` channel:
//!
//! - `emit` never blocks and never fails the emitter, even with no subscribers.
//! - Each subscriber has its own cursor. A subscriber that falls more than
//!   `capacity` events behind loses the oldest events and is told how many
//!   it skipped; the emitter is unaffected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::types::{Agent, AgentStatus, Task};

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A state change observed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OrchestratorEvent {
    AgentCreated {
        agent: Agent,
        timestamp: DateTime<Utc>,
    },
    AgentStatusChanged {
        agent_id: String,
        status: AgentStatus,
        timestamp: DateTime<Utc>,
    },
    AgentStopped {
        agent_id: String,
        timestamp: DateTime<Utc>,
    },
    AgentRemoved {
        agent_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Carries a full snapshot of the task after the transition.
    TaskStatusChanged {
        agent_id: String,
        task: Task,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        agent_id: String,
        task_id: String,
        output: String,
        timestamp: DateTime<Utc>,
    },
    TaskError {
        agent_id: String,
        task_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// Incremental output from a running task.
    AgentLog {
        agent_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        line: String,
        timestamp: DateTime<Utc>,
    },
}

impl OrchestratorEvent {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentCreated { .. } => "agent_created",
            Self::AgentStatusChanged { .. } => "agent_status_changed",
            Self::AgentStopped { .. } => "agent_stopped",
            Self::AgentRemoved { .. } => "agent_removed",
            Self::TaskStatusChanged { .. } => "task_status_changed",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskError { .. } => "task_error",
            Self::AgentLog { .. } => "agent_log",
        }
    }

    /// Agent the event concerns.
    pub fn agent_id(&self) -> &str {
        match self {
            Self::AgentCreated { agent, .. } => &agent.id,
            Self::AgentStatusChanged { agent_id, .. }
            | Self::AgentStopped { agent_id, .. }
            | Self::AgentRemoved { agent_id, .. }
            | Self::TaskStatusChanged { agent_id, .. }
            | Self::TaskCompleted { agent_id, .. }
            | Self::TaskError { agent_id, .. }
            | Self::AgentLog { agent_id, .. } => agent_id,
        }
    }

    pub fn agent_status_changed(agent_id: impl Into<String>, status: AgentStatus) -> Self {
        Self::AgentStatusChanged {
            agent_id: agent_id.into(),
            status,
            timestamp: Utc::now(),
        }
    }

    pub fn task_status_changed(task: &Task) -> Self {
        Self::TaskStatusChanged {
            agent_id: task.agent_id.clone(),
            task: task.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Publisher side of the event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to every current subscriber.
    pub fn emit(&self, event: OrchestratorEvent) {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(receivers) => debug!(kind, receivers, "Event emitted"),
            Err(_) => debug!(kind, "Event emitted with no subscribers"),
        }
    }

    /// Publish one line of incremental output for a task.
    pub fn agent_log(&self, agent_id: &str, task_id: Option<&str>, line: impl Into<String>) {
        self.emit(OrchestratorEvent::AgentLog {
            agent_id: agent_id.to_string(),
            task_id: task_id.map(str::to_string),
            line: line.into(),
            timestamp: Utc::now(),
        });
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            inner: self.sender.subscribe(),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Receiving side of the event channel.
pub struct EventSubscription {
    inner: broadcast::Receiver<OrchestratorEvent>,
}

impl EventSubscription {
    /// Wait for the next event.
    ///
    /// Returns `None` once every publisher is gone. Events dropped because
    /// this subscriber lagged are skipped with a warning.
    pub async fn recv(&mut self) -> Option<OrchestratorEvent> {
        loop {
            match self.inner.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<OrchestratorEvent> {
        loop {
            match self.inner.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, oldest events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}
