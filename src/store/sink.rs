// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Event bus subscriber that writes history to an [`AgentStore`].

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::orchestrate::{EventSubscription, OrchestratorEvent, TaskStatus};

use super::AgentStore;

/// Background task draining an event subscription into a store.
pub struct PersistenceSink;

impl PersistenceSink {
    /// Spawn the sink. It ends when the event bus closes.
    pub fn spawn(mut events: EventSubscription, store: Arc<dyn AgentStore>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = apply_event(store.as_ref(), &event).await {
                    warn!(kind = event.kind(), agent_id = event.agent_id(), error = %e, "Failed to persist event");
                }
            }
            debug!("Persistence sink stopped");
        })
    }
}

/// Write one event to the store. Events without history are ignored.
pub async fn apply_event(
    store: &dyn AgentStore,
    event: &OrchestratorEvent,
) -> Result<(), StoreError> {
    match event {
        OrchestratorEvent::AgentCreated { agent, .. } => store.save_agent(agent).await,
        OrchestratorEvent::AgentStatusChanged {
            agent_id,
            status,
            timestamp,
        } => store.update_agent_status(agent_id, *status, *timestamp).await,
        OrchestratorEvent::TaskStatusChanged { task, .. } => {
            if task.status == TaskStatus::Pending {
                store.save_task(task).await
            } else {
                store.update_task_status(task).await
            }
        }
        OrchestratorEvent::AgentLog {
            agent_id,
            task_id,
            line,
            timestamp,
        } => {
            store
                .append_log(agent_id, task_id.as_deref(), line, *timestamp)
                .await
        }
        OrchestratorEvent::AgentRemoved {
            agent_id,
            timestamp,
        } => store.mark_agent_removed(agent_id, *timestamp).await,
        OrchestratorEvent::AgentStopped { .. }
        | OrchestratorEvent::TaskCompleted { .. }
        | OrchestratorEvent::TaskError { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrate::{Agent, AgentStatus, EventBus, Task, TaskRequest};
    use crate::store::SqliteStore;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_task_events_become_history() {
        let store = SqliteStore::open_in_memory().unwrap();
        let agent = Agent::new("a1", "Alice", PathBuf::from("/wt/a1"), "minion/alice-a1");
        let mut task = Task::new("a1", &TaskRequest::new("write tests"));

        apply_event(
            &store,
            &OrchestratorEvent::AgentCreated {
                agent,
                timestamp: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();
        apply_event(&store, &OrchestratorEvent::task_status_changed(&task))
            .await
            .unwrap();
        task.start();
        task.fail("network error");
        apply_event(&store, &OrchestratorEvent::task_status_changed(&task))
            .await
            .unwrap();
        apply_event(
            &store,
            &OrchestratorEvent::agent_status_changed("a1", AgentStatus::Error),
        )
        .await
        .unwrap();

        let record = store.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(record.agent.status, AgentStatus::Error);
        let tasks = store.list_tasks(Some("a1"), 10).await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Error);
        assert_eq!(tasks[0].error.as_deref(), Some("network error"));
    }

    #[tokio::test]
    async fn test_sink_drains_until_bus_closes() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let bus = EventBus::new(16);
        let handle = PersistenceSink::spawn(bus.subscribe(), store.clone());

        bus.emit(OrchestratorEvent::AgentCreated {
            agent: Agent::new("a1", "Alice", PathBuf::from("/wt/a1"), "minion/alice-a1"),
            timestamp: chrono::Utc::now(),
        });
        bus.agent_log("a1", Some("t1"), "compiling");
        bus.emit(OrchestratorEvent::AgentRemoved {
            agent_id: "a1".into(),
            timestamp: chrono::Utc::now(),
        });
        drop(bus);
        handle.await.unwrap();

        let all = store.list_agents(true).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].removed_at.is_some());
        let logs = store.logs_for_task("t1").await.unwrap();
        assert_eq!(logs[0].line, "compiling");
    }

    #[tokio::test]
    async fn test_store_errors_do_not_stop_the_sink() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let bus = EventBus::new(16);
        let handle = PersistenceSink::spawn(bus.subscribe(), store.clone());

        // Updating a task that was never saved fails
        let mut task = Task::new("a1", &TaskRequest::new("x"));
        task.start();
        bus.emit(OrchestratorEvent::task_status_changed(&task));
        bus.agent_log("a1", Some("t1"), "still here");
        drop(bus);
        handle.await.unwrap();

        assert_eq!(store.logs_for_task("t1").await.unwrap().len(), 1);
    }
}
