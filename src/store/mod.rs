// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent and task history.
//!
//! The orchestrator keeps its authoritative state in memory. A store is a
//! best-effort side channel fed from the event bus by [`PersistenceSink`]:
//! a store failure is logged and never reaches the operation that emitted
//! the event.

pub mod sink;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::orchestrate::{Agent, AgentStatus, Task};

pub use sink::{apply_event, PersistenceSink};
pub use sqlite::{SqliteStore, SCHEMA_VERSION};

/// Durable record of agents, tasks and their log lines.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Insert or replace an agent.
    async fn save_agent(&self, agent: &Agent) -> Result<(), StoreError>;

    async fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Insert or replace a task.
    async fn save_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Update status, timestamps and result of an existing task.
    async fn update_task_status(&self, task: &Task) -> Result<(), StoreError>;

    async fn append_log(
        &self,
        agent_id: &str,
        task_id: Option<&str>,
        line: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record that an agent was removed. Its rows are kept.
    async fn mark_agent_removed(&self, agent_id: &str, at: DateTime<Utc>)
        -> Result<(), StoreError>;
}

/// An agent as persisted, including removal time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    #[serde(flatten)]
    pub agent: Agent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
}

/// One persisted line of agent output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub line: String,
    pub created_at: DateTime<Utc>,
}
