// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SQLite-backed agent store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::StoreError;
use crate::orchestrate::{Agent, AgentStatus, Task, TaskStatus};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::{AgentRecord, AgentStore, LogLine};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Agent store using SQLite.
///
/// The connection sits behind a mutex and every call runs on the blocking
/// thread pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create a database at a specific path.
    pub fn open_at(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Open(format!("Failed to create directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| StoreError::Open(format!("{}: {}", db_path.display(), e)))?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| StoreError::Open(format!("Failed to set pragmas: {}", e)))?;

        Self::with_connection(conn, Some(db_path.to_path_buf()))
    }

    /// Open a throwaway in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open(e.to_string()))?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Database file, if not in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Database("connection lock poisoned".into()))?;
            f(&conn)
        })
        .await?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation(op, start.elapsed());
        #[cfg(not(feature = "telemetry"))]
        let _ = op;

        result
    }

    /// Agents, newest first. Removed agents only with `include_removed`.
    pub async fn list_agents(&self, include_removed: bool) -> Result<Vec<AgentRecord>, StoreError> {
        self.with_conn("store.list_agents", move |conn| {
            let sql = if include_removed {
                "SELECT * FROM agents ORDER BY created_at DESC"
            } else {
                "SELECT * FROM agents WHERE removed_at IS NULL ORDER BY created_at DESC"
            };
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map([], |row| Ok(agent_from_row(row)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().collect()
        })
        .await
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, StoreError> {
        let agent_id = agent_id.to_string();
        self.with_conn("store.get_agent", move |conn| {
            conn.query_row("SELECT * FROM agents WHERE id = ?1", params![agent_id], |row| {
                Ok(agent_from_row(row))
            })
            .optional()?
            .transpose()
        })
        .await
    }

    /// Tasks, newest first, optionally for one agent.
    pub async fn list_tasks(
        &self,
        agent_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Task>, StoreError> {
        let agent_id = agent_id.map(str::to_string);
        self.with_conn("store.list_tasks", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM tasks WHERE (?1 IS NULL OR agent_id = ?1)
                 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![agent_id, limit as i64], |row| Ok(task_from_row(row)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().collect()
        })
        .await
    }

    /// Log lines of a task in insertion order.
    pub async fn logs_for_task(&self, task_id: &str) -> Result<Vec<LogLine>, StoreError> {
        let task_id = task_id.to_string();
        self.with_conn("store.logs_for_task", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT agent_id, task_id, line, created_at FROM agent_logs
                 WHERE task_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![task_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            rows.map(|row| -> Result<LogLine, StoreError> {
                let (agent_id, task_id, line, created_at) = row?;
                Ok(LogLine {
                    agent_id,
                    task_id,
                    line,
                    created_at: parse_time(&created_at)?,
                })
            })
            .collect()
        })
        .await
    }
}

#[async_trait]
impl AgentStore for SqliteStore {
    async fn save_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        let agent = agent.clone();
        self.with_conn("store.save_agent", move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO agents
                 (id, name, status, workspace_path, branch_name, current_task,
                  created_at, last_activity, removed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
                params![
                    agent.id,
                    agent.name,
                    agent.status.as_str(),
                    agent.workspace_path.to_string_lossy().into_owned(),
                    agent.branch_name,
                    agent.current_task,
                    agent.created_at.to_rfc3339(),
                    agent.last_activity.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let agent_id = agent_id.to_string();
        self.with_conn("store.update_agent_status", move |conn| {
            conn.execute(
                "UPDATE agents SET status = ?2, last_activity = ?3 WHERE id = ?1",
                params![agent_id, status.as_str(), at.to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        let task = task.clone();
        self.with_conn("store.save_task", move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO tasks
                 (id, agent_id, description, context, status, created_at,
                  started_at, completed_at, output, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    task.id,
                    task.agent_id,
                    task.description,
                    task.context,
                    task.status.as_str(),
                    task.created_at.to_rfc3339(),
                    task.started_at.map(|t| t.to_rfc3339()),
                    task.completed_at.map(|t| t.to_rfc3339()),
                    task.output,
                    task.error,
                ],
            )?;
            // The agent now points at this task
            conn.execute(
                "UPDATE agents SET current_task = ?2 WHERE id = ?1",
                params![task.agent_id, task.id],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_task_status(&self, task: &Task) -> Result<(), StoreError> {
        let task = task.clone();
        self.with_conn("store.update_task_status", move |conn| {
            let updated = conn.execute(
                "UPDATE tasks SET status = ?2, started_at = ?3, completed_at = ?4,
                 output = ?5, error = ?6 WHERE id = ?1",
                params![
                    task.id,
                    task.status.as_str(),
                    task.started_at.map(|t| t.to_rfc3339()),
                    task.completed_at.map(|t| t.to_rfc3339()),
                    task.output,
                    task.error,
                ],
            )?;
            if updated == 0 {
                return Err(StoreError::Database(format!("Task {} not found", task.id)));
            }
            Ok(())
        })
        .await
    }

    async fn append_log(
        &self,
        agent_id: &str,
        task_id: Option<&str>,
        line: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let (agent_id, task_id, line) = (
            agent_id.to_string(),
            task_id.map(str::to_string),
            line.to_string(),
        );
        self.with_conn("store.append_log", move |conn| {
            conn.execute(
                "INSERT INTO agent_logs (agent_id, task_id, line, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![agent_id, task_id, line, at.to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn mark_agent_removed(
        &self,
        agent_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let agent_id = agent_id.to_string();
        self.with_conn("store.mark_agent_removed", move |conn| {
            conn.execute(
                "UPDATE agents SET removed_at = ?2 WHERE id = ?1",
                params![agent_id, at.to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }
}

/// Initialize the database schema.
fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            workspace_path TEXT NOT NULL,
            branch_name TEXT NOT NULL,
            current_task TEXT,
            created_at TEXT NOT NULL,
            last_activity TEXT NOT NULL,
            removed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            description TEXT NOT NULL,
            context TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            output TEXT,
            error TEXT,
            FOREIGN KEY (agent_id) REFERENCES agents(id)
        );

        CREATE TABLE IF NOT EXISTS agent_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_id TEXT NOT NULL,
            task_id TEXT,
            line TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_agent_id ON tasks(agent_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_logs_task_id ON agent_logs(task_id);
        "#,
    )
    .map_err(|e| StoreError::Open(format!("Failed to create schema: {}", e)))?;

    let current_version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    if current_version.is_none() {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
    }

    Ok(())
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {}", value, e)))
}

fn parse_optional_time(value: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.as_deref().map(parse_time).transpose()
}

fn agent_from_row(row: &Row<'_>) -> Result<AgentRecord, StoreError> {
    let status: String = row.get("status")?;
    let workspace_path: String = row.get("workspace_path")?;
    let created_at: String = row.get("created_at")?;
    let last_activity: String = row.get("last_activity")?;

    Ok(AgentRecord {
        agent: Agent {
            id: row.get("id")?,
            name: row.get("name")?,
            status: status.parse::<AgentStatus>().map_err(StoreError::Corrupt)?,
            workspace_path: PathBuf::from(workspace_path),
            branch_name: row.get("branch_name")?,
            current_task: row.get("current_task")?,
            created_at: parse_time(&created_at)?,
            last_activity: parse_time(&last_activity)?,
        },
        removed_at: parse_optional_time(row.get("removed_at")?)?,
    })
}

fn task_from_row(row: &Row<'_>) -> Result<Task, StoreError> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;

    Ok(Task {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        description: row.get("description")?,
        context: row.get("context")?,
        status: status.parse::<TaskStatus>().map_err(StoreError::Corrupt)?,
        created_at: parse_time(&created_at)?,
        started_at: parse_optional_time(row.get("started_at")?)?,
        completed_at: parse_optional_time(row.get("completed_at")?)?,
        output: row.get("output")?,
        error: row.get("error")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrate::TaskRequest;
    use tempfile::tempdir;

    fn agent(id: &str) -> Agent {
        Agent::new(id, "Alice", PathBuf::from("/wt").join(id), format!("minion/alice-{}", id))
    }

    #[tokio::test]
    async fn test_agent_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let agent = agent("a1");
        store.save_agent(&agent).await.unwrap();

        let record = store.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(record.agent.name, "Alice");
        assert_eq!(record.agent.status, AgentStatus::Idle);
        assert_eq!(record.agent.workspace_path, PathBuf::from("/wt/a1"));
        assert!(record.removed_at.is_none());

        store
            .update_agent_status("a1", AgentStatus::Running, Utc::now())
            .await
            .unwrap();
        let record = store.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(record.agent.status, AgentStatus::Running);
    }

    #[tokio::test]
    async fn test_task_lifecycle_is_persisted() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save_agent(&agent("a1")).await.unwrap();

        let mut task = Task::new("a1", &TaskRequest::new("write tests").with_context("ctx"));
        store.save_task(&task).await.unwrap();
        task.start();
        task.complete("done");
        store.update_task_status(&task).await.unwrap();

        let tasks = store.list_tasks(Some("a1"), 10).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        assert_eq!(tasks[0].output.as_deref(), Some("done"));
        assert_eq!(tasks[0].context.as_deref(), Some("ctx"));
        assert!(tasks[0].completed_at.is_some());

        let record = store.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(record.agent.current_task.as_deref(), Some(task.id.as_str()));
    }

    #[tokio::test]
    async fn test_update_unknown_task_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        let task = Task::new("a1", &TaskRequest::new("x"));
        assert!(store.update_task_status(&task).await.is_err());
    }

    #[tokio::test]
    async fn test_removed_agents_hidden_by_default() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save_agent(&agent("a1")).await.unwrap();
        store.save_agent(&agent("a2")).await.unwrap();
        store.mark_agent_removed("a1", Utc::now()).await.unwrap();

        let live = store.list_agents(false).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].agent.id, "a2");

        let all = store.list_agents(true).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|r| r.agent.id == "a1" && r.removed_at.is_some()));
    }

    #[tokio::test]
    async fn test_logs_in_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        for line in ["one", "two", "three"] {
            store.append_log("a1", Some("t1"), line, Utc::now()).await.unwrap();
        }
        store.append_log("a1", None, "agent-level", Utc::now()).await.unwrap();

        let lines: Vec<String> = store
            .logs_for_task("t1")
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.line)
            .collect();
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/minion.db");
        {
            let store = SqliteStore::open_at(&path).unwrap();
            store.save_agent(&agent("a1")).await.unwrap();
        }
        let store = SqliteStore::open_at(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert!(store.get_agent("a1").await.unwrap().is_some());
    }
}
