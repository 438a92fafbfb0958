// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Git worktree isolator.
//!
//! Shells out to the `git` binary for every repository operation, always with
//! an explicit argument array. Worktrees live under a dedicated root inside
//! the repository (`.minion-worktrees/<agent-id>` by default).
//!
//! # Locking
//!
//! - `repo_lock` is a read/write lock over the main checkout. Worktree
//!   creation, removal and diffs hold it shared, so distinct agents overlap.
//!   Merges hold it exclusively because they move the main checkout's HEAD.
//! - `reservations` holds agent ids and branch names whose creation is in
//!   flight, so two creations can never race on the same path or branch.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::isolation::{
    validate_branch_name, worktree_path_for_agent, IsolationError, WorkspaceIsolator,
};
use super::types::Workspace;

/// Default directory (relative to the repo root) holding agent worktrees.
pub const DEFAULT_WORKTREES_DIR: &str = ".minion-worktrees";

/// Git worktree isolator for a single repository.
pub struct GitWorktreeIsolator {
    /// Path to the main repository root.
    repo_root: PathBuf,
    /// Directory under which worktrees are created.
    worktrees_root: PathBuf,
    /// Active workspaces by agent id.
    workspaces: Arc<RwLock<HashMap<String, Workspace>>>,
    /// Agent ids and branch names with a creation in flight.
    reservations: Arc<Mutex<HashSet<String>>>,
    /// Guards the main checkout.
    repo_lock: RwLock<()>,
}

/// Releases a creation reservation on drop.
struct Reservation {
    keys: [String; 2],
    set: Arc<Mutex<HashSet<String>>>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            for key in &self.keys {
                set.remove(key);
            }
        }
    }
}

impl GitWorktreeIsolator {
    /// Open the isolator against a repository.
    ///
    /// Verifies `repo_root` is inside a git repository and creates the
    /// worktrees directory. Failure here is fatal for the caller. A relative `worktrees_dir` is resolved against
    /// the repository root.
    pub async fn open(
        repo_root: impl AsRef<Path>,
        worktrees_dir: impl AsRef<Path>,
    ) -> Result<Self, IsolationError> {
        // Workspace paths handed to agents must be absolute
        let repo_root = tokio::fs::canonicalize(repo_root.as_ref())
            .await
            .map_err(|_| IsolationError::NotARepository(repo_root.as_ref().to_path_buf()))?;

        if let Err(e) = run_git(&repo_root, &["rev-parse", "--git-dir"]).await {
            debug!("git rev-parse failed: {}", e);
            return Err(IsolationError::NotARepository(repo_root));
        }

        let worktrees_root = if worktrees_dir.as_ref().is_absolute() {
            worktrees_dir.as_ref().to_path_buf()
        } else {
            repo_root.join(worktrees_dir)
        };
        tokio::fs::create_dir_all(&worktrees_root).await?;

        info!("Opened repository at {:?}", repo_root);

        Ok(Self {
            repo_root,
            worktrees_root,
            workspaces: Arc::new(RwLock::new(HashMap::new())),
            reservations: Arc::new(Mutex::new(HashSet::new())),
            repo_lock: RwLock::new(()),
        })
    }

    /// Run a git command in the main repository and return trimmed stdout.
    async fn git(&self, args: &[&str]) -> Result<String, IsolationError> {
        run_git(&self.repo_root, args)
            .await
            .map(|out| out.trim().to_string())
    }

    /// Reserve an agent id and branch for creation.
    async fn reserve(&self, agent_id: &str, branch: &str) -> Result<Reservation, IsolationError> {
        let workspaces = self.workspaces.read().await;
        let mut set = self
            .reservations
            .lock()
            .map_err(|_| IsolationError::WorktreeCreationFailed("reservation lock poisoned".into()))?;

        let agent_key = format!("agent:{}", agent_id);
        let branch_key = format!("branch:{}", branch);

        if workspaces.contains_key(agent_id) || set.contains(&agent_key) {
            return Err(IsolationError::WorkspaceExists(agent_id.to_string()));
        }
        if workspaces.values().any(|ws| ws.branch_name == branch) || set.contains(&branch_key) {
            return Err(IsolationError::BranchInUse(branch.to_string()));
        }

        set.insert(agent_key.clone());
        set.insert(branch_key.clone());

        Ok(Reservation {
            keys: [agent_key, branch_key],
            set: Arc::clone(&self.reservations),
        })
    }

    /// Remove a worktree directory via git.
    async fn remove_worktree_dir(&self, path: &Path, force: bool) -> Result<(), IsolationError> {
        let path_str = path.to_string_lossy().to_string();
        let mut args = vec!["worktree", "remove", path_str.as_str()];
        if force {
            args.push("--force");
        }
        self.git(&args).await.map(|_| ())
    }
}

#[async_trait]
impl WorkspaceIsolator for GitWorktreeIsolator {
    #[instrument(skip(self))]
    async fn create_worktree(
        &self,
        agent_id: &str,
        branch_name: &str,
    ) -> Result<Workspace, IsolationError> {
        validate_branch_name(branch_name)?;
        let _reservation = self.reserve(agent_id, branch_name).await?;

        let worktree_path = worktree_path_for_agent(&self.worktrees_root, agent_id);
        if worktree_path.exists() {
            return Err(IsolationError::WorkspaceExists(agent_id.to_string()));
        }

        let _repo = self.repo_lock.read().await;

        info!("Creating worktree for {} at {:?}", agent_id, worktree_path);

        // New branch from the main checkout's HEAD
        self.git(&["branch", branch_name])
            .await
            .map_err(|e| IsolationError::WorktreeCreationFailed(e.to_string()))?;

        let worktree_path_str = worktree_path.to_string_lossy().to_string();
        if let Err(e) = self
            .git(&["worktree", "add", &worktree_path_str, branch_name])
            .await
        {
            error!("Failed to create worktree: {}", e);
            // Roll back the branch so no orphan is left behind
            if let Err(rollback) = self.git(&["branch", "-D", branch_name]).await {
                warn!("Failed to roll back branch {}: {}", branch_name, rollback);
            }
            return Err(IsolationError::WorktreeCreationFailed(e.to_string()));
        }

        let workspace = Workspace {
            path: worktree_path,
            branch_name: branch_name.to_string(),
            agent_id: agent_id.to_string(),
            is_active: true,
        };

        self.workspaces
            .write()
            .await
            .insert(agent_id.to_string(), workspace.clone());

        debug!("Created worktree for {} on {}", agent_id, branch_name);
        Ok(workspace)
    }

    #[instrument(skip(self))]
    async fn remove_worktree(&self, agent_id: &str, force: bool) -> Result<(), IsolationError> {
        let workspace = self
            .get_workspace(agent_id)
            .await
            .ok_or_else(|| IsolationError::WorkspaceNotFound(agent_id.to_string()))?;

        let _repo = self.repo_lock.read().await;

        info!("Removing worktree for {} at {:?}", agent_id, workspace.path);
        self.remove_worktree_dir(&workspace.path, force)
            .await
            .map_err(|e| IsolationError::RemovalFailed(e.to_string()))?;

        self.workspaces.write().await.remove(agent_id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn merge_branch(
        &self,
        agent_id: &str,
        target_branch: &str,
        delete_branch: bool,
    ) -> Result<(), IsolationError> {
        validate_branch_name(target_branch)?;
        let workspace = self
            .get_workspace(agent_id)
            .await
            .ok_or_else(|| IsolationError::WorkspaceNotFound(agent_id.to_string()))?;

        // Exclusive: the main checkout's HEAD moves
        let _repo = self.repo_lock.write().await;

        info!("Merging {} into {}", workspace.branch_name, target_branch);

        let target_ref = format!("refs/heads/{}", target_branch);
        if self
            .git(&["rev-parse", "--verify", "--quiet", &target_ref])
            .await
            .is_err()
        {
            return Err(IsolationError::TargetNotFound(target_branch.to_string()));
        }

        self.git(&["checkout", target_branch])
            .await
            .map_err(|e| IsolationError::CheckoutFailed(e.to_string()))?;

        if let Err(e) = self
            .git(&["merge", &workspace.branch_name, "--no-edit"])
            .await
        {
            warn!("Merge of {} failed, aborting: {}", workspace.branch_name, e);
            if let Err(abort) = self.git(&["merge", "--abort"]).await {
                warn!("Failed to abort merge of {}: {}", workspace.branch_name, abort);
            }
            return Err(IsolationError::MergeFailed(e.to_string()));
        }

        if delete_branch {
            // git refuses to delete a branch checked out in a worktree
            self.remove_worktree_dir(&workspace.path, false)
                .await
                .map_err(|e| IsolationError::RemovalFailed(e.to_string()))?;
            self.workspaces.write().await.remove(agent_id);

            self.git(&["branch", "-d", &workspace.branch_name]).await?;
            info!("Retired workspace for {}", agent_id);
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_diff(&self, agent_id: &str, target_branch: &str) -> Result<String, IsolationError> {
        validate_branch_name(target_branch)?;
        let workspace = self
            .get_workspace(agent_id)
            .await
            .ok_or_else(|| IsolationError::WorkspaceNotFound(agent_id.to_string()))?;

        let _repo = self.repo_lock.read().await;

        let range = format!("{}...{}", target_branch, workspace.branch_name);
        run_git(&self.repo_root, &["diff", &range])
            .await
            .map_err(|e| IsolationError::DiffFailed(e.to_string()))
    }

    async fn list_workspaces(&self) -> Vec<Workspace> {
        let workspaces = self.workspaces.read().await;
        let mut list: Vec<Workspace> = workspaces.values().cloned().collect();
        list.sort_by(|a, b| a.path.cmp(&b.path));
        list
    }

    async fn get_workspace(&self, agent_id: &str) -> Option<Workspace> {
        self.workspaces.read().await.get(agent_id).cloned()
    }

    async fn cleanup(&self) {
        let agent_ids: Vec<String> = {
            let workspaces = self.workspaces.read().await;
            workspaces.keys().cloned().collect()
        };

        for agent_id in agent_ids {
            if let Err(e) = self.remove_worktree(&agent_id, true).await {
                warn!("Failed to cleanup worktree for {}: {}", agent_id, e);
            }
        }

        // Prune any stale worktree references
        if let Err(e) = self.git(&["worktree", "prune"]).await {
            warn!("git worktree prune failed: {}", e);
        }
    }
}

/// Run git in `cwd` and return raw stdout, capturing exit code and stderr.
async fn run_git(cwd: &Path, args: &[&str]) -> Result<String, IsolationError> {
    #[cfg(feature = "telemetry")]
    let start = Instant::now();

    debug!("git {}", args.join(" "));
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    #[cfg(feature = "telemetry")]
    GLOBAL_METRICS.record_operation(
        &format!("git.{}", args.first().copied().unwrap_or("unknown")),
        start.elapsed(),
    );

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(IsolationError::Git {
            command: args.join(" "),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
