// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Workspace isolation trait and branch naming helpers.
//!
//! Every agent gets an exclusive git worktree on its own branch. The
//! [`WorkspaceIsolator`] trait is the seam between the lifecycle manager and
//! the component that actually touches the repository, so the manager can be
//! exercised against an in-memory isolator in tests.
//!
//! ```text
//! /project/                          # Main repo (trunk checkout)
//! ├── .git/
//! └── .minion-worktrees/
//!     ├── 3f2a…/                     # Agent worktree on minion/alice-3f2a…
//!     └── 9c41…/                     # Agent worktree on minion/bob-9c41…
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::types::Workspace;

/// Error type for workspace isolation operations.
#[derive(Debug, thiserror::Error)]
pub enum IsolationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a git repository: {0}. Minion requires a git repository.")]
    NotARepository(PathBuf),

    #[error("git {command} exited with {}: {stderr}", exit_label(.code))]
    Git {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Worktree already exists for agent {0}")]
    WorkspaceExists(String),

    #[error("Branch already in use: {0}")]
    BranchInUse(String),

    #[error("Invalid branch name: {0:?}")]
    InvalidBranchName(String),

    #[error("No worktree found for agent {0}")]
    WorkspaceNotFound(String),

    #[error("Failed to create worktree: {0}")]
    WorktreeCreationFailed(String),

    #[error("Failed to remove worktree: {0}")]
    RemovalFailed(String),

    #[error("Failed to merge branch: {0}")]
    MergeFailed(String),

    #[error("Target branch not found: {0}")]
    TargetNotFound(String),

    #[error("Failed to check out target branch: {0}")]
    CheckoutFailed(String),

    #[error("Failed to get diff: {0}")]
    DiffFailed(String),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

impl IsolationError {
    /// Whether the error means the requested workspace does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::WorkspaceNotFound(_))
    }

    /// Whether the error is a conflict with existing repository state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::WorkspaceExists(_) | Self::BranchInUse(_) | Self::MergeFailed(_)
        )
    }
}

/// Trait for workspace isolation strategies.
///
/// Implementations own the workspace registry: it is the authoritative answer
/// to "does this agent have a filesystem presence".
#[async_trait]
pub trait WorkspaceIsolator: Send + Sync {
    /// Create a branch from the current HEAD and a worktree checked out on it.
    ///
    /// Fails with [`IsolationError::WorkspaceExists`] without side effects if
    /// the agent already has a workspace.
    async fn create_worktree(
        &self,
        agent_id: &str,
        branch_name: &str,
    ) -> Result<Workspace, IsolationError>;

    /// Remove an agent's worktree. `force` discards uncommitted changes.
    async fn remove_worktree(&self, agent_id: &str, force: bool) -> Result<(), IsolationError>;

    /// Merge an agent's branch into `target_branch` in the main checkout.
    ///
    /// With `delete_branch` the worktree is retired and the branch deleted
    /// after a successful merge.
    async fn merge_branch(
        &self,
        agent_id: &str,
        target_branch: &str,
        delete_branch: bool,
    ) -> Result<(), IsolationError>;

    /// Diff of the changes unique to the agent's branch since it diverged
    /// from `target_branch`. Never mutates state.
    async fn get_diff(&self, agent_id: &str, target_branch: &str) -> Result<String, IsolationError>;

    /// List all active workspaces.
    async fn list_workspaces(&self) -> Vec<Workspace>;

    /// Get the workspace of an agent.
    async fn get_workspace(&self, agent_id: &str) -> Option<Workspace>;

    /// Force-remove every workspace. Failures are logged, not returned.
    async fn cleanup(&self);
}

/// Default prefix for agent branches.
pub const DEFAULT_BRANCH_PREFIX: &str = "minion/";

/// Slug used when a name normalizes to nothing.
const FALLBACK_SLUG: &str = "agent";

/// Number of agent id characters appended to branch names.
const ID_SUFFIX_LEN: usize = 8;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Characters git rejects in ref names (see `git check-ref-format`).
static FORBIDDEN_REF_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[~^:?*\[\\\x00-\x1f\x7f]|\.\.|@\{|//|/\."#).unwrap());

static HYPHEN_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").unwrap());

/// Normalize a display name into a branch-safe slug.
///
/// Lower-cases, turns whitespace runs and `/` into `-`, replaces characters
/// git forbids in refs and collapses repeated hyphens. The slug is always a
/// single ref component.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let hyphenated = WHITESPACE.replace_all(&lowered, "-").replace('/', "-");
    let cleaned = FORBIDDEN_REF_CHARS.replace_all(&hyphenated, "-");
    let collapsed = HYPHEN_RUNS.replace_all(&cleaned, "-");
    let slug = collapsed
        .trim_matches(|c| c == '-' || c == '.')
        .to_string();

    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// Derive the branch name for an agent.
///
/// The id suffix keeps branches unique when two agents share a name.
pub fn derive_branch_name(prefix: &str, name: &str, agent_id: &str) -> String {
    let suffix: String = agent_id.chars().take(ID_SUFFIX_LEN).collect();
    format!("{}{}-{}", prefix, normalize_name(name), suffix)
}

/// Reject branch names that git would refuse or parse as an option.
pub fn validate_branch_name(branch: &str) -> Result<(), IsolationError> {
    let invalid = branch.is_empty()
        || branch.starts_with('-')
        || branch.starts_with('/')
        || branch.ends_with('/')
        || branch.ends_with('.')
        || branch.contains("//")
        || branch.chars().any(char::is_whitespace)
        || FORBIDDEN_REF_CHARS.is_match(branch)
        || branch
            .split('/')
            .any(|part| part.starts_with('.') || part.ends_with(".lock"));

    if invalid {
        Err(IsolationError::InvalidBranchName(branch.to_string()))
    } else {
        Ok(())
    }
}

/// Directory of an agent's worktree under the worktrees root.
pub fn worktree_path_for_agent(worktrees_root: &Path, agent_id: &str) -> PathBuf {
    worktrees_root.join(agent_id)
}

/// Find the root of the enclosing git repository.
pub fn find_repo_root(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|ancestor| ancestor.join(".git").exists())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Alice"), "alice");
        assert_eq!(normalize_name("Code  Reviewer"), "code-reviewer");
        assert_eq!(normalize_name("  spaced\tout\n"), "spaced-out");
        assert_eq!(normalize_name("what?*now"), "what-now");
        assert_eq!(normalize_name("a..b"), "a-b");
        assert_eq!(normalize_name("release.lock/notes"), "release.lock-notes");
        assert_eq!(normalize_name("/.hidden/"), "hidden");
        assert_eq!(normalize_name("---"), "agent");
        assert_eq!(normalize_name(""), "agent");
    }

    #[test]
    fn test_derive_branch_name() {
        let branch = derive_branch_name("minion/", "Code Reviewer", "3f2a9c41-aaaa-bbbb-cccc-000000000000");
        assert_eq!(branch, "minion/code-reviewer-3f2a9c41");
    }

    #[test]
    fn test_derive_branch_name_unique_for_same_name() {
        let a = derive_branch_name(DEFAULT_BRANCH_PREFIX, "Alice", &uuid::Uuid::new_v4().to_string());
        let b = derive_branch_name(DEFAULT_BRANCH_PREFIX, "Alice", &uuid::Uuid::new_v4().to_string());
        assert_ne!(a, b);
    }

    #[test]
    fn test_derived_branch_names_are_valid() {
        for name in [
            "Alice",
            "weird :name?",
            "ünïcode  name",
            "",
            "x/y",
            "-flag",
            "release.lock/notes",
            "a.lock/b",
            "docs/.config",
            "name.lock",
        ] {
            let branch = derive_branch_name(DEFAULT_BRANCH_PREFIX, name, "0123456789");
            assert!(validate_branch_name(&branch).is_ok(), "{branch}");
        }
    }

    #[test]
    fn test_validate_branch_name_rejects() {
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("--force").is_err());
        assert!(validate_branch_name("has space").is_err());
        assert!(validate_branch_name("a..b").is_err());
        assert!(validate_branch_name("refs.lock").is_err());
        assert!(validate_branch_name("trailing/").is_err());
        assert!(validate_branch_name("minion/release.lock/notes").is_err());
        assert!(validate_branch_name("minion/.hidden").is_err());
        assert!(validate_branch_name("minion/ok-123").is_ok());
    }

    #[test]
    fn test_worktree_path_for_agent() {
        let root = PathBuf::from("/repo/.minion-worktrees");
        assert_eq!(
            worktree_path_for_agent(&root, "abc"),
            PathBuf::from("/repo/.minion-worktrees/abc")
        );
    }

    #[test]
    fn test_find_repo_root() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();

        assert_eq!(find_repo_root(&nested), Some(dir.path().to_path_buf()));
    }

    #[test]
    fn test_error_classification() {
        assert!(IsolationError::WorkspaceNotFound("a".into()).is_not_found());
        assert!(IsolationError::WorkspaceExists("a".into()).is_conflict());
        assert!(IsolationError::MergeFailed("conflict".into()).is_conflict());
        assert!(!IsolationError::DiffFailed("x".into()).is_conflict());
        assert!(!IsolationError::CheckoutFailed("dirty".into()).is_conflict());
        assert!(!IsolationError::TargetNotFound("mian".into()).is_conflict());
        assert!(!IsolationError::TargetNotFound("mian".into()).is_not_found());
    }

    #[test]
    fn test_git_error_display() {
        let err = IsolationError::Git {
            command: "branch x".into(),
            code: Some(128),
            stderr: "fatal: boom".into(),
        };
        assert_eq!(err.to_string(), "git branch x exited with 128: fatal: boom");
    }
}
