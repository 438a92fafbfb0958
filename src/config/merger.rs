// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use std::path::PathBuf;

use super::types::{ResolvedConfig, WorkspaceConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub worktrees_dir: Option<PathBuf>,
    pub target_branch: Option<String>,
    pub max_concurrent_tasks: Option<usize>,
    pub no_persist: bool,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Local config (.minion.local.json)
/// 3. Workspace config (.minion.json)
/// 4. Global config (~/.minion/config.json)
/// 5. Default values
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    local: Option<WorkspaceConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    for config in [global, workspace, local].into_iter().flatten() {
        apply_workspace_config(&mut result, config);
    }

    // Apply CLI options (highest precedence)
    apply_cli_options(&mut result, cli);

    result
}

fn apply_workspace_config(result: &mut ResolvedConfig, config: WorkspaceConfig) {
    if let Some(dir) = config.worktrees_dir {
        result.worktrees_dir = dir;
    }
    if let Some(prefix) = config.branch_prefix {
        result.branch_prefix = prefix;
    }
    if let Some(branch) = config.default_target_branch {
        result.default_target_branch = branch;
    }
    if let Some(max) = config.max_concurrent_tasks {
        result.max_concurrent_tasks = max.max(1);
    }
    if let Some(capacity) = config.event_capacity {
        result.event_capacity = capacity.max(1);
    }
    if let Some(path) = config.database_path {
        result.database_path = path;
    }
    if let Some(persist) = config.persist {
        result.persist = persist;
    }
    // The executor section is replaced as a whole
    if let Some(executor) = config.executor {
        result.executor = executor;
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: CliOptions) {
    if let Some(dir) = cli.worktrees_dir {
        result.worktrees_dir = dir;
    }
    if let Some(branch) = cli.target_branch {
        result.default_target_branch = branch;
    }
    if let Some(max) = cli.max_concurrent_tasks {
        result.max_concurrent_tasks = max.max(1);
    }
    if cli.no_persist {
        result.persist = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{ExecutorConfig, ExecutorKind};

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = merge_config(None, None, None, CliOptions::default());
        assert_eq!(config, ResolvedConfig::default());
        assert_eq!(config.branch_prefix, "minion/");
        assert_eq!(config.default_target_branch, "main");
    }

    #[test]
    fn test_precedence() {
        let global = WorkspaceConfig {
            branch_prefix: Some("global/".into()),
            default_target_branch: Some("trunk".into()),
            max_concurrent_tasks: Some(2),
            ..Default::default()
        };
        let workspace = WorkspaceConfig {
            branch_prefix: Some("workspace/".into()),
            ..Default::default()
        };
        let local = WorkspaceConfig {
            default_target_branch: Some("develop".into()),
            ..Default::default()
        };
        let cli = CliOptions {
            max_concurrent_tasks: Some(9),
            ..Default::default()
        };

        let config = merge_config(Some(global), Some(workspace), Some(local), cli);
        assert_eq!(config.branch_prefix, "workspace/");
        assert_eq!(config.default_target_branch, "develop");
        assert_eq!(config.max_concurrent_tasks, 9);
    }

    #[test]
    fn test_executor_section_replaced_whole() {
        let global = WorkspaceConfig {
            executor: Some(ExecutorConfig {
                kind: ExecutorKind::Command,
                command: "codex".into(),
                args: vec!["exec".into()],
                timeout_ms: Some(1000),
            }),
            ..Default::default()
        };
        let workspace = WorkspaceConfig {
            executor: Some(ExecutorConfig::default()),
            ..Default::default()
        };

        let config = merge_config(Some(global), Some(workspace), None, CliOptions::default());
        assert_eq!(config.executor, ExecutorConfig::default());
    }

    #[test]
    fn test_zero_limits_are_clamped() {
        let workspace = WorkspaceConfig {
            max_concurrent_tasks: Some(0),
            event_capacity: Some(0),
            ..Default::default()
        };
        let config = merge_config(None, Some(workspace), None, CliOptions::default());
        assert_eq!(config.max_concurrent_tasks, 1);
        assert_eq!(config.event_capacity, 1);
    }

    #[test]
    fn test_cli_disables_persistence() {
        let cli = CliOptions {
            no_persist: true,
            ..Default::default()
        };
        assert!(!merge_config(None, None, None, cli).persist);
    }
}
