// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for Minion.
//!
//! Handles loading and merging of configuration from multiple sources:
//! - Global config: ~/.minion/config.json
//! - Workspace config: .minion.json, .minion/config.json, or minion.config.json
//! - Local config: .minion.local.json (gitignored, for personal overrides)
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > local > workspace > global > defaults).

mod loader;
mod merger;
mod types;

pub use loader::{
    get_example_config, get_global_config_dir, get_global_config_path, init_config,
    load_config_file, load_global_config, load_local_config, load_workspace_config,
    save_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE, LOCAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, CliOptions};

pub use types::{ExecutorConfig, ExecutorKind, ResolvedConfig, WorkspaceConfig};

use crate::error::ConfigError;
use std::path::Path;

/// Load and merge all configuration sources for a workspace.
pub fn load_config(
    workspace_root: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;
    let local = load_local_config(workspace_root)?;

    Ok(merge_config(global, workspace, local, cli_options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_with_workspace_and_local() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".minion.json"),
            r#"{"branchPrefix": "bots/", "defaultTargetBranch": "develop"}"#,
        )
        .unwrap();
        std::fs::write(
            temp.path().join(".minion.local.json"),
            r#"{"defaultTargetBranch": "mine"}"#,
        )
        .unwrap();

        let config = load_config(temp.path(), CliOptions::default()).unwrap();
        assert_eq!(config.branch_prefix, "bots/");
        assert_eq!(config.default_target_branch, "mine");
    }

    #[test]
    fn test_load_config_cli_wins() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".minion.json"),
            r#"{"defaultTargetBranch": "develop"}"#,
        )
        .unwrap();

        let cli = CliOptions {
            target_branch: Some("release".into()),
            ..Default::default()
        };
        let config = load_config(temp.path(), cli).unwrap();
        assert_eq!(config.default_target_branch, "release");
    }
}
