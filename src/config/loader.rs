// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in various locations.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::{ExecutorConfig, WorkspaceConfig};

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[".minion.json", ".minion/config.json", "minion.config.json"];

/// Local config file name (for per-directory overrides).
pub const LOCAL_CONFIG_FILE: &str = ".minion.local.json";

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".minion";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Load global configuration from ~/.minion/config.json.
pub fn load_global_config() -> Result<Option<WorkspaceConfig>, ConfigError> {
    let path = match get_global_config_path() {
        Some(p) => p,
        None => return Ok(None),
    };

    if !path.exists() {
        return Ok(None);
    }

    load_config_file(&path).map(Some)
}

/// Load workspace configuration from the workspace root.
///
/// Searches for config files in the following order:
/// 1. .minion.json
/// 2. .minion/config.json
/// 3. minion.config.json
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load local configuration from .minion.local.json.
pub fn load_local_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    let path = workspace_root.join(LOCAL_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    load_config_file(&path).map(Some)
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<WorkspaceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Save workspace configuration to a file.
pub fn save_workspace_config(
    workspace_root: &Path,
    config: &WorkspaceConfig,
    filename: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    let filename = filename.unwrap_or(CONFIG_FILES[0]);
    let path = workspace_root.join(filename);

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, content)?;

    Ok(path)
}

/// Write a workspace config file, refusing to overwrite an existing one.
pub fn init_config(
    workspace_root: &Path,
    config: Option<WorkspaceConfig>,
) -> Result<PathBuf, ConfigError> {
    if let Some(existing) = CONFIG_FILES
        .iter()
        .map(|f| workspace_root.join(f))
        .find(|p| p.exists())
    {
        return Err(ConfigError::AlreadyExists(existing));
    }
    let config = config.unwrap_or_else(get_example_config);
    save_workspace_config(workspace_root, &config, None)
}

/// Get an example configuration.
pub fn get_example_config() -> WorkspaceConfig {
    WorkspaceConfig {
        worktrees_dir: Some(PathBuf::from(".minion-worktrees")),
        branch_prefix: Some("minion/".to_string()),
        default_target_branch: Some("main".to_string()),
        max_concurrent_tasks: Some(4),
        event_capacity: None,
        database_path: None,
        persist: Some(true),
        executor: Some(ExecutorConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_workspace_config_search_order() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join(".minion")).unwrap();
        std::fs::write(temp.path().join(".minion/config.json"), r#"{"branchPrefix": "second/"}"#)
            .unwrap();
        std::fs::write(temp.path().join(".minion.json"), r#"{"branchPrefix": "first/"}"#).unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.branch_prefix.as_deref(), Some("first/"));
    }

    #[test]
    fn test_load_yaml_by_extension() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("minion.yaml");
        std::fs::write(&path, "maxConcurrentTasks: 8\n").unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.max_concurrent_tasks, Some(8));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".minion.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(load_config_file(&path), Err(ConfigError::JsonError(_))));
    }

    #[test]
    fn test_missing_local_config_is_none() {
        let temp = TempDir::new().unwrap();
        assert!(load_local_config(temp.path()).unwrap().is_none());
    }

    #[test]
    fn test_init_config_writes_example_once() {
        let temp = TempDir::new().unwrap();
        let path = init_config(temp.path(), None).unwrap();
        assert_eq!(path, temp.path().join(".minion.json"));

        let written = load_config_file(&path).unwrap();
        assert_eq!(written, get_example_config());

        assert!(matches!(
            init_config(temp.path(), None),
            Err(ConfigError::AlreadyExists(_))
        ));
    }
}
