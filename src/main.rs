// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Minion main entry point - CLI and commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;
use tracing::warn;

use minion::config::{self, CliOptions, ResolvedConfig};
use minion::orchestrate::{
    executor_from_config, find_repo_root, Agent, AgentManager, GitWorktreeIsolator, ManagerError,
    ManagerOptions, OrchestratorEvent, Task, TaskRequest, TaskStatus,
};
use minion::store::{PersistenceSink, SqliteStore};
use minion::telemetry::{init_telemetry, TelemetryConfig};
use minion::VERSION;

/// How long to wait for event subscribers to drain after shutdown.
const SINK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Minion - parallel coding agents in isolated git worktrees.
#[derive(Parser)]
#[command(name = "minion")]
#[command(author, version, about = "Parallel coding agents in isolated git worktrees", long_about = None)]
struct Cli {
    /// Repository to operate on (defaults to the current directory)
    #[arg(short = 'C', long, env = "MINION_REPO", global = true)]
    repo: Option<PathBuf>,

    /// Directory holding agent worktrees
    #[arg(long, env = "MINION_WORKTREES_DIR", global = true)]
    worktrees_dir: Option<PathBuf>,

    /// Do not record history in the database
    #[arg(long, global = true)]
    no_persist: bool,

    /// Show orchestrator events as they happen
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Show debug output
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for minion.
#[derive(Subcommand)]
enum Commands {
    /// Run one agent per task in parallel and show their diffs
    Run {
        /// Tasks to run, as "NAME=DESCRIPTION" or just "DESCRIPTION"
        #[arg(required = true)]
        tasks: Vec<String>,

        /// Context prepended to every task
        #[arg(short, long)]
        context: Option<String>,

        /// Branch to diff and merge against
        #[arg(short, long)]
        target: Option<String>,

        /// Maximum number of tasks executing at once
        #[arg(short = 'j', long)]
        max_concurrent: Option<usize>,

        /// Merge each successful branch into the target and retire the agent
        #[arg(long)]
        merge: bool,

        /// Leave worktrees and branches in place on exit
        #[arg(long)]
        keep: bool,
    },

    /// Show recorded agents and tasks
    History {
        /// Only tasks of this agent
        #[arg(long)]
        agent: Option<String>,

        /// Include removed agents
        #[arg(short, long)]
        all: bool,

        /// Maximum number of tasks to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Initialize a new configuration file
    Init,

    /// Show version information
    Version,
}

/// Config subcommand actions.
#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
}

/// A task parsed from the command line.
#[derive(Debug, PartialEq)]
struct TaskSpec {
    name: String,
    description: String,
}

impl TaskSpec {
    fn parse(raw: &str, index: usize) -> Self {
        match raw.split_once('=') {
            Some((name, description)) if !name.trim().is_empty() && !name.contains(' ') => Self {
                name: name.trim().to_string(),
                description: description.trim().to_string(),
            },
            _ => Self {
                name: format!("agent-{}", index + 1),
                description: raw.trim().to_string(),
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = if cli.debug {
        TelemetryConfig::development()
    } else {
        TelemetryConfig::production()
    };
    let _guard = init_telemetry(&telemetry)?;

    let repo_arg = cli.repo.clone();
    let options = CliOptions {
        worktrees_dir: cli.worktrees_dir.clone(),
        no_persist: cli.no_persist,
        ..Default::default()
    };

    match cli.command {
        Commands::Run {
            tasks,
            context,
            target,
            max_concurrent,
            merge,
            keep,
        } => {
            let repo = resolve_repo(repo_arg.as_deref())?;
            let options = CliOptions {
                target_branch: target,
                max_concurrent_tasks: max_concurrent,
                ..options
            };
            let config = config::load_config(&repo, options)?;
            let specs: Vec<TaskSpec> = tasks
                .iter()
                .enumerate()
                .map(|(i, raw)| TaskSpec::parse(raw, i))
                .collect();
            handle_run(&repo, &config, specs, context, merge, keep, cli.verbose).await
        }
        Commands::History { agent, all, limit } => {
            let repo = resolve_repo(repo_arg.as_deref())?;
            let config = config::load_config(&repo, options)?;
            handle_history(&repo, &config, agent.as_deref(), all, limit).await
        }
        Commands::Config { action } => {
            let repo = resolve_repo(repo_arg.as_deref())?;
            match action {
                Some(ConfigAction::Show) | None => {
                    let config = config::load_config(&repo, options)?;
                    println!("{}", serde_json::to_string_pretty(&config)?);
                }
            }
            Ok(())
        }
        Commands::Init => {
            let repo = resolve_repo(repo_arg.as_deref())?;
            let path = config::init_config(&repo, None)?;
            println!("Created config file: {}", path.display());
            Ok(())
        }
        Commands::Version => {
            println!("minion {}", VERSION);
            Ok(())
        }
    }
}

fn resolve_repo(repo: Option<&Path>) -> anyhow::Result<PathBuf> {
    let start = match repo {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()?,
    };
    match find_repo_root(&start) {
        Some(root) => Ok(root),
        None => bail!("Not a git repository: {}", start.display()),
    }
}

async fn handle_run(
    repo: &Path,
    config: &ResolvedConfig,
    specs: Vec<TaskSpec>,
    context: Option<String>,
    merge: bool,
    keep: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    let isolator = GitWorktreeIsolator::open(repo, &config.worktrees_dir)
        .await
        .context("Failed to open repository")?;
    let manager = AgentManager::new(
        Arc::new(isolator),
        executor_from_config(&config.executor),
        ManagerOptions::from(config),
    );

    let sink = if config.persist {
        start_history(repo, config, &manager)
    } else {
        None
    };
    let printer = verbose.then(|| spawn_event_printer(&manager));

    let mut runs = Vec::with_capacity(specs.len());
    for spec in &specs {
        match start_run(&manager, spec, context.as_deref()).await {
            Ok((agent, task)) => {
                println!(
                    "{} {} on {}",
                    "→".cyan(),
                    agent.name.bright_white(),
                    agent.branch_name.dimmed()
                );
                runs.push((agent, task));
            }
            Err(e) => {
                manager.shutdown().await;
                return Err(e).with_context(|| format!("Failed to start {}", spec.name));
            }
        }
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Waiting for {} task(s)", runs.len()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let finished = tokio::select! {
        finished = wait_all(&manager, &runs) => finished,
        _ = tokio::signal::ctrl_c() => {
            spinner.println(format!("{}", "Interrupted, stopping agents".yellow()));
            for (agent, _) in &runs {
                if let Err(e) = manager.stop_agent(&agent.id).await {
                    warn!("Failed to stop {}: {}", agent.id, e);
                }
            }
            wait_all(&manager, &runs).await
        }
    };
    spinner.finish_and_clear();

    let mut failures = 0;
    for ((agent, _), task) in runs.iter().zip(finished) {
        println!();
        println!("{}", format!("## {} ({})", agent.name, agent.branch_name).bright_cyan());
        let Some(task) = task else {
            println!("{}", "Task disappeared".red());
            failures += 1;
            continue;
        };
        print_task(&task);
        if task.status != TaskStatus::Completed {
            failures += 1;
            continue;
        }

        match manager.get_diff(&agent.id, None).await {
            Ok(diff) if diff.trim().is_empty() => println!("{}", "No changes".dimmed()),
            Ok(diff) => print_diff(&diff),
            Err(e) => println!("{} {}", "Diff failed:".red(), e),
        }

        if merge {
            match manager.merge_branch(&agent.id, None, true).await {
                Ok(()) => println!(
                    "{} Merged into {}",
                    "✓".green(),
                    config.default_target_branch.bright_white()
                ),
                Err(e) => {
                    failures += 1;
                    println!("{} {}", "Merge failed:".red(), e);
                }
            }
        }
    }

    if keep {
        for workspace in manager.list_workspaces().await {
            println!(
                "{} {} at {}",
                "Kept".dimmed(),
                workspace.branch_name,
                workspace.path.display()
            );
        }
    } else {
        manager.shutdown().await;
    }

    drop(manager);
    if let Some(printer) = printer {
        let _ = tokio::time::timeout(SINK_DRAIN_TIMEOUT, printer).await;
    }
    if let Some(sink) = sink {
        if tokio::time::timeout(SINK_DRAIN_TIMEOUT, sink).await.is_err() {
            warn!("History writer did not finish in time");
        }
    }

    if failures > 0 {
        bail!("{} of {} task(s) did not succeed", failures, runs.len());
    }
    Ok(())
}

async fn start_run(
    manager: &AgentManager,
    spec: &TaskSpec,
    context: Option<&str>,
) -> Result<(Agent, Task), ManagerError> {
    let agent = manager.create_agent(&spec.name).await?;
    let mut request = TaskRequest::new(spec.description.clone());
    if let Some(context) = context {
        request = request.with_context(context);
    }
    let task = manager.assign_task(&agent.id, request).await?;
    Ok((agent, task))
}

async fn wait_all(manager: &AgentManager, runs: &[(Agent, Task)]) -> Vec<Option<Task>> {
    let mut finished = Vec::with_capacity(runs.len());
    for (_, task) in runs {
        finished.push(manager.wait_for_task(&task.id).await);
    }
    finished
}

fn start_history(
    repo: &Path,
    config: &ResolvedConfig,
    manager: &AgentManager,
) -> Option<JoinHandle<()>> {
    let path = config.database_path_in(repo);
    match SqliteStore::open_at(&path) {
        Ok(store) => Some(PersistenceSink::spawn(manager.subscribe(), Arc::new(store))),
        Err(e) => {
            warn!("History disabled: {}", e);
            None
        }
    }
}

fn spawn_event_printer(manager: &AgentManager) -> JoinHandle<()> {
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let id = event.agent_id().chars().take(8).collect::<String>();
            let detail = match &event {
                OrchestratorEvent::AgentStatusChanged { status, .. } => status.to_string(),
                OrchestratorEvent::TaskStatusChanged { task, .. } => task.status.to_string(),
                OrchestratorEvent::AgentLog { line, .. } => line.clone(),
                _ => String::new(),
            };
            eprintln!("{} {} {}", format!("[{}]", id).dimmed(), event.kind().cyan(), detail);
        }
    })
}

fn print_task(task: &Task) {
    match task.status {
        TaskStatus::Completed => {
            println!("{} Completed", "✓".green());
            if let Some(output) = &task.output {
                println!("{}", output);
            }
        }
        TaskStatus::Error => {
            println!(
                "{} {}",
                "✗".red(),
                task.error.as_deref().unwrap_or("unknown error").red()
            );
        }
        status => println!("{} {}", "?".yellow(), status),
    }
}

fn print_diff(diff: &str) {
    for line in diff.lines() {
        let colored_line = if line.starts_with("+++") || line.starts_with("---") {
            line.bold()
        } else if line.starts_with('+') {
            line.green()
        } else if line.starts_with('-') {
            line.red()
        } else if line.starts_with("@@") {
            line.cyan()
        } else {
            line.normal()
        };
        println!("{}", colored_line);
    }
}

async fn handle_history(
    repo: &Path,
    config: &ResolvedConfig,
    agent: Option<&str>,
    all: bool,
    limit: usize,
) -> anyhow::Result<()> {
    let path = config.database_path_in(repo);
    if !path.exists() {
        println!("{}", "No history recorded yet".dimmed());
        return Ok(());
    }
    let store = SqliteStore::open_at(&path)?;

    if agent.is_none() {
        println!("{}", "## Agents".bright_cyan());
        for record in store.list_agents(all).await? {
            let removed = if record.removed_at.is_some() { " (removed)" } else { "" };
            println!(
                "{}  {:<16} {:<10} {}{}",
                record.agent.id.dimmed(),
                record.agent.name.bright_white(),
                record.agent.status.as_str(),
                record.agent.branch_name,
                removed.dimmed()
            );
        }
        println!();
    }

    println!("{}", "## Tasks".bright_cyan());
    for task in store.list_tasks(agent, limit).await? {
        let status = match task.status {
            TaskStatus::Completed => task.status.to_string().green(),
            TaskStatus::Error => task.status.to_string().red(),
            _ => task.status.to_string().yellow(),
        };
        println!(
            "{}  {:<10} {}  {}",
            task.id.dimmed(),
            status,
            task.created_at.format("%Y-%m-%d %H:%M:%S"),
            task.description
        );
        if let Some(error) = &task.error {
            println!("    {}", error.red());
        }
    }
    Ok(())
}
