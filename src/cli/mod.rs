//! CLI command handling
//!
//! Builds the task set from config, task directories and command-line
//! input, resolves it once and hands it to the orchestrator.

use std::path::PathBuf;

use chrono::Local;
use colored::Colorize;

use crate::commands::{Commands, TaskInput};
use crate::common::config::Config;
use crate::common::{parse_assignment, paths, Error, Result};
use crate::console::ProcessFactory;
use crate::engine::{Orchestrator, RunSummary, TaskStatus};
use crate::resolver::resolve;
use crate::task::{load_dir, script_task, Registry, Variables};

/// Dispatch a CLI command, returning the process exit status
pub async fn dispatch(command: Commands) -> Result<i32> {
    match command {
        Commands::Run {
            input,
            no_fail_fast,
        } => run(&input, no_fail_fast).await,
        Commands::Plan { input, json } => plan(&input, json),
        Commands::Validate { input } => validate(&input),
    }
}

/// Everything a run needs, built once before any console is opened
pub struct Prepared {
    pub config: Config,
    pub registry: Registry,
    pub order: Vec<String>,
    pub globals: Variables,
}

/// Load, validate and resolve the task set
///
/// Console initialization tasks come first, then tasks from the configured
/// and command-line directories, then the inline script. Overrides are
/// applied by name afterwards.
pub fn prepare(input: &TaskInput) -> Result<Prepared> {
    let config = Config::load(input.config.as_deref())?;

    let mut base = config.console_tasks()?;
    for dir in task_dirs(&config, input) {
        base.extend(load_dir(&dir)?);
    }
    if let Some(script) = &input.script {
        base.push(script_task(script, &input.script_requires)?);
    }

    let mut overrides = Vec::new();
    for dir in config.run.override_dirs.iter().chain(&input.override_dirs) {
        overrides.extend(load_dir(dir)?);
    }

    let mut registry = Registry::load(base, overrides)?;
    for name in &input.disable {
        registry.set_enabled(name, false)?;
    }
    for raw in &input.task_vars {
        let (task, name, value) = parse_task_var(raw)?;
        registry.override_vars(&task, [(name, value)])?;
    }

    let order = resolve(&registry)?;

    let board = input.board.as_deref().unwrap_or(&config.run.board);
    let mut globals = Variables::builtin(board, Local::now());
    globals.extend(config.vars.clone());
    for raw in &input.vars {
        let (name, value) = parse_assignment(raw).ok_or_else(|| {
            Error::ConfigParse(format!("invalid --var '{}': expected NAME=VALUE", raw))
        })?;
        globals.insert(name, value);
    }

    Ok(Prepared {
        config,
        registry,
        order,
        globals,
    })
}

/// Configured directories followed by command-line ones; the default task
/// directory only when neither names any
fn task_dirs(config: &Config, input: &TaskInput) -> Vec<PathBuf> {
    let dirs: Vec<PathBuf> = config
        .run
        .task_dirs
        .iter()
        .chain(&input.task_dirs)
        .cloned()
        .collect();

    if dirs.is_empty() {
        paths::default_task_dir().into_iter().collect()
    } else {
        dirs
    }
}

fn parse_task_var(raw: &str) -> Result<(String, String, String)> {
    raw.split_once(':')
        .and_then(|(task, assignment)| {
            let (name, value) = parse_assignment(assignment)?;
            Some((task.to_string(), name, value))
        })
        .ok_or_else(|| {
            Error::ConfigParse(format!(
                "invalid --task-var '{}': expected TASK:NAME=VALUE",
                raw
            ))
        })
}

async fn run(input: &TaskInput, no_fail_fast: bool) -> Result<i32> {
    let prepared = prepare(input)?;
    let fail_fast = prepared.config.run.fail_fast && !no_fail_fast;

    tracing::info!(
        "Running {} tasks on board '{}'",
        prepared.order.len(),
        prepared.globals.get("BOARD").unwrap_or_default()
    );

    let factory = ProcessFactory::new(&prepared.config);
    let mut orchestrator = Orchestrator::new(factory, std::io::stdout());
    let summary = orchestrator
        .run(
            &prepared.order,
            &prepared.registry,
            &prepared.globals,
            fail_fast,
        )
        .await;

    print_summary(&summary);
    Ok(summary.exit_code())
}

fn print_summary(summary: &RunSummary) {
    println!("\n{}", "Tasks:".cyan());
    for report in &summary.tasks {
        match report.status {
            TaskStatus::Passed => println!("  {} {}", "✓".green(), report.name),
            TaskStatus::Failed(code) => println!(
                "  {} {} {}",
                "✗".red(),
                report.name,
                format!("(exit code {})", code).dimmed()
            ),
            TaskStatus::Disabled => {
                println!("  {} {}", "-".dimmed(), format!("{} (disabled)", report.name).dimmed())
            }
            TaskStatus::NotRun => {
                println!("  {} {}", "·".dimmed(), format!("{} (not run)", report.name).dimmed())
            }
            TaskStatus::Terminated => println!(
                "  {} {} {}",
                "✗".red(),
                report.name,
                "(console terminated)".red()
            ),
        }
    }

    match &summary.fatal {
        Some(e @ Error::ShellTerminated(_)) => {
            eprintln!("\n{} {}", "Console terminated:".red().bold(), e)
        }
        Some(e) => eprintln!("\n{} {}", "Run aborted:".red().bold(), e),
        None => {}
    }

    if summary.passed() {
        println!("\n{} {}", "✓".green().bold(), "All tasks passed".green().bold());
    } else {
        println!(
            "\n{} {}",
            "✗".red().bold(),
            format!("Run failed with exit code {}", summary.exit_code())
                .red()
                .bold()
        );
    }
}

fn plan(input: &TaskInput, json: bool) -> Result<i32> {
    let prepared = prepare(input)?;
    let tasks = prepared
        .order
        .iter()
        .filter_map(|name| prepared.registry.get(name));

    if json {
        let entries: Vec<_> = tasks
            .map(|task| {
                serde_json::json!({
                    "name": task.name,
                    "console": task.console,
                    "requires": task.requires,
                    "commands": task.commands.len(),
                    "disabled": task.disabled,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(0);
    }

    println!("{}", "Execution order:".cyan());
    for (i, task) in tasks.enumerate() {
        let console = task
            .console
            .map(|c| format!("[{}]", c))
            .unwrap_or_default();
        let line = format!("{:>3}. {} {}", i + 1, task.name, console.dimmed());
        if task.disabled {
            println!("{} {}", line.dimmed(), "(disabled)".dimmed());
        } else {
            println!("{}", line);
        }
    }
    Ok(0)
}

fn validate(input: &TaskInput) -> Result<i32> {
    let prepared = prepare(input)?;
    println!(
        "{} {} tasks loaded, order resolved",
        "✓".green(),
        prepared.registry.len()
    );
    Ok(0)
}
