//! CLI command definitions
//!
//! Defines the clap commands for the task runner CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the task workflow against the emulator consoles
    Run {
        #[command(flatten)]
        input: TaskInput,

        /// Keep running independent tasks after a task fails
        #[arg(long)]
        no_fail_fast: bool,
    },

    /// Print the resolved execution order without running anything
    Plan {
        #[command(flatten)]
        input: TaskInput,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load and resolve the task set, reporting errors only
    Validate {
        #[command(flatten)]
        input: TaskInput,
    },
}

/// Where tasks and variables come from
#[derive(Args, Debug, Clone, Default)]
pub struct TaskInput {
    /// Directory of base task files (can be specified multiple times)
    #[arg(long = "tasks", short = 't')]
    pub task_dirs: Vec<PathBuf>,

    /// Directory of override task files, applied by name after the base set
    #[arg(long = "override", short = 'o')]
    pub override_dirs: Vec<PathBuf>,

    /// Board name exposed as ${{BOARD}}
    #[arg(long)]
    pub board: Option<String>,

    /// Extra global variable: --var NAME=VALUE
    #[arg(long = "var")]
    pub vars: Vec<String>,

    /// Variable for a single task: --task-var TASK:NAME=VALUE
    #[arg(long = "task-var")]
    pub task_vars: Vec<String>,

    /// Disable a task without removing it from the order
    #[arg(long)]
    pub disable: Vec<String>,

    /// Inline script run as the task `user` on the target console
    #[arg(long)]
    pub script: Option<String>,

    /// Task the inline script requires (can be specified multiple times)
    #[arg(long = "script-requires")]
    pub script_requires: Vec<String>,

    /// Path to the configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}
