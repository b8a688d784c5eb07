//! Error types for the task runner
//!
//! Load-time errors (`Config`, `UnknownDependency`, `DependencyCycle`) abort
//! before any console is opened. Command failures (`UndefinedVariable`,
//! `Timeout`, `NonZeroExit`, `NoAlternative`) are recorded as result codes and handled by the
//! fail-fast policy. `ShellTerminated` always ends the run.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Result code recorded for a command whose deadline elapsed
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Result code recorded for a command that referenced an unbound variable
pub const UNDEFINED_VARIABLE_EXIT_CODE: i32 = 1;

/// Main error type for the task runner
#[derive(Error, Debug)]
pub enum Error {
    // === Load-time Errors ===
    #[error("Invalid task '{task}', field '{field}': {message}")]
    Config {
        task: String,
        field: String,
        message: String,
    },

    #[error("Task '{task}' requires '{dependency}', but no such task is defined")]
    UnknownDependency { task: String, dependency: String },

    #[error("Cyclic dependencies detected involving task '{member}'")]
    DependencyCycle { member: String },

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to parse task file '{path}': {error}")]
    TaskParse { path: String, error: String },

    // === Command Failures ===
    #[error("Variable '{name}' is not defined")]
    UndefinedVariable { name: String },

    #[error("Timed out after {secs:.1} seconds waiting for '{pattern}'")]
    Timeout { pattern: String, secs: f64 },

    #[error("Command exited with code {0}")]
    NonZeroExit(i32),

    #[error("Pattern {matched} matched last, but the command has only {count} alternatives")]
    NoAlternative { matched: usize, count: usize },

    // === Fatal Session Errors ===
    #[error("Console '{0}' terminated unexpectedly")]
    ShellTerminated(String),

    #[error("Failed to start console '{name}': {reason}")]
    ConsoleStartFailed { name: String, reason: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error for a task field
    pub fn config(task: &str, field: &str, message: impl Into<String>) -> Self {
        Self::Config {
            task: task.to_string(),
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Create a timeout error for the given pattern and deadline
    pub fn timeout(pattern: &str, deadline: std::time::Duration) -> Self {
        Self::Timeout {
            pattern: pattern.to_string(),
            secs: deadline.as_secs_f64(),
        }
    }

    /// Whether this error ends the whole run regardless of fail-fast settings
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ShellTerminated(_) | Error::ConsoleStartFailed { .. } | Error::Io(_)
        )
    }

    /// The result code a failed command records for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NonZeroExit(code) => *code,
            Error::Timeout { .. } => TIMEOUT_EXIT_CODE,
            Error::UndefinedVariable { .. } => UNDEFINED_VARIABLE_EXIT_CODE,
            _ => 1,
        }
    }
}
