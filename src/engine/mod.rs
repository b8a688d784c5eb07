//! Task execution engine
//!
//! `executor` runs the commands of a single task; `orchestrator` walks the
//! resolved order, owns the consoles and aggregates the exit code.

pub mod executor;
pub mod orchestrator;

pub use executor::{run_task, TaskOutcome};
pub use orchestrator::{Orchestrator, RunSummary, TaskReport, TaskStatus};
