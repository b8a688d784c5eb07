//! emurun - declarative task orchestration for emulated targets
//!
//! Task definitions are loaded into a registry, resolved into one stable
//! order and executed command by command against line-oriented consoles.

pub mod cli;
pub mod commands;
pub mod common;
pub mod console;
pub mod engine;
pub mod resolver;
pub mod task;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use engine::{Orchestrator, RunSummary};
pub use task::{Registry, Task};
