//! Run-level driver
//!
//! Walks the resolved order, opens consoles on first use and applies the
//! run-level fail-fast policy. Every console opened during a run is closed
//! exactly once when the run ends, whatever the reason.

use std::collections::HashMap;
use std::io::Write;

use crate::common::{Error, Result};
use crate::console::{Console, ConsoleFactory};
use crate::task::{ConsoleId, Registry, Variables};

use super::executor::{run_task, TaskOutcome};

/// What happened to one task of the order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Passed,
    /// Failed with the task's last non-zero code
    Failed(i32),
    /// Disabled; kept its place in the order but ran nothing
    Disabled,
    /// Never reached because the run stopped earlier
    NotRun,
    /// Its console died while it ran
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub name: String,
    pub status: TaskStatus,
}

/// Outcome of a whole run
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Last non-zero code any task reported, 0 if none
    pub last_non_zero: i32,
    /// One report per task of the order, in order
    pub tasks: Vec<TaskReport>,
    /// Error that ended the run early, if any
    pub fatal: Option<Error>,
}

impl RunSummary {
    /// Process exit status for this run
    ///
    /// A fatal error with no failure recorded before it still fails the run.
    pub fn exit_code(&self) -> i32 {
        match (&self.fatal, self.last_non_zero) {
            (Some(_), 0) => 1,
            (_, code) => code,
        }
    }

    pub fn passed(&self) -> bool {
        self.exit_code() == 0
    }

    fn record(&mut self, name: &str, status: TaskStatus) {
        self.tasks.push(TaskReport {
            name: name.to_string(),
            status,
        });
    }
}

/// Consoles opened so far, keyed by identity
struct ConsolePool<F> {
    factory: F,
    open: HashMap<ConsoleId, Box<dyn Console>>,
}

impl<F: ConsoleFactory> ConsolePool<F> {
    async fn acquire(&mut self, id: ConsoleId) -> Result<&mut dyn Console> {
        if !self.open.contains_key(&id) {
            tracing::debug!(console = %id, "Opening console");
            let console = self.factory.open(id).await?;
            self.open.insert(id, console);
        }

        match self.open.get_mut(&id) {
            Some(console) => {
                let console: &mut dyn Console = console.as_mut();
                Ok(console)
            }
            None => Err(Error::Internal(format!("console '{}' vanished", id))),
        }
    }

    async fn close_all(&mut self) {
        for id in ConsoleId::ALL {
            if let Some(mut console) = self.open.remove(&id) {
                tracing::debug!(console = %id, "Closing console");
                if let Err(e) = console.close().await {
                    tracing::warn!(console = %id, "Failed to close console: {}", e);
                }
            }
        }
    }
}

/// Drives a resolved order against lazily opened consoles
pub struct Orchestrator<F, W> {
    pool: ConsolePool<F>,
    out: W,
}

impl<F: ConsoleFactory, W: Write> Orchestrator<F, W> {
    /// `out` receives the transcript of echoing commands
    pub fn new(factory: F, out: W) -> Self {
        Self {
            pool: ConsolePool {
                factory,
                open: HashMap::new(),
            },
            out,
        }
    }

    /// The transcript sink
    pub fn output(&self) -> &W {
        &self.out
    }

    /// Run `order` to completion or until the run stops
    ///
    /// With `fail_fast`, the first failing task ends the run. A fatal error
    /// always ends it. Consoles are closed before returning either way.
    pub async fn run(
        &mut self,
        order: &[String],
        registry: &Registry,
        globals: &Variables,
        fail_fast: bool,
    ) -> RunSummary {
        let mut summary = RunSummary::default();

        let result = self
            .drive(order, registry, globals, fail_fast, &mut summary)
            .await;
        self.pool.close_all().await;

        if let Err(e) = result {
            tracing::error!("Run aborted: {}", e);
            summary.fatal = Some(e);
        }

        let reported = summary.tasks.len();
        for name in order.iter().skip(reported) {
            summary.record(name, TaskStatus::NotRun);
        }
        summary
    }

    async fn drive(
        &mut self,
        order: &[String],
        registry: &Registry,
        globals: &Variables,
        fail_fast: bool,
        summary: &mut RunSummary,
    ) -> Result<()> {
        for name in order {
            let task = registry
                .get(name)
                .ok_or_else(|| Error::Internal(format!("task '{}' is not registered", name)))?;

            if task.disabled {
                tracing::info!("Skipping disabled task '{}'", name);
                summary.record(name, TaskStatus::Disabled);
                continue;
            }

            tracing::info!("Running task '{}'", name);
            let console = match task.console {
                Some(id) => match self.pool.acquire(id).await {
                    Ok(console) => Some(console),
                    Err(e) => {
                        summary.record(name, TaskStatus::Terminated);
                        return Err(e);
                    }
                },
                None => None,
            };

            let TaskOutcome { code, abort } =
                match run_task(task, console, globals, &mut self.out).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        summary.record(name, TaskStatus::Terminated);
                        return Err(e);
                    }
                };
            if abort {
                tracing::info!("Task '{}' skipped its remaining commands", name);
            }

            if code == 0 {
                summary.record(name, TaskStatus::Passed);
                continue;
            }

            tracing::warn!("Task '{}' failed with code {}", name, code);
            summary.record(name, TaskStatus::Failed(code));
            summary.last_non_zero = code;
            if fail_fast {
                tracing::info!("Stopping run after failed task '{}'", name);
                break;
            }
        }
        Ok(())
    }
}
