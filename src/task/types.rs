//! Task and command types
//!
//! These are the validated forms produced by the loader. All defaults are
//! already applied at task level; command-level fields stay optional so the
//! executor can tell an explicit override from an inherited value.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

/// One of the well-known interactive sessions a task can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleId {
    /// Shell on the machine running the emulator
    Host,
    /// Serial console of the emulated target
    Target,
    /// Emulator control monitor
    #[serde(alias = "renode")]
    Monitor,
}

impl ConsoleId {
    /// All console identities, in initialization order
    pub const ALL: [ConsoleId; 3] = [ConsoleId::Host, ConsoleId::Monitor, ConsoleId::Target];

    /// The console name, which is also the name of its initialization task
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleId::Host => "host",
            ConsoleId::Target => "target",
            ConsoleId::Monitor => "monitor",
        }
    }
}

impl fmt::Display for ConsoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsoleId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "host" => Ok(ConsoleId::Host),
            "target" => Ok(ConsoleId::Target),
            "monitor" | "renode" => Ok(ConsoleId::Monitor),
            other => Err(format!(
                "unknown console '{}' (expected one of: host, target, monitor)",
                other
            )),
        }
    }
}

/// A single line sent to a console, with optional per-command settings
///
/// `None` fields inherit the enclosing task's default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    /// Line to send; empty only waits for `expect`
    ///
    /// With several alternatives, the one at the index of the pattern the
    /// console matched last is sent.
    pub text: Vec<String>,
    /// Patterns to await after sending; the first to appear wins
    pub expect: Vec<String>,
    pub timeout: Option<Duration>,
    pub echo: Option<bool>,
    pub check_exit_code: Option<bool>,
    /// Invert the exit-code check: success means a non-zero exit
    pub should_fail: Option<bool>,
}

impl Command {
    /// A command that sends `text` and inherits everything else
    pub fn line(text: impl Into<String>) -> Self {
        Self {
            text: vec![text.into()],
            ..Default::default()
        }
    }

    /// A command that sends one of `alternatives`, picked by the pattern
    /// the console matched last
    pub fn choice<I, S>(alternatives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            text: alternatives.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// A command that sends nothing and only waits for `pattern`
    pub fn wait_for(pattern: impl Into<String>) -> Self {
        Self {
            expect: vec![pattern.into()],
            ..Default::default()
        }
    }

    /// A command that sends nothing and waits for whichever of `patterns`
    /// appears first
    pub fn wait_for_any<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expect: patterns.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Builder: await `pattern` after sending
    pub fn expecting(mut self, pattern: impl Into<String>) -> Self {
        self.expect = vec![pattern.into()];
        self
    }

    /// Builder: override the task timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        Command::line(text)
    }
}

/// A named unit of ordered commands bound to a console
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub name: String,
    pub console: Option<ConsoleId>,
    pub requires: Vec<String>,
    /// Tasks that must run after this one; unknown names are ignored
    pub before: Vec<String>,
    pub echo: bool,
    /// Default command timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,
    pub fail_fast: bool,
    pub sleep_after: Duration,
    pub check_exit_code: bool,
    pub should_fail: bool,
    /// Disabled tasks keep their place in the order but run nothing
    pub disabled: bool,
    pub commands: Vec<Command>,
    pub vars: HashMap<String, String>,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            name: String::new(),
            console: None,
            requires: Vec::new(),
            before: Vec::new(),
            echo: false,
            timeout: None,
            fail_fast: true,
            sleep_after: Duration::ZERO,
            check_exit_code: true,
            should_fail: false,
            disabled: false,
            commands: Vec::new(),
            vars: HashMap::new(),
        }
    }
}

impl Task {
    /// Create an empty task with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder: bind the task to a console
    pub fn on(mut self, console: ConsoleId) -> Self {
        self.console = Some(console);
        self
    }

    /// Builder: add explicit dependencies
    pub fn requires<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(names.into_iter().map(Into::into));
        self
    }

    /// Builder: append commands
    pub fn commands<I, C>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Command>,
    {
        self.commands.extend(commands.into_iter().map(Into::into));
        self
    }

    /// Whether this task is the initialization task of its own console
    pub fn is_console_init(&self) -> bool {
        self.console.is_some_and(|c| c.as_str() == self.name)
    }

    /// Check structural invariants that do not depend on other tasks
    ///
    /// Also collapses duplicate `requires`/`before` entries, keeping the
    /// first occurrence.
    pub fn validate(&mut self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("<unnamed>", "name", "task name must not be empty"));
        }

        if self.console.is_none() && !self.commands.is_empty() {
            return Err(Error::config(
                &self.name,
                "console",
                "a task with commands must be bound to a console",
            ));
        }

        for (i, command) in self.commands.iter().enumerate() {
            if command.text.is_empty() && command.expect.is_empty() {
                return Err(Error::config(
                    &self.name,
                    &format!("commands[{}]", i),
                    "command has neither text nor expect",
                ));
            }
        }

        dedup_in_order(&mut self.requires);
        dedup_in_order(&mut self.before);
        Ok(())
    }
}

fn dedup_in_order(names: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    names.retain(|name| seen.insert(name.clone()));
}
