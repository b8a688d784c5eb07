//! Task definition loading
//!
//! Deserializes YAML task definitions into raw `TaskDef`s and validates
//! them into `Task`s. Errors name the offending task and field.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_yaml::Value;

use crate::common::{paths, Error, Result};

use super::types::{Command, ConsoleId, Task};

/// Name given to a task built from inline script text
pub const SCRIPT_TASK_NAME: &str = "user";

/// A task definition as written in a YAML file
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct TaskDef {
    pub name: Option<String>,
    #[serde(alias = "shell")]
    pub console: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub before: Vec<String>,
    pub echo: Option<bool>,
    /// Seconds
    pub timeout: Option<f64>,
    #[serde(alias = "failFast")]
    pub fail_fast: Option<bool>,
    /// Seconds
    #[serde(alias = "sleep", alias = "sleepAfter")]
    pub sleep_after: Option<f64>,
    #[serde(alias = "checkExitCode")]
    pub check_exit_code: Option<bool>,
    #[serde(alias = "shouldFail")]
    pub should_fail: Option<bool>,
    pub disabled: Option<bool>,
    /// Bare strings or command records; converted one by one so that
    /// errors can name the command index
    #[serde(default)]
    pub commands: Vec<Value>,
    #[serde(default)]
    pub vars: HashMap<String, Value>,
}

/// The structured form of a command
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct CommandDef {
    /// One line, or alternatives chosen by the last matched pattern
    #[serde(default, alias = "command", deserialize_with = "one_or_many")]
    pub text: Vec<String>,
    /// One pattern, or several of which the first to appear wins
    #[serde(default, deserialize_with = "one_or_many")]
    pub expect: Vec<String>,
    /// Seconds
    pub timeout: Option<f64>,
    pub echo: Option<bool>,
    #[serde(alias = "checkExitCode")]
    pub check_exit_code: Option<bool>,
    #[serde(alias = "shouldFail")]
    pub should_fail: Option<bool>,
}

impl CommandDef {
    /// Validate into a `Command`; `task` and `field` locate errors
    pub fn into_command(self, task: &str, field: &str) -> Result<Command> {
        let timeout = self
            .timeout
            .map(|secs| parse_seconds(secs, task, &format!("{}.timeout", field)))
            .transpose()?;

        let command = Command {
            text: self.text,
            expect: self.expect,
            timeout,
            echo: self.echo,
            check_exit_code: self.check_exit_code,
            should_fail: self.should_fail,
        };

        if command.text.is_empty() && command.expect.is_empty() {
            return Err(Error::config(task, field, "command has neither text nor expect"));
        }
        Ok(command)
    }
}

/// A single string or a list of strings
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

impl TaskDef {
    /// Validate into a `Task`
    ///
    /// `origin` identifies the definition (usually a file path) when the
    /// task has no name to report.
    pub fn into_task(self, origin: &str) -> Result<Task> {
        let name = match self.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => return Err(Error::config(origin, "name", "missing mandatory field")),
        };

        let console = self
            .console
            .as_deref()
            .map(|raw| raw.parse::<ConsoleId>())
            .transpose()
            .map_err(|msg| Error::config(&name, "console", msg))?;

        let timeout = self
            .timeout
            .map(|secs| parse_seconds(secs, &name, "timeout"))
            .transpose()?;
        let sleep_after = self
            .sleep_after
            .map(|secs| parse_seconds(secs, &name, "sleep_after"))
            .transpose()?
            .unwrap_or(Duration::ZERO);

        let commands = self
            .commands
            .into_iter()
            .enumerate()
            .map(|(i, raw)| parse_command(raw, &name, i))
            .collect::<Result<Vec<_>>>()?;

        let vars = self
            .vars
            .into_iter()
            .map(|(key, value)| {
                let field = format!("vars.{}", key);
                scalar_to_string(value)
                    .map(|value| (key, value))
                    .ok_or_else(|| Error::config(&name, &field, "value must be a scalar"))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        let defaults = Task::default();
        let mut task = Task {
            name,
            console,
            requires: self.requires,
            before: self.before,
            echo: self.echo.unwrap_or(defaults.echo),
            timeout,
            fail_fast: self.fail_fast.unwrap_or(defaults.fail_fast),
            sleep_after,
            check_exit_code: self.check_exit_code.unwrap_or(defaults.check_exit_code),
            should_fail: self.should_fail.unwrap_or(defaults.should_fail),
            disabled: self.disabled.unwrap_or(defaults.disabled),
            commands,
            vars,
        };
        task.validate()?;
        Ok(task)
    }
}

fn parse_command(raw: Value, task: &str, index: usize) -> Result<Command> {
    let field = format!("commands[{}]", index);
    match raw {
        Value::String(text) => Ok(Command::line(text)),
        Value::Mapping(_) => serde_yaml::from_value::<CommandDef>(raw)
            .map_err(|e| Error::config(task, &field, e.to_string()))?
            .into_command(task, &field),
        _ => Err(Error::config(
            task,
            &field,
            "expected a string or a command record",
        )),
    }
}

fn parse_seconds(secs: f64, task: &str, field: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::config(task, field, format!("invalid duration: {}", secs)))
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse a single task from YAML text
pub fn parse_task(yaml: &str, origin: &str) -> Result<Task> {
    let def: TaskDef = serde_yaml::from_str(yaml).map_err(|e| Error::TaskParse {
        path: origin.to_string(),
        error: e.to_string(),
    })?;
    def.into_task(origin)
}

/// Load a task from a YAML file
pub fn load_task_file(path: &Path) -> Result<Task> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    parse_task(&content, &path.display().to_string())
}

/// Load every task file below `dir`, in sorted path order
pub fn load_dir(dir: &Path) -> Result<Vec<Task>> {
    let files = paths::task_files(dir).map_err(|e| Error::FileRead {
        path: dir.display().to_string(),
        error: e.to_string(),
    })?;

    files
        .iter()
        .map(|path| {
            tracing::debug!("Loading task file {}", path.display());
            load_task_file(path)
        })
        .collect()
}

/// Build a task from inline script text
///
/// If `text` reads as a YAML task definition it is used as one; otherwise
/// every non-empty line becomes one command. Fields missing from the
/// definition default to: name `user`, console `target`, echo on. `requires`
/// is appended to whatever the definition lists.
pub fn script_task(text: &str, requires: &[String]) -> Result<Task> {
    let definition = match serde_yaml::from_str::<Value>(text) {
        Ok(value @ Value::Mapping(_)) => serde_yaml::from_value::<TaskDef>(value)
            .map_err(|e| tracing::debug!("Script is not a task definition ({}), reading lines", e))
            .ok(),
        _ => None,
    };

    let mut def = definition.unwrap_or_else(|| TaskDef {
        commands: text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| Value::String(line.to_string()))
            .collect(),
        ..Default::default()
    });

    def.name.get_or_insert_with(|| SCRIPT_TASK_NAME.to_string());
    def.console.get_or_insert_with(|| ConsoleId::Target.as_str().to_string());
    def.echo.get_or_insert(true);
    def.requires.extend(requires.iter().cloned());

    def.into_task("<script>")
}
