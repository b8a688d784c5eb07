//! Configuration file handling
//!
//! The config describes how each console is spawned and initialized, where
//! task files live and which extra global variables a run starts with.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};
use crate::task::loader::CommandDef;
use crate::task::{Command, ConsoleId, Task};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Run settings
    #[serde(default)]
    pub run: RunConfig,

    /// Extra global variables
    #[serde(default)]
    pub vars: HashMap<String, String>,

    /// Console overrides keyed by console name; consoles not listed keep
    /// their built-in settings
    #[serde(default)]
    pub consoles: HashMap<String, ConsoleConfig>,
}

/// Run settings
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    /// Stop the whole run at the first failing task
    #[serde(default = "default_true")]
    pub fail_fast: bool,

    /// Board name exposed as `${{BOARD}}`
    #[serde(default = "default_board")]
    pub board: String,

    /// Directories holding base task files
    #[serde(default)]
    pub task_dirs: Vec<PathBuf>,

    /// Directories holding override task files
    #[serde(default)]
    pub override_dirs: Vec<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            fail_fast: true,
            board: default_board(),
            task_dirs: Vec::new(),
            override_dirs: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_board() -> String {
    "default".to_string()
}

/// An initialization command: a bare line or a full command record
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum InitCommand {
    Line(String),
    Record(CommandDef),
}

/// How a console is spawned and initialized
#[derive(Debug, Deserialize, Clone)]
pub struct ConsoleConfig {
    /// Shell command line that starts the session
    pub spawn: String,

    /// Pattern awaited after commands without their own `expect`
    #[serde(default)]
    pub prompt: Option<String>,

    /// Commands of the console's initialization task
    #[serde(default)]
    pub init: Vec<InitCommand>,

    /// Seconds to wait after initialization
    #[serde(default)]
    pub init_sleep_secs: f64,

    /// Tasks the initialization task requires
    #[serde(default)]
    pub requires: Vec<String>,

    /// Whether the session answers exit-code probes
    #[serde(default = "default_true")]
    pub exit_code_probe: bool,
}

impl ConsoleConfig {
    /// Built-in settings for the emulator setup
    pub fn builtin(id: ConsoleId) -> Self {
        let wait = |pattern: &str| {
            InitCommand::Record(CommandDef {
                expect: vec![pattern.to_string()],
                timeout: Some(5.0),
                ..Default::default()
            })
        };
        let run = |text: &str, pattern: &str| {
            InitCommand::Record(CommandDef {
                text: vec![text.to_string()],
                expect: vec![pattern.to_string()],
                timeout: Some(5.0),
                ..Default::default()
            })
        };

        match id {
            ConsoleId::Host => Self {
                spawn: "sh -i".to_string(),
                prompt: Some("#".to_string()),
                init: vec![wait("#"), run("screen -d -m renode --disable-xwt", "#")],
                init_sleep_secs: 5.0,
                requires: Vec::new(),
                exit_code_probe: true,
            },
            ConsoleId::Monitor => Self {
                spawn: "telnet 127.0.0.1 1234".to_string(),
                prompt: Some("(monitor)".to_string()),
                init: vec![
                    wait("(monitor)"),
                    run(
                        "emulation CreateServerSocketTerminal 3456 \"term\"",
                        "(monitor)",
                    ),
                ],
                init_sleep_secs: 3.0,
                requires: vec![ConsoleId::Host.as_str().to_string()],
                exit_code_probe: false,
            },
            ConsoleId::Target => Self {
                spawn: "telnet 127.0.0.1 3456".to_string(),
                prompt: Some("#".to_string()),
                init: Vec::new(),
                init_sleep_secs: 0.0,
                requires: vec![ConsoleId::Monitor.as_str().to_string()],
                exit_code_probe: true,
            },
        }
    }

    /// The console's initialization task, named after the console
    pub fn init_task(&self, id: ConsoleId) -> Result<Task> {
        let name = id.as_str();
        let commands = self
            .init
            .iter()
            .enumerate()
            .map(|(i, command)| match command {
                InitCommand::Line(text) => Ok(Command::line(text.clone())),
                InitCommand::Record(def) => def
                    .clone()
                    .into_command(name, &format!("init[{}]", i)),
            })
            .collect::<Result<Vec<_>>>()?;

        let sleep_after = Duration::try_from_secs_f64(self.init_sleep_secs).map_err(|_| {
            Error::config(
                name,
                "init_sleep_secs",
                format!("invalid duration: {}", self.init_sleep_secs),
            )
        })?;

        let mut task = Task::new(name).on(id).requires(self.requires.iter().cloned());
        task.sleep_after = sleep_after;
        task.commands = commands;
        Ok(task)
    }
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path must exist. Without one, the default config file is
    /// used if present, otherwise built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;

        config.check_console_keys()?;
        Ok(config)
    }

    /// Every console key must name a known console, and no console may be
    /// configured twice under aliases
    fn check_console_keys(&self) -> Result<()> {
        let mut seen: HashMap<ConsoleId, &str> = HashMap::new();
        for name in self.consoles.keys() {
            let id = name.parse::<ConsoleId>().map_err(Error::ConfigParse)?;
            if let Some(other) = seen.insert(id, name) {
                return Err(Error::ConfigParse(format!(
                    "consoles '{}' and '{}' both configure the {} console",
                    other, name, id
                )));
            }
        }
        Ok(())
    }

    /// Effective settings for a console
    pub fn console(&self, id: ConsoleId) -> ConsoleConfig {
        self.consoles
            .iter()
            .find(|(name, _)| name.parse::<ConsoleId>() == Ok(id))
            .map(|(_, console)| console.clone())
            .unwrap_or_else(|| ConsoleConfig::builtin(id))
    }

    /// Initialization tasks of every console, in initialization order
    pub fn console_tasks(&self) -> Result<Vec<Task>> {
        ConsoleId::ALL
            .iter()
            .map(|&id| self.console(id).init_task(id))
            .collect()
    }
}
