//! Scripted console double
//!
//! Serves pre-configured replies to sent lines and records everything sent,
//! making orchestration behaviour testable without real sessions. Replies
//! arrive through the same `OutputStream` the process console uses, so
//! pattern waits and exit probes behave identically.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::common::{Error, Result};
use crate::task::ConsoleId;

use super::stream::{Deadline, OutputStream, PatternMatch, EXIT_MARKER};
use super::{Console, ConsoleFactory};

/// What a scripted console does in answer to one sent line
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Output produced by the line
    pub output: String,
    /// Exit code reported by the next probe
    pub exit_code: i32,
    /// Whether the next probe gets an answer at all
    pub answers_probe: bool,
    /// The session dies after producing the output
    pub terminates: bool,
}

impl Default for Reply {
    fn default() -> Self {
        Self {
            output: String::new(),
            exit_code: 0,
            answers_probe: true,
            terminates: false,
        }
    }
}

impl Reply {
    pub fn output(text: impl Into<String>) -> Self {
        Self {
            output: text.into(),
            ..Default::default()
        }
    }

    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Default::default()
        }
    }

    /// Builder: set the exit code
    pub fn with_exit(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// The next probe hangs until its deadline
    pub fn silent_probe(mut self) -> Self {
        self.answers_probe = false;
        self
    }

    /// The session dies once this line is sent
    pub fn terminate(mut self) -> Self {
        self.terminates = true;
        self
    }
}

/// A line recorded by a scripted console
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub console: ConsoleId,
    pub line: String,
    pub at: Instant,
}

#[derive(Default)]
struct ScriptState {
    replies: HashMap<String, Reply>,
    banners: HashMap<ConsoleId, String>,
    no_probe: HashSet<ConsoleId>,
    unavailable: HashSet<ConsoleId>,
    dead: HashSet<ConsoleId>,
    sent: Vec<Sent>,
    opened: Vec<ConsoleId>,
    closes: HashMap<ConsoleId, usize>,
}

/// Hands out `ScriptedConsole`s sharing one script and one record
///
/// Clones share state, so a test keeps a handle for inspection while the
/// orchestrator owns another.
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Script the reply to a sent line, on whichever console it is sent
    pub fn on(&self, line: &str, reply: Reply) -> &Self {
        self.state().replies.insert(line.to_string(), reply);
        self
    }

    /// Output a console produces as soon as it is opened
    pub fn banner(&self, console: ConsoleId, text: &str) -> &Self {
        self.state().banners.insert(console, text.to_string());
        self
    }

    /// The console answers no exit-code probes; every probe reports 0
    pub fn without_probe(&self, console: ConsoleId) -> &Self {
        self.state().no_probe.insert(console);
        self
    }

    /// Opening the console fails
    pub fn unavailable(&self, console: ConsoleId) -> &Self {
        self.state().unavailable.insert(console);
        self
    }

    /// Kill a console's session; later sends fail
    pub fn kill(&self, console: ConsoleId) {
        self.state().dead.insert(console);
    }

    /// Everything sent, in order
    pub fn sent(&self) -> Vec<Sent> {
        self.state().sent.clone()
    }

    /// Sent lines without exit probes
    pub fn sent_lines(&self) -> Vec<String> {
        self.state()
            .sent
            .iter()
            .filter(|s| !s.line.contains(EXIT_MARKER))
            .map(|s| s.line.clone())
            .collect()
    }

    /// Consoles opened, in order of first use
    pub fn opened(&self) -> Vec<ConsoleId> {
        self.state().opened.clone()
    }

    /// How often a console was closed
    pub fn close_count(&self, console: ConsoleId) -> usize {
        self.state().closes.get(&console).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ConsoleFactory for ScriptedFactory {
    async fn open(&mut self, id: ConsoleId) -> Result<Box<dyn Console>> {
        let mut state = self.state();
        if state.unavailable.contains(&id) {
            return Err(Error::ConsoleStartFailed {
                name: id.to_string(),
                reason: "scripted as unavailable".to_string(),
            });
        }
        state.opened.push(id);

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(banner) = state.banners.get(&id) {
            let _ = tx.send(banner.clone().into_bytes());
        }

        Ok(Box::new(ScriptedConsole {
            id,
            state: Arc::clone(&self.state),
            tx: Some(tx),
            output: OutputStream::new(id.as_str(), rx),
            last: Reply::default(),
            last_match: 0,
        }))
    }
}

/// A console whose output is scripted per sent line
pub struct ScriptedConsole {
    id: ConsoleId,
    state: Arc<Mutex<ScriptState>>,
    /// Dropped when the session dies, which closes the output stream
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    output: OutputStream,
    last: Reply,
    last_match: usize,
}

impl ScriptedConsole {
    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_dead(&self) -> bool {
        self.tx.is_none() || self.state().dead.contains(&self.id)
    }

    fn emit(&self, text: &str) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(text.as_bytes().to_vec());
        }
    }
}

#[async_trait]
impl Console for ScriptedConsole {
    async fn send(&mut self, line: &str) -> Result<()> {
        if self.is_dead() {
            self.tx = None;
            return Err(Error::ShellTerminated(self.id.to_string()));
        }

        let reply = {
            let mut state = self.state();
            state.sent.push(Sent {
                console: self.id,
                line: line.to_string(),
                at: Instant::now(),
            });
            state.replies.get(line).cloned().unwrap_or_default()
        };

        self.emit(&reply.output);
        if reply.terminates {
            self.state().dead.insert(self.id);
            self.tx = None;
        }
        self.last = reply;
        Ok(())
    }

    async fn await_any(
        &mut self,
        patterns: &[String],
        deadline: Option<Duration>,
    ) -> Result<PatternMatch> {
        if self.state().dead.contains(&self.id) {
            self.tx = None;
        }
        let matched = self
            .output
            .read_any(patterns, deadline.map(Deadline::after))
            .await?;
        self.last_match = matched.index;
        Ok(matched)
    }

    fn last_match(&self) -> usize {
        self.last_match
    }

    async fn probe_exit_code(&mut self, deadline: Option<Duration>) -> Result<i32> {
        if self.state().no_probe.contains(&self.id) {
            return Ok(0);
        }

        let last = self.last.clone();
        self.send(&super::stream::exit_probe_line()).await?;
        if last.answers_probe {
            self.emit(&format!("{}{}\n", EXIT_MARKER, last.exit_code));
        }
        self.last = last;
        self.output.read_probe_answer(None, deadline).await
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        *self.state().closes.entry(self.id).or_default() += 1;
        Ok(())
    }
}
