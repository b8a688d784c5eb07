//! Interactive console sessions
//!
//! A console is a line-oriented session (host shell, target serial line,
//! emulator monitor). The engine only needs four operations: send a line,
//! wait for a pattern, probe the last exit code and close. Every console
//! kind implements the same `Console` trait.

pub mod mock;
pub mod process;
pub mod stream;

use std::time::Duration;

use async_trait::async_trait;

use crate::common::Result;
use crate::task::ConsoleId;

pub use process::{ProcessConsole, ProcessFactory};
pub use stream::{Deadline, OutputStream, PatternMatch};

/// An interactive session bound to one console identity
#[async_trait]
pub trait Console: Send {
    /// Pattern awaited after commands that declare no `expect` of their own
    fn prompt(&self) -> Option<&str> {
        None
    }

    /// Write `line` plus a line terminator
    ///
    /// Fails with `ShellTerminated` if the session is dead.
    async fn send(&mut self, line: &str) -> Result<()>;

    /// Block until any of `patterns` appears in the accumulated output
    ///
    /// `None` waits indefinitely; otherwise fails with `Timeout` once
    /// `deadline` elapses. The index of the match is remembered as
    /// `last_match`.
    async fn await_any(
        &mut self,
        patterns: &[String],
        deadline: Option<Duration>,
    ) -> Result<PatternMatch>;

    /// Block until `pattern` appears, returning everything read up to and
    /// including the match
    async fn await_pattern(&mut self, pattern: &str, deadline: Option<Duration>) -> Result<String> {
        let matched = self.await_any(&[pattern.to_string()], deadline).await?;
        Ok(matched.captured)
    }

    /// Index of the alternative matched by the latest `await_any`; 0 before
    /// any wait
    fn last_match(&self) -> usize;

    /// Ask the remote shell for the exit code of the last command
    ///
    /// The whole exchange, including the prompt that follows the answer,
    /// runs under one `deadline`.
    async fn probe_exit_code(&mut self, deadline: Option<Duration>) -> Result<i32>;

    /// Tear the session down
    async fn close(&mut self) -> Result<()>;
}

/// Opens consoles on first use
#[async_trait]
pub trait ConsoleFactory: Send {
    async fn open(&mut self, id: ConsoleId) -> Result<Box<dyn Console>>;
}
