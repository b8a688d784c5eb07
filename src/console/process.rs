//! Consoles backed by a spawned process
//!
//! Each session is started as `sh -c <spawn>` with piped stdio; stdout and
//! stderr are forwarded by background reader tasks into one output stream.
//! Attaching to a serial line or a monitor socket is the spawned command's
//! job (e.g. `telnet 127.0.0.1 3456`).

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use crate::common::config::{Config, ConsoleConfig};
use crate::common::{Error, Result};
use crate::task::ConsoleId;

use super::stream::{exit_probe_line, Deadline, OutputStream, PatternMatch};
use super::{Console, ConsoleFactory};

/// A console session running as a child process
pub struct ProcessConsole {
    id: ConsoleId,
    settings: ConsoleConfig,
    child: Child,
    writer: BufWriter<ChildStdin>,
    output: OutputStream,
    last_match: usize,
}

impl ProcessConsole {
    /// Spawn the session described by `settings`
    pub fn spawn(id: ConsoleId, settings: ConsoleConfig) -> Result<Self> {
        tracing::info!(console = %id, "Spawning console: {}", settings.spawn);

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&settings.spawn)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ConsoleStartFailed {
                name: id.to_string(),
                reason: e.to_string(),
            })?;

        let start_failed = |what: &str| Error::ConsoleStartFailed {
            name: id.to_string(),
            reason: format!("failed to get {}", what),
        };
        let stdin = child.stdin.take().ok_or_else(|| start_failed("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| start_failed("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| start_failed("stderr"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward(stdout, tx.clone()));
        tokio::spawn(forward(stderr, tx));

        Ok(Self {
            id,
            output: OutputStream::new(id.as_str(), rx),
            settings,
            child,
            writer: BufWriter::new(stdin),
            last_match: 0,
        })
    }

    fn terminated(&self) -> Error {
        Error::ShellTerminated(self.id.to_string())
    }
}

/// Copy everything read from `reader` into the output channel until EOF
async fn forward<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = vec![0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Console for ProcessConsole {
    fn prompt(&self) -> Option<&str> {
        self.settings.prompt.as_deref()
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return Err(self.terminated());
        }

        tracing::debug!(console = %self.id, ">>> {}", line);
        let written = async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await
        }
        .await;

        written.map_err(|e| {
            tracing::debug!(console = %self.id, "Write failed: {}", e);
            self.terminated()
        })
    }

    async fn await_any(
        &mut self,
        patterns: &[String],
        deadline: Option<Duration>,
    ) -> Result<PatternMatch> {
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
        if !self.settings.exit_code_probe {
            return Ok(0);
        }

        self.send(&exit_probe_line()).await?;
        self.output
            .read_probe_answer(self.settings.prompt.as_deref(), deadline)
            .await
    }

    async fn close(&mut self) -> Result<()> {
        tracing::debug!(console = %self.id, "Closing console");
        let _ = self.writer.shutdown().await;

        // Give the session a moment to exit on EOF before killing it
        let exited = tokio::time::timeout(Duration::from_millis(100), self.child.wait()).await;
        if exited.is_err() {
            self.child.kill().await?;
        }
        Ok(())
    }
}

impl Drop for ProcessConsole {
    fn drop(&mut self) {
        // Best-effort since we can't await in drop
        let _ = self.child.start_kill();
    }
}

/// Opens `ProcessConsole`s from configuration
pub struct ProcessFactory {
    consoles: Vec<(ConsoleId, ConsoleConfig)>,
}

impl ProcessFactory {
    pub fn new(config: &Config) -> Self {
        Self {
            consoles: ConsoleId::ALL
                .iter()
                .map(|&id| (id, config.console(id)))
                .collect(),
        }
    }
}

#[async_trait]
impl ConsoleFactory for ProcessFactory {
    async fn open(&mut self, id: ConsoleId) -> Result<Box<dyn Console>> {
        let settings = self
            .consoles
            .iter()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, settings)| settings.clone())
            .ok_or_else(|| Error::Internal(format!("no settings for console '{}'", id)))?;

        Ok(Box::new(ProcessConsole::spawn(id, settings)?))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn settings(spawn: &str, prompt: Option<&str>) -> ConsoleConfig {
        ConsoleConfig {
            spawn: spawn.to_string(),
            prompt: prompt.map(str::to_string),
            init: Vec::new(),
            init_sleep_secs: 0.0,
            requires: Vec::new(),
            exit_code_probe: true,
        }
    }

    #[tokio::test]
    async fn test_send_and_await_through_sh() {
        let mut console = ProcessConsole::spawn(ConsoleId::Host, settings("sh", None)).unwrap();

        console.send("echo hello-from-console").await.unwrap();
        let out = console
            .await_pattern("hello-from-console", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(out.ends_with("hello-from-console"));

        console.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_exit_code_through_sh() {
        let mut console = ProcessConsole::spawn(ConsoleId::Host, settings("sh", None)).unwrap();

        console.send("sh -c 'exit 7'").await.unwrap();
        let code = console
            .probe_exit_code(Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(code, 7);

        console.send("true").await.unwrap();
        let code = console
            .probe_exit_code(Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(code, 0);

        console.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_await_any_remembers_alternative() {
        let mut console = ProcessConsole::spawn(ConsoleId::Target, settings("sh", None)).unwrap();
        assert_eq!(console.last_match(), 0);

        console.send("echo buildroot login:").await.unwrap();
        let patterns = vec!["# ".to_string(), "login:".to_string()];
        let matched = console
            .await_any(&patterns, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(matched.index, 1);
        assert_eq!(console.last_match(), 1);

        console.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_waits_for_prompt_within_one_deadline() {
        // The prompt never follows the answer, so the probe must give up
        // once its single deadline is spent
        let mut console =
            ProcessConsole::spawn(ConsoleId::Host, settings("sh", Some("never-a-prompt"))).unwrap();
        let started = std::time::Instant::now();

        console.send("true").await.unwrap();
        let err = console
            .probe_exit_code(Some(Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(1900));
        console.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_exited_session_reports_terminated() {
        let mut console =
            ProcessConsole::spawn(ConsoleId::Target, settings("echo bye", None)).unwrap();

        let err = console
            .await_pattern("never-printed", Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ShellTerminated(_)));
    }

    #[tokio::test]
    async fn test_probe_skipped_when_unsupported() {
        let mut no_probe = settings("cat", None);
        no_probe.exit_code_probe = false;
        let mut console = ProcessConsole::spawn(ConsoleId::Monitor, no_probe).unwrap();

        assert_eq!(console.probe_exit_code(None).await.unwrap(), 0);
        console.close().await.unwrap();
    }
}
