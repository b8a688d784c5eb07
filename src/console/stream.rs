//! Accumulated console output
//!
//! Reader tasks push raw chunks into a channel; `OutputStream` decodes them
//! into a buffer and serves pattern waits against an absolute deadline. A
//! closed channel means the session is gone.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::common::{Error, Result};

/// Prefix of the line a shell prints in answer to an exit-code probe
pub const EXIT_MARKER: &str = "RESULT:";

/// Shell line that makes the remote shell print its last exit status
pub fn exit_probe_line() -> String {
    format!("echo {}${{?}}", EXIT_MARKER)
}

/// A point in time a wait must finish by, plus the budget it was set from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// A deadline `budget` from now
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    fn expired(&self, description: &str) -> Error {
        Error::timeout(description, self.budget)
    }
}

/// Which of several patterns matched, and the output consumed by the match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    /// Index of the matching pattern
    pub index: usize,
    /// Everything read up to and including the match
    pub captured: String,
}

/// Buffered output of one console session
pub struct OutputStream {
    name: String,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence
    undecoded: Vec<u8>,
}

impl OutputStream {
    pub fn new(name: impl Into<String>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            rx,
            buffer: String::new(),
            undecoded: Vec::new(),
        }
    }

    /// Output received but not yet consumed by a match
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Wait until `pattern` appears, returning everything up to and
    /// including the match
    pub async fn read_until(&mut self, pattern: &str, deadline: Option<Deadline>) -> Result<String> {
        let (captured, ()) = self
            .read_matching(pattern, deadline, |buffer| {
                buffer.find(pattern).map(|start| (start + pattern.len(), ()))
            })
            .await?;
        Ok(captured)
    }

    /// Wait until any of `patterns` appears
    ///
    /// The match starting earliest in the output wins; on a tie the pattern
    /// listed first.
    pub async fn read_any(
        &mut self,
        patterns: &[String],
        deadline: Option<Deadline>,
    ) -> Result<PatternMatch> {
        let description = patterns.join(" | ");
        let (captured, index) = self
            .read_matching(&description, deadline, |buffer| earliest_match(buffer, patterns))
            .await?;
        Ok(PatternMatch { index, captured })
    }

    /// Wait for an exit marker line and parse its numeric code
    pub async fn read_exit_code(&mut self, deadline: Option<Deadline>) -> Result<i32> {
        let (_, code) = self
            .read_matching(EXIT_MARKER, deadline, find_exit_marker)
            .await?;
        Ok(code)
    }

    /// Read the answer to an exit-code probe, then the prompt that follows
    /// it, both within one `timeout`
    pub async fn read_probe_answer(
        &mut self,
        prompt: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<i32> {
        let deadline = timeout.map(Deadline::after);
        let code = self.read_exit_code(deadline).await?;
        if let Some(prompt) = prompt {
            self.read_until(prompt, deadline).await?;
        }
        Ok(code)
    }

    async fn read_matching<T, F>(
        &mut self,
        description: &str,
        deadline: Option<Deadline>,
        matcher: F,
    ) -> Result<(String, T)>
    where
        F: Fn(&str) -> Option<(usize, T)>,
    {
        loop {
            if let Some((end, value)) = matcher(&self.buffer) {
                let captured: String = self.buffer.drain(..end).collect();
                tracing::debug!(console = %self.name, "<<< {:?}", captured);
                return Ok((captured, value));
            }

            let chunk = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline.at, self.rx.recv())
                    .await
                    .map_err(|_| deadline.expired(description))?,
                None => self.rx.recv().await,
            };

            match chunk {
                Some(bytes) => self.decode(&bytes),
                None => return Err(Error::ShellTerminated(self.name.clone())),
            }
        }
    }

    /// Append `bytes` to the buffer, holding back an incomplete trailing
    /// UTF-8 sequence until the rest of it arrives
    fn decode(&mut self, bytes: &[u8]) {
        self.undecoded.extend_from_slice(bytes);
        let mut rest: &[u8] = &self.undecoded;

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.undecoded = rest.to_vec();
    }
}

/// End of the earliest match among `patterns` and the index of its pattern
fn earliest_match(buffer: &str, patterns: &[String]) -> Option<(usize, usize)> {
    patterns
        .iter()
        .enumerate()
        .filter_map(|(i, pattern)| buffer.find(pattern.as_str()).map(|start| (start, i, pattern.len())))
        .min_by_key(|&(start, i, _)| (start, i))
        .map(|(start, i, len)| (start + len, i))
}

/// Find `RESULT:<digits>` followed by a line break; returns the end of the
/// line and the parsed code
///
/// The echoed probe command itself (`RESULT:${?}`) never matches because no
/// digit follows the marker.
fn find_exit_marker(buffer: &str) -> Option<(usize, i32)> {
    let mut offset = 0;
    while let Some(found) = buffer[offset..].find(EXIT_MARKER) {
        let start = offset + found + EXIT_MARKER.len();
        let rest = &buffer[start..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let after = &rest[digits..];

        if digits > 0 && (after.starts_with('\n') || after.starts_with('\r')) {
            let code = rest[..digits].parse().ok()?;
            let line_end = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
            return Some((start + digits + line_end, code));
        }
        offset = start;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> (mpsc::UnboundedSender<Vec<u8>>, OutputStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, OutputStream::new("test", rx))
    }

    #[tokio::test]
    async fn test_read_until_returns_text_through_match() {
        let (tx, mut out) = stream();
        tx.send(b"Welcome\nbuildroot lo".to_vec()).unwrap();
        tx.send(b"gin: rest".to_vec()).unwrap();

        let captured = out.read_until("login:", None).await.unwrap();
        assert_eq!(captured, "Welcome\nbuildroot login:");
        assert_eq!(out.pending(), " rest");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_until_times_out_at_deadline() {
        let (_tx, mut out) = stream();
        let started = Instant::now();

        let err = out
            .read_until("never", Some(Deadline::after(Duration::from_secs(2))))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_closed_session_is_terminated() {
        let (tx, mut out) = stream();
        tx.send(b"partial".to_vec()).unwrap();
        drop(tx);

        let err = out.read_until("#", None).await.unwrap_err();
        assert!(matches!(err, Error::ShellTerminated(ref name) if name == "test"));
    }

    #[tokio::test]
    async fn test_read_exit_code_skips_echoed_probe() {
        let (tx, mut out) = stream();
        tx.send(b"echo RESULT:${?}\r\nRESULT:3\r\n# ".to_vec()).unwrap();

        assert_eq!(out.read_exit_code(None).await.unwrap(), 3);
        assert_eq!(out.pending(), "# ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_answer_and_prompt_share_one_deadline() {
        let (tx, mut out) = stream();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            tx.send(b"RESULT:0\n".to_vec()).unwrap();
            // Keep the session alive without ever printing the prompt
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(tx);
        });
        let started = Instant::now();

        let err = out
            .read_probe_answer(Some("# "), Some(Duration::from_secs(2)))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { ref pattern, .. } if pattern == "# "));
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_millis(2100));
    }

    #[tokio::test]
    async fn test_probe_answer_consumes_prompt() {
        let (tx, mut out) = stream();
        tx.send(b"RESULT:4\r\n# next".to_vec()).unwrap();

        let code = out.read_probe_answer(Some("# "), None).await.unwrap();
        assert_eq!(code, 4);
        assert_eq!(out.pending(), "next");
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        let (tx, mut out) = stream();
        let text = "Zażółć login:".as_bytes();
        // 'ż' is two bytes starting at offset 2
        tx.send(text[..3].to_vec()).unwrap();
        tx.send(text[3..].to_vec()).unwrap();

        let captured = out
            .read_until("Zażółć", Some(Deadline::after(Duration::from_secs(2))))
            .await
            .unwrap();
        assert_eq!(captured, "Zażółć");
        assert_eq!(out.pending(), " login:");
    }

    #[tokio::test]
    async fn test_invalid_bytes_are_replaced() {
        let (tx, mut out) = stream();
        tx.send(b"bad \xff byte\n".to_vec()).unwrap();

        let captured = out.read_until("byte", None).await.unwrap();
        assert_eq!(captured, "bad \u{FFFD} byte");
    }

    #[tokio::test]
    async fn test_read_any_reports_earliest_alternative() {
        let (tx, mut out) = stream();
        tx.send(b"Welcome\nbuildroot login: ".to_vec()).unwrap();
        let patterns = vec!["# ".to_string(), "login:".to_string()];

        let matched = out.read_any(&patterns, None).await.unwrap();
        assert_eq!(matched.index, 1);
        assert_eq!(matched.captured, "Welcome\nbuildroot login:");

        tx.send(b"root\n# ".to_vec()).unwrap();
        let matched = out.read_any(&patterns, None).await.unwrap();
        assert_eq!(matched.index, 0);
    }

    #[test]
    fn test_earliest_match_prefers_first_listed_on_tie() {
        let patterns = vec!["ab".to_string(), "a".to_string()];
        assert_eq!(earliest_match("xab", &patterns), Some((3, 0)));
        assert_eq!(earliest_match("xyz", &patterns), None);
    }

    #[test]
    fn test_find_exit_marker_needs_complete_line() {
        assert_eq!(find_exit_marker("RESULT:12"), None);
        assert_eq!(find_exit_marker("RESULT:12\n"), Some((10, 12)));
        assert_eq!(find_exit_marker("RESULT:x\nRESULT:0\n"), Some((18, 0)));
    }

    #[test]
    fn test_exit_probe_line() {
        assert_eq!(exit_probe_line(), "echo RESULT:${?}");
    }
}
