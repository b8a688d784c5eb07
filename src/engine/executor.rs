//! Command execution within one task
//!
//! Commands run strictly in order against the task's console. A failing
//! command records its result code; the task's `fail_fast` decides whether
//! the remaining commands still run. Fatal errors propagate unchanged.

use std::io::Write;
use std::time::Duration;

use crate::common::{Error, Result};
use crate::console::Console;
use crate::task::{Command, Scope, Task, Variables};

/// Result of running one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskOutcome {
    /// Last non-zero result code observed, 0 if every command succeeded
    pub code: i32,
    /// Remaining commands were skipped after a failure
    pub abort: bool,
}

impl TaskOutcome {
    pub fn passed(&self) -> bool {
        self.code == 0
    }
}

/// Effective settings of one command after inheriting task defaults
#[derive(Debug, Clone, Copy, PartialEq)]
struct Settings {
    echo: bool,
    timeout: Option<Duration>,
    check_exit_code: bool,
    should_fail: bool,
}

impl Settings {
    fn resolve(task: &Task, command: &Command) -> Self {
        Self {
            echo: command.echo.unwrap_or(task.echo),
            timeout: command.timeout.or(task.timeout),
            check_exit_code: command.check_exit_code.unwrap_or(task.check_exit_code),
            should_fail: command.should_fail.unwrap_or(task.should_fail),
        }
    }
}

/// Run every command of `task` on `console`, then sleep `sleep_after`
///
/// `console` may only be `None` for tasks without commands. Captured output
/// of echoing commands is written to `out`.
pub async fn run_task<W: Write>(
    task: &Task,
    mut console: Option<&mut dyn Console>,
    globals: &Variables,
    out: &mut W,
) -> Result<TaskOutcome> {
    let scope = Scope::new(globals, &task.vars);
    let mut outcome = TaskOutcome::default();

    for (i, command) in task.commands.iter().enumerate() {
        let console = console.as_deref_mut().ok_or_else(|| {
            Error::Internal(format!("task '{}' has commands but no console", task.name))
        })?;

        match run_command(task, command, console, &scope, out).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(task = %task.name, command = i, "Command failed: {}", e);
                outcome.code = e.exit_code();
                if task.fail_fast {
                    outcome.abort = true;
                    break;
                }
            }
        }
    }

    if !task.sleep_after.is_zero() {
        tracing::debug!(task = %task.name, "Sleeping {:?}", task.sleep_after);
        tokio::time::sleep(task.sleep_after).await;
    }

    Ok(outcome)
}

async fn run_command<W: Write>(
    task: &Task,
    command: &Command,
    console: &mut dyn Console,
    scope: &Scope<'_>,
    out: &mut W,
) -> Result<()> {
    let settings = Settings::resolve(task, command);

    // Bind everything before anything reaches the console
    let text = select_text(command, console.last_match())?
        .map(|t| scope.bind(t))
        .transpose()?;
    let mut patterns = command
        .expect
        .iter()
        .map(|p| scope.bind(p))
        .collect::<Result<Vec<_>>>()?;

    if let Some(text) = &text {
        console.send(text).await?;
    }

    if patterns.is_empty() {
        patterns.extend(console.prompt().map(str::to_string));
    }
    if !patterns.is_empty() {
        let matched = console.await_any(&patterns, settings.timeout).await?;
        if settings.echo {
            let transcript: String = matched.captured.chars().filter(|&c| c != '\r').collect();
            out.write_all(transcript.as_bytes())?;
            out.flush()?;
        }
    }

    if settings.check_exit_code && text.is_some() {
        let code = console.probe_exit_code(settings.timeout).await?;
        match (settings.should_fail, code) {
            (false, 0) => {}
            (false, code) => return Err(Error::NonZeroExit(code)),
            (true, 0) => return Err(Error::NonZeroExit(1)),
            (true, _) => {}
        }
    }

    Ok(())
}

/// The line to send: the only one, or the alternative at the index of the
/// pattern the console matched last
fn select_text(command: &Command, last_match: usize) -> Result<Option<&str>> {
    match command.text.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(only.as_str())),
        alternatives => alternatives
            .get(last_match)
            .map(|text| Some(text.as_str()))
            .ok_or(Error::NoAlternative {
                matched: last_match,
                count: alternatives.len(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::mock::{Reply, ScriptedFactory};
    use crate::console::ConsoleFactory;
    use crate::task::ConsoleId;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use tokio::time::Instant;

    fn globals() -> Variables {
        let now = chrono::Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        Variables::builtin("hifive", now)
    }

    async fn run(
        factory: &mut ScriptedFactory,
        task: &Task,
    ) -> (Result<TaskOutcome>, String) {
        let mut console = factory.open(ConsoleId::Target).await.unwrap();
        let console: &mut dyn Console = console.as_mut();
        let mut out = Vec::new();
        let result = run_task(task, Some(console), &globals(), &mut out).await;
        (result, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn test_commands_run_in_order() {
        let mut factory = ScriptedFactory::new();
        let task = Task::new("t").on(ConsoleId::Target).commands(["a", "b", "c"]);

        let (result, _) = run(&mut factory, &task).await;
        assert_eq!(result.unwrap(), TaskOutcome::default());
        assert_eq!(factory.sent_lines(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_at_first_failure() {
        let mut factory = ScriptedFactory::new();
        factory.on("b", Reply::exit(3));
        let task = Task::new("t").on(ConsoleId::Target).commands(["a", "b", "c"]);

        let (result, _) = run(&mut factory, &task).await;
        assert_eq!(result.unwrap(), TaskOutcome { code: 3, abort: true });
        assert_eq!(factory.sent_lines(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_without_fail_fast_keeps_last_code() {
        let mut factory = ScriptedFactory::new();
        factory.on("a", Reply::exit(2)).on("c", Reply::exit(5));
        let mut task = Task::new("t").on(ConsoleId::Target).commands(["a", "b", "c", "d"]);
        task.fail_fast = false;

        let (result, _) = run(&mut factory, &task).await;
        assert_eq!(result.unwrap(), TaskOutcome { code: 5, abort: false });
        assert_eq!(factory.sent_lines(), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_variables_bound_in_text_and_expect() {
        let mut factory = ScriptedFactory::new();
        factory.on("boot hifive", Reply::output("hifive ready\n"));
        let mut task = Task::new("t").on(ConsoleId::Target);
        task.vars = HashMap::from([("STAMP".to_string(), "at ${{NOW}}".to_string())]);
        task.commands = vec![
            Command::line("boot ${{BOARD}}").expecting("${{BOARD}} ready"),
            Command::line("date -s \"${{NOW}}\""),
            Command::line("echo ${{STAMP}}"),
        ];

        let (result, _) = run(&mut factory, &task).await;
        assert!(result.unwrap().passed());
        assert_eq!(
            factory.sent_lines(),
            vec![
                "boot hifive",
                "date -s \"2024-01-02 03:04:05\"",
                "echo at 2024-01-02 03:04:05",
            ]
        );
    }

    #[tokio::test]
    async fn test_undefined_variable_fails_only_its_command() {
        let mut factory = ScriptedFactory::new();
        let mut task = Task::new("t")
            .on(ConsoleId::Target)
            .commands(["a", "echo ${{MISSING}}", "c"]);
        task.fail_fast = false;

        let (result, _) = run(&mut factory, &task).await;
        assert_eq!(result.unwrap().code, crate::common::error::UNDEFINED_VARIABLE_EXIT_CODE);
        assert_eq!(factory.sent_lines(), vec!["a", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expect_times_out_after_deadline() {
        let mut factory = ScriptedFactory::new();
        let task = Task::new("boot").on(ConsoleId::Target).commands([
            Command::wait_for("login:").with_timeout(Duration::from_secs(2))
        ]);

        let started = Instant::now();
        let (result, _) = run(&mut factory, &task).await;
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(
            result.unwrap(),
            TaskOutcome {
                code: crate::common::error::TIMEOUT_EXIT_CODE,
                abort: true
            }
        );
    }

    #[tokio::test]
    async fn test_expect_matches_banner() {
        let mut factory = ScriptedFactory::new();
        factory.banner(ConsoleId::Target, "Welcome\nbuildroot login: ");
        let mut task = Task::new("boot")
            .on(ConsoleId::Target)
            .commands([Command::wait_for("login:")]);
        task.echo = true;

        let (result, out) = run(&mut factory, &task).await;
        assert!(result.unwrap().passed());
        assert_eq!(out, "Welcome\nbuildroot login:");
        assert!(factory.sent().is_empty());
    }

    #[tokio::test]
    async fn test_command_settings_override_task_defaults() {
        let mut factory = ScriptedFactory::new();
        factory
            .on("quiet", Reply::output("one\r\n$ ").with_exit(4))
            .on("loud", Reply::output("two\r\n$ "));

        let mut task = Task::new("t").on(ConsoleId::Target);
        task.echo = false;
        task.check_exit_code = true;
        task.commands = vec![
            Command {
                check_exit_code: Some(false),
                ..Command::line("quiet").expecting("$ ")
            },
            Command {
                echo: Some(true),
                ..Command::line("loud").expecting("$ ")
            },
        ];

        let (result, out) = run(&mut factory, &task).await;
        assert!(result.unwrap().passed());
        assert_eq!(out, "two\n$ ");
        assert_eq!(
            factory.sent().iter().filter(|s| s.line.contains("RESULT")).count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_timeout_overrides_task_timeout() {
        let mut factory = ScriptedFactory::new();
        let mut task = Task::new("t")
            .on(ConsoleId::Target)
            .commands([Command::wait_for("never").with_timeout(Duration::from_secs(1))]);
        task.timeout = Some(Duration::from_secs(30));

        let started = Instant::now();
        let (result, _) = run(&mut factory, &task).await;
        assert_eq!(result.unwrap().code, 124);
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_should_fail_inverts_probe() {
        let mut factory = ScriptedFactory::new();
        factory.on("false", Reply::exit(1));
        let mut task = Task::new("t").on(ConsoleId::Target).commands(["false", "true"]);
        task.should_fail = true;
        task.fail_fast = false;

        let (result, _) = run(&mut factory, &task).await;
        assert_eq!(result.unwrap(), TaskOutcome { code: 1, abort: false });
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_is_a_failure() {
        let mut factory = ScriptedFactory::new();
        factory.on("hang", Reply::default().silent_probe());
        let mut task = Task::new("t").on(ConsoleId::Target).commands(["hang"]);
        task.timeout = Some(Duration::from_secs(2));

        let (result, _) = run(&mut factory, &task).await;
        assert_eq!(result.unwrap().code, 124);
    }

    #[tokio::test]
    async fn test_terminated_console_is_fatal() {
        let mut factory = ScriptedFactory::new();
        factory.on("reboot", Reply::default().terminate());
        let mut task = Task::new("t")
            .on(ConsoleId::Target)
            .commands(["reboot", "ls"]);
        task.fail_fast = false;

        let (result, _) = run(&mut factory, &task).await;
        assert!(matches!(result, Err(Error::ShellTerminated(_))));
        assert_eq!(factory.sent_lines(), vec!["reboot"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_after() {
        let mut factory = ScriptedFactory::new();
        let mut task = Task::new("t").on(ConsoleId::Target).commands(["a"]);
        task.sleep_after = Duration::from_secs(5);

        let started = Instant::now();
        let (result, _) = run(&mut factory, &task).await;
        assert!(result.unwrap().passed());
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_alternative_follows_last_matched_pattern() {
        let mut factory = ScriptedFactory::new();
        factory
            .banner(ConsoleId::Target, "Welcome\nbuildroot login: ")
            .on("root", Reply::output("# "));
        let task = Task::new("login").on(ConsoleId::Target).commands([
            Command::wait_for_any(["# ", "login:"]),
            Command {
                check_exit_code: Some(false),
                ..Command::choice(["true", "root"]).expecting("# ")
            },
        ]);

        let (result, _) = run(&mut factory, &task).await;
        assert!(result.unwrap().passed());
        assert_eq!(factory.sent_lines(), vec!["root"]);
    }

    #[tokio::test]
    async fn test_alternative_for_existing_shell() {
        let mut factory = ScriptedFactory::new();
        factory
            .banner(ConsoleId::Target, "# ")
            .on("true", Reply::output("# "));
        let task = Task::new("login").on(ConsoleId::Target).commands([
            Command::wait_for_any(["# ", "login:"]),
            Command::choice(["true", "root"]).expecting("# "),
        ]);

        let (result, _) = run(&mut factory, &task).await;
        assert!(result.unwrap().passed());
        assert_eq!(factory.sent_lines(), vec!["true"]);
    }

    #[tokio::test]
    async fn test_missing_alternative_fails_command() {
        let mut factory = ScriptedFactory::new();
        factory.banner(ConsoleId::Target, "Password: ");
        let mut task = Task::new("login").on(ConsoleId::Target).commands([
            Command::wait_for_any(["# ", "login:", "Password:"]),
            Command::choice(["true", "root"]),
        ]);
        task.fail_fast = false;

        let (result, _) = run(&mut factory, &task).await;
        assert_eq!(result.unwrap().code, 1);
        assert!(factory.sent_lines().is_empty());
    }

    #[tokio::test]
    async fn test_console_without_probe_never_fails_on_exit_code() {
        let mut factory = ScriptedFactory::new();
        factory
            .without_probe(ConsoleId::Target)
            .on("quit", Reply::exit(9));
        let task = Task::new("t").on(ConsoleId::Target).commands(["quit"]);

        let (result, _) = run(&mut factory, &task).await;
        assert!(result.unwrap().passed());
        assert_eq!(factory.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_task_without_commands_needs_no_console() {
        let task = Task::new("marker");
        let mut out = Vec::new();
        let outcome = run_task(&task, None, &globals(), &mut out).await.unwrap();
        assert!(outcome.passed());
    }
}
