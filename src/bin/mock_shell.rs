//! Mock shell binary for integration testing
//!
//! A line-oriented stand-in for a remote shell: prints a prompt, runs a tiny
//! command set and answers `echo RESULT:${?}` exit-code probes. Behaviour is
//! tuned through environment variables:
//!
//! - `MOCK_SHELL_PROMPT`: prompt printed before each command (default `# `)
//! - `MOCK_SHELL_BANNER`: text printed once at start-up

use std::io::{BufRead, BufReader, Write};

fn main() {
    let prompt = std::env::var("MOCK_SHELL_PROMPT").unwrap_or_else(|_| "# ".to_string());
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();

    if let Ok(banner) = std::env::var("MOCK_SHELL_BANNER") {
        let _ = writeln!(writer, "{}", banner);
    }
    let _ = write!(writer, "{}", prompt);
    let _ = writer.flush();

    let mut last_code = 0;
    for line in reader.lines() {
        let Ok(line) = line else { break };
        let line = line.trim();

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        last_code = match command {
            "" => last_code,
            "exit" => std::process::exit(rest.trim().parse().unwrap_or(0)),
            "echo" => {
                let _ = writeln!(writer, "{}", rest.replace("${?}", &last_code.to_string()));
                0
            }
            "true" => 0,
            "false" => 1,
            "fail" => rest.trim().parse().unwrap_or(1),
            other => {
                let _ = writeln!(writer, "mock_shell: {}: command not found", other);
                127
            }
        };

        let _ = write!(writer, "{}", prompt);
        let _ = writer.flush();
    }
}
