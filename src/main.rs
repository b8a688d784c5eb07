//! emurun - run declarative task workflows against an emulated target
//!
//! Tasks drive the host shell, the emulator monitor and the target's serial
//! console in a deterministic, dependency-resolved order.

use clap::Parser;
use emurun::commands::Commands;
use emurun::{cli, common::logging};

#[derive(Parser)]
#[command(name = "emurun", about = "Declarative task runner for emulated targets")]
#[command(version, long_about = None)]
struct Cli {
    /// Log console traffic
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    match cli::dispatch(cli.command).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(e.exit_code().max(1));
        }
    }
}
