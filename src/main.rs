//! autotest - hardware validation test station
//!
//! Loads a YAML test plan and runs each step's measurement tool against the
//! device under test, retrying, skipping and stopping as configured.

use std::path::PathBuf;

use autotest::common::logging;
use autotest::{cli, commands};
use clap::Parser;
use commands::Commands;

#[derive(Parser)]
#[command(name = "autotest", about = "Automated hardware test station")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: the per-user config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { verbose, .. } => {
            logging::init_station(*verbose);
        }
        _ => logging::init_cli(false),
    }

    match cli::dispatch(cli.command, cli.config).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    }
}
