//! CLI command definitions
//!
//! Defines the clap commands for the test station CLI.

use clap::Subcommand;
use std::path::PathBuf;

use crate::plan::TestMode;

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a test plan against the device under test
    Run {
        /// Path to the YAML test plan
        plan: PathBuf,

        /// MAC address of the device (binds $mac)
        #[arg(long)]
        mac: Option<String>,

        /// Serial number of the device (binds $sn)
        #[arg(long)]
        sn: Option<String>,

        /// Extra placeholder binding, e.g. --bind mac11=AA:BB:CC:DD:EE:FF
        /// Can be specified multiple times
        #[arg(long = "bind", short = 'b', value_name = "KEY=VALUE")]
        bindings: Vec<String>,

        /// Run mode (default: the plan's own mode)
        #[arg(long, value_enum)]
        mode: Option<TestMode>,

        /// Only run these step indices (0-based, comma separated)
        #[arg(long, value_delimiter = ',')]
        select: Vec<usize>,

        /// Directory the step tools are resolved against
        #[arg(long)]
        tools_dir: Option<PathBuf>,

        /// Retries allowed per step after the first attempt
        #[arg(long)]
        retry_limit: Option<u32>,

        /// Write the collected report to this JSON file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Emit run events as JSON lines instead of text
        #[arg(long)]
        json: bool,

        /// Verbose output
        #[arg(long, short)]
        verbose: bool,
    },

    /// Load and validate a test plan without running it
    Check {
        /// Path to the YAML test plan
        plan: PathBuf,

        /// Output the parsed plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config {
        /// Print the configuration file path only
        #[arg(long)]
        path: bool,
    },
}
