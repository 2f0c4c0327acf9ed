//! Logging and tracing configuration
//!
//! Console logging for interactive use, and console plus an append-only log
//! file for station runs so a failed shift can be reconstructed later.

use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use super::paths;

/// Initialize tracing for short CLI commands (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is WARN for this crate and its dependencies, DEBUG with `verbose`.
pub fn init_cli(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("autotest=debug,warn")
        } else {
            EnvFilter::new("autotest=warn,warn")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing for a test run (file + stderr logging)
///
/// The run logs to both:
/// 1. A log file at `<data dir>/logs/station.log` with full detail
/// 2. stderr, filtered like [`init_cli`]
///
/// Returns the log file path when file logging could be set up.
pub fn init_station(verbose: bool) -> Option<PathBuf> {
    let console_filter = if verbose { "autotest=debug,warn" } else { "autotest=warn,warn" };

    if let Some(log_dir) = paths::log_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let log_file = log_dir.join("station.log");

            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
            {
                Ok(file) => {
                    let file_filter = EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new("autotest=debug,info"));
                    let file_layer = fmt::layer()
                        .with_writer(file)
                        .with_ansi(false)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true)
                        .with_filter(file_filter);

                    let stderr_layer = fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .compact()
                        .with_filter(EnvFilter::new(console_filter));

                    tracing_subscriber::registry()
                        .with(file_layer)
                        .with(stderr_layer)
                        .init();

                    return Some(log_file);
                }
                Err(e) => {
                    eprintln!("Warning: Could not open log file: {}", e);
                }
            }
        }
    }

    // Fallback: stderr only
    init_cli(verbose);
    None
}

/// Get the path to the station log file
pub fn station_log_path() -> Option<PathBuf> {
    paths::log_dir().map(|d| d.join("station.log"))
}
