//! Platform configuration, data and log locations
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/autotest/`, `~/.local/share/autotest/`
//! - macOS: `~/Library/Application Support/autotest/`
//! - Windows: `%APPDATA%\autotest\`

use std::io;
use std::path::PathBuf;

/// Application name used for every per-user directory
const APP_NAME: &str = "autotest";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("logs"))
}

/// Default directory for JSON run reports
pub fn report_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("reports"))
}

/// Ensure a directory exists, creating parents as needed
pub fn ensure_dir(dir: &PathBuf) -> io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}
