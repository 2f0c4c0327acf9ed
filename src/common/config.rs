//! Configuration file handling

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Measurement tool settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Mode-based step skipping keywords
    #[serde(default)]
    pub skip: SkipConfig,

    /// Report output settings
    #[serde(default)]
    pub report: ReportConfig,
}

/// Where measurement tools are resolved from
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// Directory the first token of every step command is resolved against
    #[serde(default = "default_tools_root")]
    pub root: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            root: default_tools_root(),
        }
    }
}

fn default_tools_root() -> PathBuf {
    PathBuf::from("tools")
}

/// Per-step retry settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt
    #[serde(default = "default_retry_limit")]
    pub limit: u32,

    /// Pause before a retry attempt, in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            limit: default_retry_limit(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_retry_limit() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    1000
}

/// Timeout settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Timeouts {
    /// Longest a single tool invocation may run before it is killed
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,

    /// How long to wait for a killed tool to exit, in milliseconds
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            step_secs: default_step_secs(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

fn default_step_secs() -> u64 {
    120
}
fn default_kill_grace_ms() -> u64 {
    500
}

/// Title keywords that cause a step to be skipped in a given mode
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SkipConfig {
    /// Steps containing this keyword are skipped in TX mode
    #[serde(default = "default_tx_keyword")]
    pub tx_keyword: String,

    /// Steps containing this keyword are skipped in RX mode
    #[serde(default = "default_rx_keyword")]
    pub rx_keyword: String,
}

impl Default for SkipConfig {
    fn default() -> Self {
        Self {
            tx_keyword: default_tx_keyword(),
            rx_keyword: default_rx_keyword(),
        }
    }
}

fn default_tx_keyword() -> String {
    "TESTING_RX".to_string()
}
fn default_rx_keyword() -> String {
    "TESTING_TX".to_string()
}

/// Report output settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ReportConfig {
    /// Directory JSON reports are written to when `--report` names no file
    pub directory: Option<PathBuf>,
}

impl Timeouts {
    pub fn step(&self) -> Duration {
        Duration::from_secs(self.step_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| super::Error::Config(e.to_string()))
    }
}
