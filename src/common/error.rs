//! Error types for the test station
//!
//! Process and validation failures are ordinary variants here so the retry
//! controller can classify them with [`Error::is_retryable`] instead of
//! matching on strings.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the test station
#[derive(Error, Debug)]
pub enum Error {
    // === Plan Errors ===
    #[error("Invalid test plan: {0}")]
    PlanConfiguration(String),

    #[error("Invalid range '{value}' for step '{step}': expected \"min,max\"")]
    InvalidRange { step: String, value: String },

    // === Process Errors ===
    #[error("Failed to start '{program}': {reason}")]
    ProcessStart { program: String, reason: String },

    #[error("Process terminated abnormally: {0}")]
    ProcessCrash(String),

    #[error("Process exited with code {code}: {stderr}")]
    ProcessNonZeroExit { code: i32, stderr: String },

    #[error("Validation failed (value: '{value}')")]
    ValidationFailure { value: String },

    // === Run Errors ===
    #[error("Cannot {action} while run is {state}")]
    InvalidState { action: String, state: String },

    #[error("Run controller is no longer available")]
    ControllerGone,

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a plan configuration error
    pub fn plan<S: Into<String>>(message: S) -> Self {
        Self::PlanConfiguration(message.into())
    }

    /// Create a process start error
    pub fn process_start(program: &str, reason: &str) -> Self {
        Self::ProcessStart {
            program: program.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: &str) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Whether a step that failed with this error may be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProcessStart { .. }
                | Self::ProcessCrash(_)
                | Self::ProcessNonZeroExit { .. }
                | Self::ValidationFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failures_are_retryable() {
        assert!(Error::process_start("tool", "not found").is_retryable());
        assert!(Error::ProcessCrash("signal 9".into()).is_retryable());
        assert!(Error::ProcessNonZeroExit { code: 3, stderr: String::new() }.is_retryable());
        assert!(Error::ValidationFailure { value: "abc".into() }.is_retryable());
    }

    #[test]
    fn test_plan_and_state_errors_are_fatal() {
        assert!(!Error::plan("missing Items").is_retryable());
        assert!(!Error::invalid_state("start", "running").is_retryable());
        assert!(!Error::ControllerGone.is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::ProcessNonZeroExit {
            code: 2,
            stderr: "no device".into(),
        };
        assert_eq!(err.to_string(), "Process exited with code 2: no device");

        let err = Error::invalid_state("start", "completed");
        assert_eq!(err.to_string(), "Cannot start while run is completed");
    }
}
