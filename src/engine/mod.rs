//! Test execution engine
//!
//! Turns a [`TestPlan`](crate::plan::TestPlan) into one observable,
//! cancellable run: the sequencer picks steps, substitution fills in device
//! values, the invoker runs the tool, the validator classifies its output and
//! the controller drives retries, counters and the final report.

pub mod controller;
pub mod invoker;
pub mod observer;
pub mod report;
pub mod retry;
pub mod sequencer;
pub mod substitute;
pub mod validator;

use std::collections::HashSet;

use crate::plan::TestMode;

pub use controller::{RunController, RunOptions, RunState, RunSummary};
pub use invoker::{ExitKind, ProcessExecutor, ProcessOutput, ToolExecutor};
pub use observer::{event_channel, EventObserver, NullObserver, RunEvent, RunObserver, StepPhase};
pub use report::{ItemResult, ReportRecord, ReportSink, SharedReport};
pub use substitute::{substitute, Bindings};
pub use validator::validate;

/// Per-run inputs supplied at `start()`
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Placeholder name (without `$`) to value
    pub bindings: Bindings,
    /// Plan indices to run; `None` runs every step
    pub selected_indices: Option<HashSet<usize>>,
    pub mode: TestMode,
}

impl RunContext {
    pub fn new(mode: TestMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Bind a placeholder; a leading `$` on the key is ignored
    pub fn with_binding(mut self, key: &str, value: &str) -> Self {
        self.bindings
            .insert(substitute::binding_key(key).to_string(), value.to_string());
        self
    }

    pub fn with_mac(self, mac: &str) -> Self {
        self.with_binding("mac", mac)
    }

    pub fn with_sn(self, sn: &str) -> Self {
        self.with_binding("sn", sn)
    }

    pub fn with_selection(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.selected_indices = Some(indices.into_iter().collect());
        self
    }

    /// Names from `required` with no non-empty binding
    pub fn missing_bindings<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .map(String::as_str)
            .filter(|name| self.bindings.get(*name).map_or(true, |v| v.is_empty()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builders() {
        let ctx = RunContext::new(TestMode::Rx)
            .with_mac("AA:BB")
            .with_binding("$sn1", "S-1")
            .with_selection([2, 0]);

        assert_eq!(ctx.mode, TestMode::Rx);
        assert_eq!(ctx.bindings.get("mac").map(String::as_str), Some("AA:BB"));
        assert_eq!(ctx.bindings.get("sn1").map(String::as_str), Some("S-1"));
        assert_eq!(ctx.selected_indices.as_ref().map(|s| s.len()), Some(2));
    }

    #[test]
    fn test_missing_bindings() {
        let ctx = RunContext::default().with_mac("AA").with_sn("");
        let required = vec!["mac".to_string(), "sn".to_string(), "mac11".to_string()];
        assert_eq!(ctx.missing_bindings(&required), vec!["sn", "mac11"]);
    }

    #[test]
    fn test_default_runs_everything_in_both_mode() {
        let ctx = RunContext::default();
        assert_eq!(ctx.mode, TestMode::Both);
        assert!(ctx.selected_indices.is_none());
        assert!(ctx.bindings.is_empty());
    }
}
