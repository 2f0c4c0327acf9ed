//! Result collection
//!
//! The orchestrator hands finished steps to a [`ReportSink`]. Rendering and
//! database storage live elsewhere; [`ReportRecord`] is the in-memory record
//! the command line serializes to JSON.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::common::Result;
use crate::plan::{TestMode, TestPlan, TestStep};

/// Final verdict of one step, emitted exactly once
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemResult {
    pub title: String,
    pub unit: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub value: String,
    pub passed: bool,
}

impl ItemResult {
    pub fn for_step(step: &TestStep, value: &str, passed: bool) -> Self {
        Self {
            title: step.title.clone(),
            unit: step.unit.clone(),
            min: step.valid_min,
            max: step.valid_max,
            value: value.to_string(),
            passed,
        }
    }
}

/// Consumer of step results
pub trait ReportSink: Send {
    /// Called once per finished, non-skipped step
    fn add_result(&mut self, result: ItemResult);

    /// Called exactly once when the run completes
    fn end_run(
        &mut self,
        overall_success: bool,
        total_selected: usize,
        pass_count: usize,
        fail_count: usize,
    );
}

/// Counts passed to [`ReportSink::end_run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub overall_success: bool,
    pub total_selected: usize,
    pub pass_count: usize,
    pub fail_count: usize,
}

/// In-memory report of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportRecord {
    pub plan_name: String,
    pub plan_version: String,
    pub mode: Option<TestMode>,
    pub station: String,
    pub bindings: BTreeMap<String, String>,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
    pub results: Vec<ItemResult>,
    pub summary: Option<ReportSummary>,
}

impl ReportRecord {
    pub fn new(plan: &TestPlan, mode: TestMode, bindings: &BTreeMap<String, String>) -> Self {
        Self {
            plan_name: plan.name.clone(),
            plan_version: plan.version.clone(),
            mode: Some(mode),
            station: station_name(),
            bindings: bindings.clone(),
            started_at: Some(Local::now()),
            ..Default::default()
        }
    }

    /// Write the record as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// File name for this record inside a report directory
    pub fn default_file_name(&self) -> String {
        let stamp = self
            .started_at
            .unwrap_or_else(Local::now)
            .format("%Y%m%d_%H%M%S");
        let name: String = self
            .plan_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!("{}_{}.json", if name.is_empty() { "run" } else { &name }, stamp)
    }
}

impl ReportSink for ReportRecord {
    fn add_result(&mut self, result: ItemResult) {
        self.results.push(result);
    }

    fn end_run(
        &mut self,
        overall_success: bool,
        total_selected: usize,
        pass_count: usize,
        fail_count: usize,
    ) {
        self.finished_at = Some(Local::now());
        self.summary = Some(ReportSummary {
            overall_success,
            total_selected,
            pass_count,
            fail_count,
        });
    }
}

/// A [`ReportRecord`] the caller can still read after handing it to a run
#[derive(Debug, Clone, Default)]
pub struct SharedReport(Arc<Mutex<ReportRecord>>);

impl SharedReport {
    pub fn new(record: ReportRecord) -> Self {
        Self(Arc::new(Mutex::new(record)))
    }

    fn lock(&self) -> MutexGuard<'_, ReportRecord> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the record as it stands
    pub fn snapshot(&self) -> ReportRecord {
        self.lock().clone()
    }
}

impl ReportSink for SharedReport {
    fn add_result(&mut self, result: ItemResult) {
        self.lock().add_result(result);
    }

    fn end_run(
        &mut self,
        overall_success: bool,
        total_selected: usize,
        pass_count: usize,
        fail_count: usize,
    ) {
        self.lock()
            .end_run(overall_success, total_selected, pass_count, fail_count);
    }
}

/// Machine name of this station
fn station_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default()
}
