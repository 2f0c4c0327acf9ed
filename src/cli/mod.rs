//! CLI command handling
//!
//! Loads plans and configuration, drives a run and formats its progress.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::{config::Config, logging, paths, Error, Result};
use crate::engine::{
    EventObserver, ProcessExecutor, ReportRecord, RunContext, RunController, RunEvent,
    RunObserver, RunOptions, RunSummary, SharedReport, StepPhase, ToolExecutor,
};
use crate::plan::{self, TestPlan};

/// Dispatch a CLI command
///
/// Returns whether the command succeeded; a test run that did not pass is
/// reported as `Ok(false)`.
pub async fn dispatch(command: Commands, config_path: Option<PathBuf>) -> Result<bool> {
    match command {
        Commands::Run {
            plan,
            mac,
            sn,
            bindings,
            mode,
            select,
            tools_dir,
            retry_limit,
            report,
            json,
            verbose: _,
        } => {
            let mut config = load_config(config_path.as_deref())?;
            if let Some(dir) = tools_dir {
                config.tools.root = dir;
            }
            if let Some(limit) = retry_limit {
                config.retry.limit = limit;
            }

            let plan = plan::load(&plan)?;

            let mut context = RunContext::new(mode.unwrap_or(plan.mode));
            if let Some(mac) = mac {
                context = context.with_mac(&mac);
            }
            if let Some(sn) = sn {
                context = context.with_sn(&sn);
            }
            for binding in &bindings {
                let (key, value) = parse_binding(binding)?;
                context = context.with_binding(key, value);
            }
            if !select.is_empty() {
                context = context.with_selection(select);
            }

            let executor = Arc::new(ToolExecutor::from_config(&config));
            let summary = run_plan(plan, context, executor, &config, report, json).await?;
            Ok(summary.overall_success)
        }

        Commands::Check { plan, json } => {
            let plan = plan::load(&plan)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_plan(&plan);
            }
            Ok(true)
        }

        Commands::Config { path } => {
            let location = config_path.or_else(paths::config_path);
            if path {
                match &location {
                    Some(p) => println!("{}", p.display()),
                    None => println!("(no configuration directory available)"),
                }
                return Ok(true);
            }

            let config = load_config(location.as_deref())?;
            if let Some(p) = &location {
                let note = if p.exists() { "" } else { " (not present, using defaults)" };
                println!("# {}{}", p.display(), note);
            }
            if let Some(log) = logging::station_log_path() {
                println!("# station log: {}", log.display());
            }
            print!("{}", config.to_toml()?);
            Ok(true)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) if path.exists() => Config::load_from(path),
        Some(_) => Ok(Config::default()),
        None => Config::load(),
    }
}

/// Split a `key=value` binding; the key may carry a leading `$`
fn parse_binding(text: &str) -> Result<(&str, &str)> {
    match text.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value.trim())),
        _ => Err(Error::Config(format!(
            "Invalid binding '{}': expected KEY=VALUE",
            text
        ))),
    }
}

/// Run a loaded plan to completion with console (or JSON) progress
///
/// Ctrl+C stops the run; the report is written either way.
pub async fn run_plan(
    plan: TestPlan,
    context: RunContext,
    executor: Arc<dyn ProcessExecutor>,
    config: &Config,
    report_path: Option<PathBuf>,
    json: bool,
) -> Result<RunSummary> {
    let required = plan.required_bindings();
    let missing = context.missing_bindings(&required);
    if !missing.is_empty() {
        tracing::warn!(?missing, "Plan placeholders without a value");
        if !json {
            println!(
                "{} unbound placeholders: {}",
                "warning:".yellow().bold(),
                missing
                    .iter()
                    .map(|m| format!("${m}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }

    let report = SharedReport::new(ReportRecord::new(&plan, context.mode, &context.bindings));
    let observer: Box<dyn RunObserver> = if json {
        Box::new(EventObserver::new(print_json_event))
    } else {
        Box::new(ConsoleObserver::new(&plan))
    };

    if !json {
        println!(
            "\n{} {} {}",
            "Running Plan:".blue().bold(),
            plan.name.white().bold(),
            format!("[{}]", context.mode).dimmed()
        );
    }

    let plan = Arc::new(plan);
    let controller = RunController::new(
        plan,
        executor,
        observer,
        Box::new(report.clone()),
        RunOptions::from_config(config),
    );
    controller.start(context).await?;

    let summary = tokio::select! {
        summary = controller.wait() => summary?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, stopping run");
            controller.stop().await?
        }
    };

    let record = report.snapshot();
    if let Some(path) = report_destination(report_path, config, &record) {
        record.write_json(&path)?;
        tracing::info!("Report written to {}", path.display());
        if !json {
            println!("  Report: {}", path.display().to_string().dimmed());
        }
    }

    Ok(summary)
}

fn report_destination(
    explicit: Option<PathBuf>,
    config: &Config,
    record: &ReportRecord,
) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }
    let dir = config.report.directory.clone().or_else(paths::report_dir)?;
    if let Err(e) = paths::ensure_dir(&dir) {
        tracing::warn!("Cannot create report directory {}: {}", dir.display(), e);
        return None;
    }
    Some(dir.join(record.default_file_name()))
}

fn print_plan(plan: &TestPlan) {
    println!("{} {}", "Plan:".blue().bold(), plan.name.white().bold());
    if !plan.version.is_empty() {
        println!("  Version: {}", plan.version);
    }
    println!(
        "  Pairing: {}",
        if plan.is_paired() { "paired devices" } else { "single device" }
    );
    println!("  Mode:    {}", plan.mode);
    for product in &plan.products {
        println!(
            "  Product: {} (MAC x{}, SN x{})",
            product.name, product.mac_count, product.sn_count
        );
    }
    let required = plan.required_bindings();
    if !required.is_empty() {
        println!("  Needs:   {}", required.join(", "));
    }

    println!("\n{}", "Steps:".cyan());
    for (index, step) in plan.steps.iter().enumerate() {
        println!("  {:>3}. {}", index, step.title);
        println!("       {}", step.invocation_template.dimmed());
        if step.valid_min.is_some() || step.valid_max.is_some() {
            println!(
                "       valid {}..{} {}",
                step.valid_min.map(|v| v.to_string()).unwrap_or_default(),
                step.valid_max.map(|v| v.to_string()).unwrap_or_default(),
                step.unit
            );
        }
    }
    println!("\n{} {} steps", "✓".green(), plan.steps.len());
}

/// Prints run progress for an operator at a terminal
struct ConsoleObserver {
    titles: Vec<String>,
}

impl ConsoleObserver {
    fn new(plan: &TestPlan) -> Self {
        Self {
            titles: plan.steps.iter().map(|s| s.title.clone()).collect(),
        }
    }

    fn title(&self, index: usize) -> &str {
        self.titles.get(index).map(String::as_str).unwrap_or("?")
    }
}

impl RunObserver for ConsoleObserver {
    fn on_step_progress(&mut self, step_index: usize, phase: StepPhase, _phase_total: u32) {
        tracing::trace!(step = step_index, ?phase, "Step phase");
    }

    fn on_step_started(&mut self, step_index: usize, title: &str, retry: u32) {
        if retry == 0 {
            println!("  {} [{}] {}", "→".blue(), step_index, title);
        } else {
            println!("  {} [{}] {} (retry {})", "↻".yellow(), step_index, title, retry);
        }
    }

    fn on_step_skipped(&mut self, step_index: usize, title: &str) {
        println!("  {} [{}] {}", "-".dimmed(), step_index, title.dimmed());
    }

    fn on_run_progress(&mut self, completed_count: usize, total_selected: usize) {
        tracing::debug!("Progress {}/{}", completed_count, total_selected);
    }

    fn on_step_result(&mut self, step_index: usize, raw_value: &str, passed: bool) {
        let title = self.title(step_index).to_string();
        if passed {
            println!("  {} {}: {}", "✓".green(), title, raw_value);
        } else {
            println!("  {} {}: {}", "✗".red(), title, raw_value.red());
        }
    }

    fn on_message(&mut self, title: &str, body: &str) {
        if title.starts_with("Retry") {
            println!("    {} {}", title.yellow(), body.dimmed());
        } else {
            println!("\n{} {}", title.bold(), body);
        }
    }

    fn on_run_finished(&mut self, overall_success: bool) {
        if overall_success {
            println!("\n{} {}\n", "✓".green().bold(), "PASS".green().bold());
        } else {
            println!("\n{} {}\n", "✗".red().bold(), "FAIL".red().bold());
        }
    }
}

/// Print one run event as a JSON line on stdout
fn print_json_event(event: RunEvent) {
    match serde_json::to_string(&event) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::warn!("Cannot serialize run event: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binding() {
        assert_eq!(parse_binding("mac11=AA:BB").unwrap(), ("mac11", "AA:BB"));
        assert_eq!(parse_binding("$sn = S-1 ").unwrap(), ("$sn", "S-1"));
        assert_eq!(parse_binding("note=a=b").unwrap(), ("note", "a=b"));
        assert!(parse_binding("novalue").is_err());
        assert!(parse_binding("=x").is_err());
    }

    #[test]
    fn test_report_destination_prefers_explicit() {
        let config = Config::default();
        let record = ReportRecord::default();
        let explicit = PathBuf::from("/tmp/out.json");
        assert_eq!(
            report_destination(Some(explicit.clone()), &config, &record),
            Some(explicit)
        );
    }

    #[test]
    fn test_report_destination_uses_configured_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.report.directory = Some(dir.path().join("reports"));
        let record = ReportRecord::default();

        let path = report_destination(None, &config, &record).unwrap();
        assert!(path.starts_with(dir.path().join("reports")));
        assert!(dir.path().join("reports").is_dir());
    }

    #[test]
    fn test_load_config_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("none.toml"))).unwrap();
        assert_eq!(config.retry.limit, 2);
    }
}
