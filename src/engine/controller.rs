//! Run controller and its orchestrator task
//!
//! [`RunController`] is a cheap handle. The actual run lives in a single
//! spawned task that owns the counters, the sequencer and the in-flight step,
//! and reacts to three kinds of input:
//!
//! - control requests from the handle (`start`, `stop`)
//! - tool completions delivered by the invocation task
//! - retry backoff and post-success delay timers
//!
//! Completions and timers carry a ticket; anything whose ticket no longer
//! matches the current in-flight process or pending timer is discarded, which
//! is how cancellation stays race free.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::plan::TestPlan;

use super::invoker::{ExitKind, ProcessExecutor, ProcessOutput};
use super::observer::{RunObserver, StepPhase};
use super::report::{ItemResult, ReportSink};
use super::retry::{RetryDecision, RetryPolicy, StepAttempt};
use super::sequencer::{Sequencer, SkipPolicy};
use super::substitute::substitute;
use super::validator::validate;
use super::RunContext;

/// Tunables for one controller
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub retry: RetryPolicy,
    pub skip: SkipPolicy,
    /// How long a killed tool gets to exit
    pub kill_grace: Duration,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config.retry),
            skip: SkipPolicy::from_config(&config.skip),
            kill_grace: config.timeouts.kill_grace(),
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Counts a finished run ends with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub pass_count: usize,
    pub fail_count: usize,
    /// Finished steps, skipped ones included
    pub completed_count: usize,
    pub skipped_count: usize,
    pub total_selected: usize,
    pub overall_success: bool,
    /// Ended by `stop()` rather than by itself
    pub stopped: bool,
}

/// Lifecycle of a run; only ever moves forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Stopping,
    Completed(RunSummary),
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Completed(_) => write!(f, "completed"),
        }
    }
}

enum Control {
    Start {
        context: RunContext,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<RunSummary>,
    },
}

enum Event {
    ProcessFinished { ticket: u64, output: ProcessOutput },
    TimerFired { ticket: u64 },
}

/// Handle to one orchestrator task
///
/// One controller runs one plan once. Dropping the handle stops a run that
/// is still going.
pub struct RunController {
    control: mpsc::Sender<Control>,
    state: watch::Receiver<RunState>,
}

impl RunController {
    /// Spawn the orchestrator task; must be called inside a tokio runtime
    pub fn new(
        plan: Arc<TestPlan>,
        executor: Arc<dyn ProcessExecutor>,
        observer: Box<dyn RunObserver>,
        sink: Box<dyn ReportSink>,
        options: RunOptions,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(RunState::Idle);

        let orchestrator = Orchestrator {
            plan,
            executor,
            observer,
            sink,
            options,
            state: state_tx,
            events: events_tx,
            run: None,
            summary: None,
        };
        tokio::spawn(orchestrator.run(control_rx, events_rx));

        Self {
            control: control_tx,
            state: state_rx,
        }
    }

    /// Begin executing the plan
    ///
    /// Fails with [`Error::InvalidState`] unless the controller is idle, and
    /// with [`Error::PlanConfiguration`] when nothing would run.
    pub async fn start(&self, context: RunContext) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(Control::Start { context, reply })
            .await
            .map_err(|_| Error::ControllerGone)?;
        rx.await.map_err(|_| Error::ControllerGone)?
    }

    /// Stop the run and return its final counts
    ///
    /// Always finalizes: kills an in-flight tool, cancels pending timers and
    /// reports the counts as they stand. Calling it again returns the same
    /// summary.
    pub async fn stop(&self) -> Result<RunSummary> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(Control::Stop { reply })
            .await
            .map_err(|_| Error::ControllerGone)?;
        rx.await.map_err(|_| Error::ControllerGone)
    }

    /// Current run state
    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    /// Wait for the run to reach `Completed`
    pub async fn wait(&self) -> Result<RunSummary> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|state| matches!(state, RunState::Completed(_)))
            .await
            .map_err(|_| Error::ControllerGone)?;
        match &*state {
            RunState::Completed(summary) => Ok(*summary),
            other => Err(Error::Internal(format!("unexpected run state {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    pass: usize,
    fail: usize,
    completed: usize,
    skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    /// Relaunch the current step
    Retry,
    /// Move on to the next step
    Advance,
}

struct PendingTimer {
    ticket: u64,
    kind: TimerKind,
    handle: JoinHandle<()>,
}

struct InFlight {
    ticket: u64,
    kill: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

enum FinishReason {
    Exhausted,
    StepFailed(String),
    Stopped,
}

struct ActiveRun {
    context: RunContext,
    sequencer: Sequencer,
    counters: Counters,
    attempt: Option<StepAttempt>,
    in_flight: Option<InFlight>,
    timer: Option<PendingTimer>,
    next_ticket: u64,
}

impl ActiveRun {
    fn ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }
}

struct Orchestrator {
    plan: Arc<TestPlan>,
    executor: Arc<dyn ProcessExecutor>,
    observer: Box<dyn RunObserver>,
    sink: Box<dyn ReportSink>,
    options: RunOptions,
    state: watch::Sender<RunState>,
    events: mpsc::UnboundedSender<Event>,
    run: Option<ActiveRun>,
    summary: Option<RunSummary>,
}

impl Orchestrator {
    async fn run(
        mut self,
        mut control_rx: mpsc::Receiver<Control>,
        mut events_rx: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            tokio::select! {
                biased;

                command = control_rx.recv() => match command {
                    Some(command) => self.handle_control(command).await,
                    None => {
                        if self.run.is_some() {
                            tracing::info!("Controller dropped, stopping run");
                            self.stop().await;
                        }
                        break;
                    }
                },
                Some(event) = events_rx.recv() => self.handle_event(event).await,
            }
        }
        tracing::debug!("Orchestrator exiting");
    }

    fn current_state(&self) -> RunState {
        self.state.borrow().clone()
    }

    async fn handle_control(&mut self, command: Control) {
        match command {
            Control::Start { context, reply } => {
                let result = self.start(context).await;
                let _ = reply.send(result);
            }
            Control::Stop { reply } => {
                let summary = self.stop().await;
                let _ = reply.send(summary);
            }
        }
    }

    async fn start(&mut self, context: RunContext) -> Result<()> {
        let state = self.current_state();
        if state != RunState::Idle {
            return Err(Error::invalid_state("start", &state.to_string()));
        }
        if self.plan.steps.is_empty() {
            return Err(Error::plan("test plan has no steps"));
        }

        let sequencer = Sequencer::new(self.plan.clone(), context.selected_indices.as_ref());
        if sequencer.total_selected() == 0 {
            return Err(Error::plan("no steps selected"));
        }

        tracing::info!(
            plan = %self.plan.name,
            mode = %context.mode,
            total = sequencer.total_selected(),
            "Starting run"
        );

        self.run = Some(ActiveRun {
            context,
            sequencer,
            counters: Counters::default(),
            attempt: None,
            in_flight: None,
            timer: None,
            next_ticket: 0,
        });
        self.state.send_replace(RunState::Running);
        self.advance().await;
        Ok(())
    }

    async fn stop(&mut self) -> RunSummary {
        if let Some(summary) = self.summary {
            return summary;
        }

        if self.run.is_none() {
            // Never started: close out an empty report
            tracing::info!("Stop requested before the run started");
            let summary = RunSummary {
                stopped: true,
                ..RunSummary::default()
            };
            self.sink.end_run(false, 0, 0, 0);
            self.observer.on_message("Run stopped", "No steps were executed");
            self.observer.on_run_finished(false);
            self.summary = Some(summary);
            self.state.send_replace(RunState::Completed(summary));
            return summary;
        }

        tracing::info!("Stop requested");
        self.state.send_replace(RunState::Stopping);
        self.finalize(FinishReason::Stopped).await
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::ProcessFinished { ticket, output } => self.on_process_finished(ticket, output).await,
            Event::TimerFired { ticket } => self.on_timer(ticket).await,
        }
    }

    /// Take steps off the run list until one launches or the list is empty
    async fn advance(&mut self) {
        loop {
            let Some(run) = self.run.as_mut() else {
                return;
            };
            let Some(next) = run.sequencer.next_step() else {
                self.finalize(FinishReason::Exhausted).await;
                return;
            };

            // Skip is decided right before launch, against the run's mode
            if self.options.skip.should_skip(&next.step.title, run.context.mode) {
                tracing::info!(step = next.original_index, title = %next.step.title, "Skipping step");
                run.counters.completed += 1;
                run.counters.skipped += 1;
                self.observer
                    .on_step_skipped(next.original_index, &next.step.title);
                self.observer
                    .on_run_progress(run.counters.completed, run.sequencer.total_selected());
                continue;
            }

            run.attempt = Some(StepAttempt::new(next));
            self.launch_attempt();
            return;
        }
    }

    /// Launch the current step's tool, first attempt or retry
    fn launch_attempt(&mut self) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        let ticket = run.ticket();
        let Some(attempt) = run.attempt.as_mut() else {
            return;
        };

        let index = attempt.original_index();
        let retry = attempt.retry_count();
        self.observer
            .on_step_progress(index, StepPhase::Prepare, StepPhase::TOTAL);

        let command_line = substitute(
            &attempt.sequenced.step.invocation_template,
            &run.context.bindings,
        );
        self.observer.on_step_started(index, attempt.title(), retry);
        self.observer
            .on_step_progress(index, StepPhase::Start, StepPhase::TOTAL);

        attempt.begin_attempt();
        tracing::debug!(
            step = index,
            position = attempt.sequenced.position,
            retry,
            command = %command_line,
            "Invoking tool"
        );

        let (kill_tx, kill_rx) = oneshot::channel();
        let executor = self.executor.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let output = executor.execute(&command_line, kill_rx).await;
            let _ = events.send(Event::ProcessFinished { ticket, output });
        });

        run.in_flight = Some(InFlight {
            ticket,
            kill: kill_tx,
            handle,
        });
        self.observer
            .on_step_progress(index, StepPhase::Running, StepPhase::TOTAL);
    }

    async fn on_process_finished(&mut self, ticket: u64, output: ProcessOutput) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if run.in_flight.as_ref().map(|f| f.ticket) != Some(ticket) {
            tracing::debug!(ticket, "Discarding stale tool completion");
            return;
        }
        run.in_flight = None;
        let Some(attempt) = run.attempt.as_mut() else {
            return;
        };

        let index = attempt.original_index();
        attempt.begin_validation();
        self.observer
            .on_step_progress(index, StepPhase::Validate, StepPhase::TOTAL);

        let step = attempt.sequenced.step.clone();
        let program = step
            .invocation_template
            .split_whitespace()
            .next()
            .unwrap_or_default();
        tracing::debug!(
            step = index,
            exit_code = ?output.exit_code,
            raw = %output.raw_value(),
            "Tool finished"
        );

        let failure = match output.failure(program) {
            Some(error) => Some(error),
            None if validate(output.raw_value(), step.valid_min, step.valid_max) => None,
            None => Some(Error::ValidationFailure {
                value: output.raw_value().to_string(),
            }),
        };

        let Some(error) = failure else {
            let value = output.raw_value().to_string();
            attempt.pass();
            let result = ItemResult::for_step(&step, &value, true);
            let delay = delay_after(step.delay_seconds);
            tracing::info!(step = index, title = %step.title, value = %value, "Step passed");

            run.attempt = None;
            run.counters.pass += 1;
            run.counters.completed += 1;
            let counters = run.counters;
            let total = run.sequencer.total_selected();

            self.record(index, result, counters, total);
            self.schedule(TimerKind::Advance, delay);
            return;
        };

        // What the tool printed if it ran to completion, else what went wrong
        let value = if output.exit_kind == ExitKind::Normal {
            output.raw_value().to_string()
        } else {
            error.to_string()
        };

        match attempt.fail(&self.options.retry, error.is_retryable()) {
            RetryDecision::Retry { retry, after } => {
                tracing::warn!(
                    step = index,
                    title = %step.title,
                    retry,
                    limit = self.options.retry.limit,
                    "Step failed, retrying: {}",
                    error
                );
                let body = if step.retry_message.trim().is_empty() {
                    error.to_string()
                } else {
                    step.retry_message.clone()
                };
                let title = format!(
                    "Retry {}/{}: {}",
                    retry, self.options.retry.limit, step.title
                );
                self.observer.on_message(&title, &body);
                self.schedule(TimerKind::Retry, after);
            }
            RetryDecision::Exhausted => {
                tracing::error!(step = index, title = %step.title, "Step failed: {}", error);
                let result = ItemResult::for_step(&step, &value, false);
                let title = step.title.clone();

                run.attempt = None;
                run.counters.fail += 1;
                run.counters.completed += 1;
                let counters = run.counters;
                let total = run.sequencer.total_selected();

                self.record(index, result, counters, total);
                self.finalize(FinishReason::StepFailed(title)).await;
            }
        }
    }

    /// Hand a final verdict to the sink and the observer
    fn record(&mut self, index: usize, result: ItemResult, counters: Counters, total: usize) {
        self.observer
            .on_step_progress(index, StepPhase::Save, StepPhase::TOTAL);
        self.observer
            .on_step_result(index, &result.value, result.passed);
        self.sink.add_result(result);
        self.observer.on_counts_changed(counters.pass, counters.fail);
        self.observer.on_run_progress(counters.completed, total);
        self.observer
            .on_step_progress(index, StepPhase::Finish, StepPhase::TOTAL);
    }

    fn schedule(&mut self, kind: TimerKind, after: Duration) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        let ticket = run.ticket();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(Event::TimerFired { ticket });
        });
        if let Some(previous) = run.timer.replace(PendingTimer {
            ticket,
            kind,
            handle,
        }) {
            previous.handle.abort();
        }
    }

    async fn on_timer(&mut self, ticket: u64) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if run.timer.as_ref().map(|t| t.ticket) != Some(ticket) {
            tracing::debug!(ticket, "Discarding stale timer");
            return;
        }
        let Some(timer) = run.timer.take() else {
            return;
        };
        match timer.kind {
            TimerKind::Retry => self.launch_attempt(),
            TimerKind::Advance => self.advance().await,
        }
    }

    /// Tear the run down and publish the summary; runs once per controller
    async fn finalize(&mut self, reason: FinishReason) -> RunSummary {
        let Some(mut run) = self.run.take() else {
            return self.summary.unwrap_or_default();
        };

        if let Some(timer) = run.timer.take() {
            timer.handle.abort();
        }
        if let Some(in_flight) = run.in_flight.take() {
            kill(in_flight, self.options.kill_grace * 2).await;
        }
        let drained = run.sequencer.drain();
        if drained > 0 {
            tracing::debug!(drained, "Dropped unexecuted steps");
        }

        let counters = run.counters;
        let total = run.sequencer.total_selected();
        let stopped = matches!(reason, FinishReason::Stopped);
        let overall_success = counters.completed == total && counters.fail == 0;

        let summary = RunSummary {
            pass_count: counters.pass,
            fail_count: counters.fail,
            completed_count: counters.completed,
            skipped_count: counters.skipped,
            total_selected: total,
            overall_success,
            stopped,
        };

        self.sink
            .end_run(overall_success, total, counters.pass, counters.fail);

        let title = match &reason {
            FinishReason::Exhausted if overall_success => "Test passed".to_string(),
            FinishReason::Exhausted => "Test finished".to_string(),
            FinishReason::StepFailed(step) => format!("Test failed at '{step}'"),
            FinishReason::Stopped => "Test stopped".to_string(),
        };
        let body = format!(
            "Total: {}, Pass: {}, Fail: {}",
            total, counters.pass, counters.fail
        );
        tracing::info!(
            overall_success,
            total,
            pass = counters.pass,
            fail = counters.fail,
            "{}",
            title
        );
        self.observer.on_message(&title, &body);
        self.observer.on_run_finished(overall_success);

        self.summary = Some(summary);
        self.state.send_replace(RunState::Completed(summary));
        summary
    }

}

/// Kill the in-flight tool and wait at most `bound` for its task
async fn kill(in_flight: InFlight, bound: Duration) {
    let _ = in_flight.kill.send(());
    let abort = in_flight.handle.abort_handle();
    if tokio::time::timeout(bound, in_flight.handle).await.is_err() {
        tracing::warn!(
            "Tool task did not finish within {} ms of kill, abandoning it",
            bound.as_millis()
        );
        abort.abort();
    }
}

fn delay_after(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::ZERO)
}
