//! Progress notifications for whatever front end drives a run
//!
//! The orchestrator calls these hooks from its own task only, in the order
//! things happen. Every hook has a no-op default so a front end implements
//! just what it displays.

use serde::Serialize;
use tokio::sync::mpsc;

/// Phases of one step, reported as ordinals `0..=5`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Prepare = 0,
    Start = 1,
    Running = 2,
    Validate = 3,
    Save = 4,
    Finish = 5,
}

impl StepPhase {
    /// Highest phase ordinal, passed as `phase_total`
    pub const TOTAL: u32 = 5;

    pub fn ordinal(self) -> u32 {
        self as u32
    }
}

/// Receives run progress from the orchestrator
pub trait RunObserver: Send {
    fn on_step_progress(&mut self, _step_index: usize, _phase: StepPhase, _phase_total: u32) {}

    /// A step (or a retry of it) is about to launch; `retry` is 0 on the first attempt
    fn on_step_started(&mut self, _step_index: usize, _title: &str, _retry: u32) {}

    /// A step was passed over because of the run mode
    fn on_step_skipped(&mut self, _step_index: usize, _title: &str) {}

    fn on_run_progress(&mut self, _completed_count: usize, _total_selected: usize) {}

    fn on_step_result(&mut self, _step_index: usize, _raw_value: &str, _passed: bool) {}

    fn on_counts_changed(&mut self, _pass_count: usize, _fail_count: usize) {}

    fn on_message(&mut self, _title: &str, _body: &str) {}

    fn on_run_finished(&mut self, _overall_success: bool) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl RunObserver for NullObserver {}

/// One observer notification as a value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    StepProgress {
        step_index: usize,
        phase: StepPhase,
        phase_total: u32,
    },
    StepStarted {
        step_index: usize,
        title: String,
        retry: u32,
    },
    StepSkipped {
        step_index: usize,
        title: String,
    },
    RunProgress {
        completed_count: usize,
        total_selected: usize,
    },
    StepResult {
        step_index: usize,
        raw_value: String,
        passed: bool,
    },
    CountsChanged {
        pass_count: usize,
        fail_count: usize,
    },
    Message {
        title: String,
        body: String,
    },
    RunFinished {
        overall_success: bool,
    },
}

/// Turns every notification into a [`RunEvent`] and hands it to `emit`
pub struct EventObserver<F> {
    emit: F,
}

impl<F> EventObserver<F>
where
    F: FnMut(RunEvent) + Send,
{
    pub fn new(emit: F) -> Self {
        Self { emit }
    }
}

impl<F> RunObserver for EventObserver<F>
where
    F: FnMut(RunEvent) + Send,
{
    fn on_step_progress(&mut self, step_index: usize, phase: StepPhase, phase_total: u32) {
        (self.emit)(RunEvent::StepProgress {
            step_index,
            phase,
            phase_total,
        });
    }

    fn on_step_started(&mut self, step_index: usize, title: &str, retry: u32) {
        (self.emit)(RunEvent::StepStarted {
            step_index,
            title: title.to_string(),
            retry,
        });
    }

    fn on_step_skipped(&mut self, step_index: usize, title: &str) {
        (self.emit)(RunEvent::StepSkipped {
            step_index,
            title: title.to_string(),
        });
    }

    fn on_run_progress(&mut self, completed_count: usize, total_selected: usize) {
        (self.emit)(RunEvent::RunProgress {
            completed_count,
            total_selected,
        });
    }

    fn on_step_result(&mut self, step_index: usize, raw_value: &str, passed: bool) {
        (self.emit)(RunEvent::StepResult {
            step_index,
            raw_value: raw_value.to_string(),
            passed,
        });
    }

    fn on_counts_changed(&mut self, pass_count: usize, fail_count: usize) {
        (self.emit)(RunEvent::CountsChanged {
            pass_count,
            fail_count,
        });
    }

    fn on_message(&mut self, title: &str, body: &str) {
        (self.emit)(RunEvent::Message {
            title: title.to_string(),
            body: body.to_string(),
        });
    }

    fn on_run_finished(&mut self, overall_success: bool) {
        (self.emit)(RunEvent::RunFinished { overall_success });
    }
}

/// Observer that forwards every notification over a channel
///
/// Events are dropped silently once the receiver is gone.
pub fn event_channel() -> (
    EventObserver<impl FnMut(RunEvent) + Send>,
    mpsc::UnboundedReceiver<RunEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let observer = EventObserver::new(move |event| {
        let _ = tx.send(event);
    });
    (observer, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_ordinals() {
        assert_eq!(StepPhase::Prepare.ordinal(), 0);
        assert_eq!(StepPhase::Validate.ordinal(), 3);
        assert_eq!(StepPhase::Finish.ordinal(), StepPhase::TOTAL);
    }

    #[test]
    fn test_event_channel_forwards_in_order() {
        let (mut observer, mut rx) = event_channel();
        observer.on_counts_changed(1, 0);
        observer.on_message("Retry 1/2", "Check cable");
        observer.on_run_finished(true);

        assert_eq!(
            rx.try_recv().unwrap(),
            RunEvent::CountsChanged { pass_count: 1, fail_count: 0 }
        );
        assert!(matches!(rx.try_recv().unwrap(), RunEvent::Message { .. }));
        assert_eq!(
            rx.try_recv().unwrap(),
            RunEvent::RunFinished { overall_success: true }
        );
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (mut observer, rx) = event_channel();
        drop(rx);
        observer.on_run_finished(false);
    }

    #[test]
    fn test_event_observer_builds_events() {
        let mut seen = Vec::new();
        {
            let mut observer = EventObserver::new(|event| seen.push(event));
            observer.on_step_started(1, "Voltage", 2);
            observer.on_step_skipped(3, "Throughput TESTING_TX");
        }
        assert_eq!(
            seen,
            vec![
                RunEvent::StepStarted { step_index: 1, title: "Voltage".into(), retry: 2 },
                RunEvent::StepSkipped { step_index: 3, title: "Throughput TESTING_TX".into() },
            ]
        );
    }

    #[test]
    fn test_event_json_shape() {
        let event = RunEvent::StepProgress {
            step_index: 2,
            phase: StepPhase::Validate,
            phase_total: StepPhase::TOTAL,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "step_progress");
        assert_eq!(json["phase"], "validate");
        assert_eq!(json["phase_total"], 5);
    }
}
