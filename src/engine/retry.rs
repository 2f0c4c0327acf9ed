//! Per-step retry state machine
//!
//! Each step on the run list gets a fresh [`StepAttempt`] when it is taken
//! off the queue. The attempt owns the retry counter, so nothing leaks from
//! one step into the next, and it is dropped once the verdict is recorded.

use std::time::Duration;

use crate::common::config::RetryConfig;

use super::sequencer::SequencedStep;

/// Lifecycle of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepExecutionState {
    /// Taken off the queue, nothing launched yet
    Pending,
    /// Tool process in flight
    Running,
    /// Tool finished, output being classified
    Validating,
    /// Waiting to launch retry number `n`
    Retrying(u32),
    Passed,
    Failed,
}

impl std::fmt::Display for StepExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Validating => write!(f, "validating"),
            Self::Retrying(n) => write!(f, "retrying ({n})"),
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Bounded retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub limit: u32,
    /// Pause before each retry
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(limit: u32, backoff: Duration) -> Self {
        Self { limit, backoff }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.limit, config.backoff())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Launch retry number `retry` after `after`
    Retry { retry: u32, after: Duration },
    /// Budget spent; the step has failed
    Exhausted,
}

/// The in-flight step and its retry bookkeeping
#[derive(Debug)]
pub struct StepAttempt {
    pub sequenced: SequencedStep,
    retry_count: u32,
    state: StepExecutionState,
}

impl StepAttempt {
    pub fn new(sequenced: SequencedStep) -> Self {
        Self {
            sequenced,
            retry_count: 0,
            state: StepExecutionState::Pending,
        }
    }

    pub fn state(&self) -> StepExecutionState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn original_index(&self) -> usize {
        self.sequenced.original_index
    }

    pub fn title(&self) -> &str {
        &self.sequenced.step.title
    }

    /// Mark a process launch for the first attempt or a pending retry
    pub fn begin_attempt(&mut self) {
        debug_assert!(matches!(
            self.state,
            StepExecutionState::Pending | StepExecutionState::Retrying(_)
        ));
        self.state = StepExecutionState::Running;
    }

    /// Mark the tool as finished and its output under classification
    pub fn begin_validation(&mut self) {
        debug_assert_eq!(self.state, StepExecutionState::Running);
        self.state = StepExecutionState::Validating;
    }

    /// Record a passing attempt
    pub fn pass(&mut self) {
        self.state = StepExecutionState::Passed;
    }

    /// Record a failed attempt and decide whether another is allowed
    ///
    /// A failure that is not `retryable` ends the step regardless of the
    /// remaining budget.
    pub fn fail(&mut self, policy: &RetryPolicy, retryable: bool) -> RetryDecision {
        if retryable && self.retry_count < policy.limit {
            self.retry_count += 1;
            self.state = StepExecutionState::Retrying(self.retry_count);
            RetryDecision::Retry {
                retry: self.retry_count,
                after: policy.backoff,
            }
        } else {
            self.state = StepExecutionState::Failed;
            RetryDecision::Exhausted
        }
    }
}
