//! Run list construction and mode-based skipping

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::common::config::SkipConfig;
use crate::plan::{TestMode, TestPlan, TestStep};

/// A step taken off the run list
#[derive(Debug, Clone)]
pub struct SequencedStep {
    /// Position in the run list (0-based)
    pub position: usize,
    /// Index of the step in the plan, as shown to the operator
    pub original_index: usize,
    pub step: TestStep,
}

/// Ordered run list for one run, drained one step at a time
#[derive(Debug)]
pub struct Sequencer {
    plan: Arc<TestPlan>,
    queue: VecDeque<(usize, usize)>,
    total_selected: usize,
}

impl Sequencer {
    /// Build the run list from a plan and an optional selection
    ///
    /// Plan order is preserved regardless of the selection's order;
    /// out-of-range indices are dropped.
    pub fn new(plan: Arc<TestPlan>, selected: Option<&HashSet<usize>>) -> Self {
        let queue: VecDeque<(usize, usize)> = (0..plan.steps.len())
            .filter(|index| selected.map_or(true, |set| set.contains(index)))
            .enumerate()
            .collect();

        if let Some(set) = selected {
            let dropped = set.iter().filter(|i| **i >= plan.steps.len()).count();
            if dropped > 0 {
                tracing::debug!(dropped, "Ignoring out-of-range step selections");
            }
        }

        let total_selected = queue.len();
        Self {
            plan,
            queue,
            total_selected,
        }
    }

    /// Number of steps selected when the run started
    pub fn total_selected(&self) -> usize {
        self.total_selected
    }

    /// Take the next step off the run list
    pub fn next_step(&mut self) -> Option<SequencedStep> {
        let (position, original_index) = self.queue.pop_front()?;
        Some(SequencedStep {
            position,
            original_index,
            step: self.plan.steps[original_index].clone(),
        })
    }

    /// Discard every remaining step without running it, returning how many
    pub fn drain(&mut self) -> usize {
        let count = self.queue.len();
        self.queue.clear();
        count
    }
}

/// Title keyword table deciding which steps a run mode skips
#[derive(Debug, Clone)]
pub struct SkipPolicy {
    keywords: HashMap<TestMode, String>,
}

impl SkipPolicy {
    /// Skip `tx_keyword` steps in TX mode and `rx_keyword` steps in RX mode
    ///
    /// An empty keyword never matches. BOTH mode never skips.
    pub fn new(tx_keyword: &str, rx_keyword: &str) -> Self {
        let mut keywords = HashMap::new();
        keywords.insert(TestMode::Tx, tx_keyword.to_string());
        keywords.insert(TestMode::Rx, rx_keyword.to_string());
        Self { keywords }
    }

    pub fn from_config(config: &SkipConfig) -> Self {
        Self::new(&config.tx_keyword, &config.rx_keyword)
    }

    pub fn should_skip(&self, title: &str, mode: TestMode) -> bool {
        match self.keywords.get(&mode) {
            Some(keyword) if !keyword.is_empty() => title.contains(keyword.as_str()),
            _ => false,
        }
    }
}

impl Default for SkipPolicy {
    fn default() -> Self {
        Self::from_config(&SkipConfig::default())
    }
}
