use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

use super::accumulator::ResearchAccumulator;
use super::executor::StepObserver;
use super::metrics::RunMetrics;
use super::types::{Plan, StepReport};
use crate::checkpoint::{CheckpointState, CheckpointStore};

/// Tracks completed steps of a run and checkpoints after each one.
pub struct RunProgress {
    question: String,
    plan: Plan,
    accumulator: Arc<ResearchAccumulator>,
    checkpoints: Arc<CheckpointStore>,
    metrics: Arc<RunMetrics>,
    completed: Mutex<BTreeSet<u32>>,
}

impl RunProgress {
    /// Create a tracker, seeded with steps already completed by a resumed run
    pub fn new(
        question: impl Into<String>,
        plan: Plan,
        accumulator: Arc<ResearchAccumulator>,
        checkpoints: Arc<CheckpointStore>,
        metrics: Arc<RunMetrics>,
        completed: Vec<u32>,
    ) -> Self {
        Self {
            question: question.into(),
            plan,
            accumulator,
            checkpoints,
            metrics,
            completed: Mutex::new(completed.into_iter().collect()),
        }
    }

    pub fn is_completed(&self, step_number: u32) -> bool {
        self.completed.lock().contains(&step_number)
    }

    /// Completed step numbers, ascending
    pub fn completed_steps(&self) -> Vec<u32> {
        self.completed.lock().iter().copied().collect()
    }

    /// Current state of the run as a checkpoint snapshot
    pub fn snapshot(&self) -> CheckpointState {
        let completed_steps = self.completed_steps();
        let mut state = CheckpointState::new(self.question.clone(), self.plan.clone());
        state.current_step = completed_steps.last().copied().unwrap_or(0);
        state.completed_steps = completed_steps;
        state.all_facts = self.accumulator.facts_snapshot();
        state.scraped_urls = self.accumulator.scraped_urls_snapshot();
        state
    }

    /// Persist a snapshot. Failures are logged; the run continues.
    pub async fn checkpoint(&self) {
        match self.checkpoints.save_with(|| self.snapshot()).await {
            Ok(_) => self.metrics.record_checkpoint(),
            Err(e) => warn!(error = %e, "Failed to save checkpoint"),
        }
    }
}

#[async_trait]
impl StepObserver for RunProgress {
    async fn step_finished(&self, report: &StepReport) {
        self.completed.lock().insert(report.step_number);
        self.checkpoint().await;
    }
}
