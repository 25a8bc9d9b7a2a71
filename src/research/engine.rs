use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::accumulator::ResearchAccumulator;
use super::executor::{StepExecutor, StepObserver};
use super::generation::MeteredGenerator;
use super::metrics::{MetricsSnapshot, RunMetrics};
use super::planner::{validate_plan, Planner};
use super::progress::RunProgress;
use super::report::ReportWriter;
use super::scheduler::create_execution_batches;
use super::sufficiency::SufficiencyChecker;
use super::types::{Fact, Plan, Step, StepReport, SufficiencyVerdict};
use crate::cache::SourceCache;
use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::config::ResearchConfig;
use crate::error::AppResult;
use crate::fetch::PageFetcher;
use crate::providers::{SearchProvider, TextGenerator};
use crate::storage::{RunRecord, RunStatus, SqliteStorage, Storage};

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize)]
pub struct ResearchOutput {
    pub run_id: String,
    pub report: String,
    pub plan: Plan,
    pub facts: Vec<Fact>,
    pub step_reports: Vec<StepReport>,
    pub sufficiency: SufficiencyVerdict,
    pub metrics: MetricsSnapshot,
}

/// Per-run state: metrics, the metered generator and the run record.
struct RunContext {
    record: RunRecord,
    metrics: Arc<RunMetrics>,
    generator: Arc<dyn TextGenerator>,
    rotations_before: u64,
}

/// Top-level orchestrator: plan, execute batches, audit, write the report.
pub struct ResearchEngine {
    generator: Arc<dyn TextGenerator>,
    search: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn PageFetcher>,
    storage: SqliteStorage,
    cache: Option<Arc<SourceCache>>,
    checkpoints: Arc<CheckpointStore>,
    config: ResearchConfig,
}

impl ResearchEngine {
    /// Create an engine. The source cache is used when `config.cache_enabled`.
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        search: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn PageFetcher>,
        storage: SqliteStorage,
        config: ResearchConfig,
    ) -> Self {
        let cache = config
            .cache_enabled
            .then(|| Arc::new(SourceCache::new(storage.clone(), config.cache_ttl_hours)));
        let checkpoints = Arc::new(CheckpointStore::new(
            storage.clone(),
            config.checkpoint_name.clone(),
        ));

        Self {
            generator,
            search,
            fetcher,
            storage,
            cache,
            checkpoints,
            config,
        }
    }

    /// Checkpoint store used by this engine
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Source cache, if enabled
    pub fn cache(&self) -> Option<&SourceCache> {
        self.cache.as_deref()
    }

    /// Create a plan without executing it
    pub async fn create_plan(&self, question: &str) -> AppResult<Plan> {
        Planner::new(Arc::clone(&self.generator))
            .create_plan(question)
            .await
    }

    /// Revise a plan from reviewer feedback; the original is kept on failure
    pub async fn refine_plan(&self, plan: &Plan, feedback: &str) -> Plan {
        Planner::new(Arc::clone(&self.generator))
            .refine_plan(plan, feedback)
            .await
    }

    /// Run the full pipeline for `question`.
    ///
    /// Only plan generation failure is fatal; every later failure degrades
    /// the report instead of aborting the run.
    pub async fn execute(&self, question: &str) -> AppResult<ResearchOutput> {
        let run = self.start_run(question).await;
        info!(run_id = %run.record.id, "Research run started");

        let plan = match Planner::new(Arc::clone(&run.generator))
            .create_plan(question)
            .await
        {
            Ok(plan) => plan,
            Err(e) => {
                error!(error = %e, "Plan generation failed, aborting run");
                self.finish_run(run, RunStatus::Failed).await;
                return Err(e);
            }
        };

        self.run_plan(run, question, plan, None).await
    }

    /// Run an already approved plan for `question`.
    ///
    /// A plan with no steps, or with zero or repeated step numbers, is rejected
    /// before anything runs.
    pub async fn execute_plan(&self, question: &str, plan: Plan) -> AppResult<ResearchOutput> {
        let plan = validate_plan(plan)?;
        let run = self.start_run(question).await;
        self.run_plan(run, question, plan, None).await
    }

    /// Continue from the stored checkpoint, if there is one.
    ///
    /// Facts and scraped URLs are restored before any step runs, and steps
    /// recorded as completed are not run again. A checkpointed plan that fails
    /// validation is an error and the checkpoint is left in place.
    pub async fn resume(&self) -> AppResult<Option<ResearchOutput>> {
        let Some(state) = self.checkpoints.load().await? else {
            info!("No checkpoint to resume from");
            return Ok(None);
        };

        info!(
            completed = ?state.completed_steps,
            facts = state.all_facts.len(),
            urls = state.scraped_urls.len(),
            "Resuming from checkpoint"
        );
        let question = state.user_prompt.clone();
        let plan = validate_plan(state.plan.clone())?;
        let run = self.start_run(&question).await;
        self.run_plan(run, &question, plan, Some(state))
            .await
            .map(Some)
    }

    async fn run_plan(
        &self,
        run: RunContext,
        question: &str,
        plan: Plan,
        restored: Option<CheckpointState>,
    ) -> AppResult<ResearchOutput> {
        let (accumulator, completed) = match restored {
            Some(state) => (
                ResearchAccumulator::restored(state.all_facts, state.scraped_urls),
                state.completed_steps,
            ),
            None => (ResearchAccumulator::new(), Vec::new()),
        };
        let accumulator = Arc::new(accumulator);
        run.metrics.set_total_steps(plan.steps.len());

        let progress = Arc::new(RunProgress::new(
            question,
            plan.clone(),
            Arc::clone(&accumulator),
            Arc::clone(&self.checkpoints),
            Arc::clone(&run.metrics),
            completed,
        ));
        progress.checkpoint().await;

        let executor = StepExecutor::new(
            Arc::clone(&run.generator),
            Arc::clone(&self.search),
            Arc::clone(&self.fetcher),
            self.cache.clone(),
            Arc::clone(&accumulator),
            Arc::clone(&run.metrics),
            self.config.clone(),
        );

        let remaining: Vec<Step> = plan
            .steps
            .iter()
            .filter(|s| !progress.is_completed(s.step_number))
            .cloned()
            .collect();
        if remaining.len() < plan.steps.len() {
            info!(
                skipped = plan.steps.len() - remaining.len(),
                "Skipping steps completed before resume"
            );
        }

        let batches = create_execution_batches(&remaining);
        let total_batches = batches.len();
        let observer: Arc<dyn StepObserver> = progress.clone();
        let mut step_reports = Vec::new();
        for (index, batch) in batches.into_iter().enumerate() {
            info!(
                batch = index + 1,
                total = total_batches,
                steps = ?batch.iter().map(|s| s.step_number).collect::<Vec<_>>(),
                "Executing batch"
            );
            step_reports.extend(executor.run_batch(batch, Arc::clone(&observer)).await);
        }

        let facts = accumulator.facts_snapshot();
        let sufficiency = SufficiencyChecker::new(Arc::clone(&run.generator))
            .check(question, &facts)
            .await;
        if let Some(rescue_query) = sufficiency.rescue() {
            executor.run_rescue(rescue_query, question).await;
        }
        progress.checkpoint().await;

        let facts = accumulator.facts_snapshot();
        let report = ReportWriter::new(Arc::clone(&run.generator))
            .write(question, &facts)
            .await;

        if let Err(e) = self.checkpoints.clear().await {
            warn!(error = %e, "Failed to clear checkpoint after successful run");
        }

        let run_id = run.record.id.clone();
        let metrics = self.finish_run(run, RunStatus::Completed).await;
        info!(
            run_id = %run_id,
            facts = facts.len(),
            elapsed_secs = metrics.elapsed_secs,
            "Research run completed"
        );

        Ok(ResearchOutput {
            run_id,
            report,
            plan,
            facts,
            step_reports,
            sufficiency,
            metrics,
        })
    }

    fn rotations(&self) -> u64 {
        self.generator.rotations() + self.search.rotations()
    }

    async fn start_run(&self, question: &str) -> RunContext {
        let metrics = Arc::new(RunMetrics::new());
        let generator: Arc<dyn TextGenerator> = Arc::new(MeteredGenerator::new(
            Arc::clone(&self.generator),
            Arc::clone(&metrics),
        ));
        let record = RunRecord::new(question);
        if let Err(e) = self.storage.save_run(&record).await {
            warn!(error = %e, "Failed to record run start");
        }

        RunContext {
            record,
            metrics,
            generator,
            rotations_before: self.rotations(),
        }
    }

    async fn finish_run(&self, run: RunContext, status: RunStatus) -> MetricsSnapshot {
        run.metrics
            .set_rotations(self.rotations().saturating_sub(run.rotations_before));
        let snapshot = run.metrics.snapshot();

        let metrics = serde_json::to_value(&snapshot).unwrap_or_default();
        let record = run.record.finish(status, metrics);
        if let Err(e) = self.storage.save_run(&record).await {
            warn!(run_id = %record.id, error = %e, "Failed to record run result");
        }
        snapshot
    }
}
