//! Concurrent step executor and the per-step quality-convergence loop.
//!
//! Three nested pools, each short-lived:
//!
//! ```text
//! batch  ── one task per step (JoinSet)
//!   step iteration ── queries, at most `max_concurrent_queries` at once
//!     query ── top `results_per_query` URLs, one task each
//! ```
//!
//! Workers only touch shared state through [`ResearchAccumulator`]: a URL is
//! claimed before its task is spawned, and facts are appended after
//! extraction. Every failure below the step level is logged and counted,
//! never propagated.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::accumulator::ResearchAccumulator;
use super::extractor::FactExtractor;
use super::metrics::{RunMetrics, ScrapeOutcome};
use super::quality::QualityEvaluator;
use super::types::{Fact, LoopExit, QualityEvaluation, Step, StepReport};
use crate::cache::{should_cache, SourceCache};
use crate::config::ResearchConfig;
use crate::fetch::{fetch_with_timeout, is_pdf_url, ContentKind, FetchPolicy, PageFetcher};
use crate::providers::{SearchProvider, TextGenerator};

/// Search results requested by the rescue query.
pub const RESCUE_SEARCH_RESULTS: usize = 3;
/// Rescue results actually fetched.
pub const RESCUE_FETCH_LIMIT: usize = 2;

/// Notified as each step of a batch finishes.
#[async_trait]
pub trait StepObserver: Send + Sync {
    async fn step_finished(&self, report: &StepReport);
}

/// Observer that does nothing.
pub struct NoopObserver;

#[async_trait]
impl StepObserver for NoopObserver {
    async fn step_finished(&self, _report: &StepReport) {}
}

/// Facts and sources gathered by one step, across its iterations.
#[derive(Debug, Default)]
struct StepState {
    facts: Mutex<Vec<Fact>>,
    sources: Mutex<Vec<String>>,
}

impl StepState {
    fn add_source(&self, url: &str) {
        self.sources.lock().push(url.to_string());
    }

    fn add_facts(&self, facts: &[Fact]) {
        self.facts.lock().extend_from_slice(facts);
    }

    fn facts(&self) -> Vec<Fact> {
        self.facts.lock().clone()
    }

    fn sources(&self) -> Vec<String> {
        self.sources.lock().clone()
    }
}

struct ExecutorInner {
    search: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn PageFetcher>,
    cache: Option<Arc<SourceCache>>,
    accumulator: Arc<ResearchAccumulator>,
    metrics: Arc<RunMetrics>,
    config: ResearchConfig,
    policy: FetchPolicy,
    extractor: FactExtractor,
    evaluator: QualityEvaluator,
}

/// Runs plan steps against the search, fetch and generation capabilities.
///
/// Cheap to clone; clones share the same accumulator and metrics.
#[derive(Clone)]
pub struct StepExecutor {
    inner: Arc<ExecutorInner>,
}

impl StepExecutor {
    /// Create an executor. Pass `cache: None` to bypass the source cache.
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        search: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn PageFetcher>,
        cache: Option<Arc<SourceCache>>,
        accumulator: Arc<ResearchAccumulator>,
        metrics: Arc<RunMetrics>,
        config: ResearchConfig,
    ) -> Self {
        let policy = FetchPolicy::new(config.html_timeout, config.pdf_timeout);
        let evaluator = QualityEvaluator::new(Arc::clone(&generator), config.quality_threshold);
        Self {
            inner: Arc::new(ExecutorInner {
                search,
                fetcher,
                cache,
                accumulator,
                metrics,
                config,
                policy,
                extractor: FactExtractor::new(generator),
                evaluator,
            }),
        }
    }

    /// Shared accumulator
    pub fn accumulator(&self) -> &Arc<ResearchAccumulator> {
        &self.inner.accumulator
    }

    /// Run one batch. A single step runs inline; several run in parallel.
    ///
    /// A step that panics is logged and omitted from the returned reports;
    /// its siblings are unaffected.
    pub async fn run_batch(
        &self,
        steps: Vec<Step>,
        observer: Arc<dyn StepObserver>,
    ) -> Vec<StepReport> {
        if steps.len() == 1 {
            let report = self.run_step(&steps[0]).await;
            observer.step_finished(&report).await;
            return vec![report];
        }

        info!(
            steps = ?steps.iter().map(|s| s.step_number).collect::<Vec<_>>(),
            "Running steps in parallel"
        );

        let mut tasks = JoinSet::new();
        for step in steps {
            let executor = self.clone();
            let observer = Arc::clone(&observer);
            tasks.spawn(async move {
                let report = executor.run_step(&step).await;
                observer.step_finished(&report).await;
                report
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "Step task failed"),
            }
        }
        reports.sort_by_key(|r| r.step_number);
        reports
    }

    /// Run one step's quality-convergence loop.
    pub async fn run_step(&self, step: &Step) -> StepReport {
        let inner = &self.inner;
        let step_number = step.step_number;
        inner.metrics.start_step(step_number);
        info!(step = step_number, action = %step.action, "Step started");

        let state = Arc::new(StepState::default());
        let mut tried: Vec<String> = Vec::new();
        let mut last_eval: Option<QualityEvaluation> = None;
        let mut previous_score: Option<f64> = None;
        let mut iterations = 0;
        let mut exit = LoopExit::MaxIterationsReached;

        for iteration in 1..=inner.config.max_iterations_per_step {
            let queries: Vec<String> = if iteration == 1 {
                step.search_queries
                    .iter()
                    .take(inner.config.max_queries_per_step)
                    .cloned()
                    .collect()
            } else {
                let missing = last_eval
                    .as_ref()
                    .map(|e| e.missing_aspects.clone())
                    .unwrap_or_default();
                if missing.is_empty() {
                    exit = LoopExit::NoRefinementPossible;
                    break;
                }
                let refined = inner
                    .evaluator
                    .refine_queries(&step.action, &state.facts(), &missing, &tried)
                    .await;
                if refined.is_empty() {
                    exit = LoopExit::NoRefinementPossible;
                    break;
                }
                inner.metrics.record_query_refinement();
                info!(step = step_number, iteration, queries = ?refined, "Refined queries");
                refined
            };

            iterations = iteration;
            tried.extend(queries.iter().cloned());
            self.run_queries(step, queries, &state).await;

            let facts = state.facts();
            if facts.is_empty() {
                warn!(step = step_number, iteration, "No facts collected this iteration");
                inner.metrics.record_iteration(step_number, 0.0);
                previous_score = Some(0.0);
                last_eval = Some(QualityEvaluation::no_data());
                continue;
            }

            let evaluation = inner
                .evaluator
                .evaluate(&step.action, &facts, &state.sources(), iteration)
                .await;
            let score = evaluation.overall_score;
            inner.metrics.record_iteration(step_number, score);

            if evaluation.threshold_met {
                exit = LoopExit::ThresholdMet;
                last_eval = Some(evaluation);
                break;
            }
            if let Some(previous) = previous_score {
                if score - previous < inner.config.min_improvement {
                    info!(
                        step = step_number,
                        iteration,
                        previous,
                        score,
                        "Diminishing returns, stopping"
                    );
                    exit = LoopExit::DiminishingReturns;
                    last_eval = Some(evaluation);
                    break;
                }
            }
            previous_score = Some(score);
            last_eval = Some(evaluation);
        }

        inner.metrics.end_step(step_number);
        let report = StepReport {
            step_number,
            iterations,
            exit,
            final_score: last_eval.map(|e| e.overall_score).unwrap_or(0.0),
            facts_collected: state.facts.lock().len(),
        };
        info!(
            step = step_number,
            iterations = report.iterations,
            exit = %report.exit,
            score = report.final_score,
            facts = report.facts_collected,
            "Step finished"
        );
        report
    }

    async fn run_queries(&self, step: &Step, queries: Vec<String>, state: &Arc<StepState>) {
        if queries.is_empty() {
            return;
        }
        let limit = queries.len().min(self.inner.config.max_concurrent_queries).max(1);
        let permits = Arc::new(Semaphore::new(limit));
        let objective: Arc<str> = Arc::from(step.action.as_str());

        let mut tasks = JoinSet::new();
        for query in queries {
            let executor = self.clone();
            let permits = Arc::clone(&permits);
            let objective = Arc::clone(&objective);
            let state = Arc::clone(state);
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                executor.execute_query(&query, &objective, &state).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(step = step.step_number, error = %e, "Query task failed");
            }
        }
    }

    async fn execute_query(&self, query: &str, objective: &str, state: &Arc<StepState>) {
        let inner = &self.inner;
        let hits = match inner
            .search
            .search(query, inner.config.search_results_requested)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(query = %query, error = %e, "Search failed");
                return;
            }
        };
        debug!(query = %query, results = hits.len(), "Search complete");

        let mut tasks = JoinSet::new();
        for hit in hits.into_iter().take(inner.config.results_per_query) {
            if !inner.accumulator.try_claim_url(&hit.url) {
                debug!(url = %hit.url, "Already scraped, skipping");
                inner.metrics.record_scrape(ScrapeOutcome::Skipped);
                continue;
            }
            let executor = self.clone();
            let objective = objective.to_string();
            let state = Arc::clone(state);
            tasks.spawn(async move {
                executor
                    .process_url(&hit.url, &objective, Some(state.as_ref()))
                    .await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(query = %query, error = %e, "URL task failed");
            }
        }
    }

    /// Fetch (or read from cache), extract and append. Returns the fact count.
    ///
    /// The caller must already have claimed `url`.
    async fn process_url(&self, url: &str, objective: &str, step: Option<&StepState>) -> usize {
        let inner = &self.inner;
        let cache = inner.cache.as_ref().filter(|_| should_cache(url));
        let mut pdf = is_pdf_url(url);

        let mut content = None;
        if let Some(cache) = cache {
            content = cache.get(url).await;
            inner.metrics.record_cache_lookup(content.is_some());
        }

        if content.is_none() {
            match fetch_with_timeout(inner.fetcher.as_ref(), url, &inner.policy).await {
                Ok(page) => {
                    pdf = page.kind == ContentKind::Pdf;
                    if let Some(cache) = cache {
                        cache.put(url, &page.text).await;
                    }
                    content = Some(page.text);
                }
                Err(e) => warn!(url = %url, error = %e, "Fetch failed"),
            }
        }

        let Some(text) = content.filter(|t| !t.trim().is_empty()) else {
            inner.metrics.record_scrape(ScrapeOutcome::Failed { pdf });
            return 0;
        };

        if let Some(step) = step {
            step.add_source(url);
        }
        inner.metrics.record_scrape(ScrapeOutcome::Success { pdf });

        let facts = inner.extractor.extract(objective, &text, url).await;
        inner.metrics.record_facts(facts.len());
        inner.accumulator.append_facts(&facts);
        if let Some(step) = step {
            step.add_facts(&facts);
        }
        facts.len()
    }

    /// Run the single best-effort rescue search. Returns the facts added.
    ///
    /// Results are processed in order; extraction targets the user's question.
    pub async fn run_rescue(&self, query: &str, question: &str) -> usize {
        let inner = &self.inner;
        inner.metrics.record_rescue_query();
        info!(query = %query, "Running rescue query");

        let hits = match inner.search.search(query, RESCUE_SEARCH_RESULTS).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(query = %query, error = %e, "Rescue search failed");
                return 0;
            }
        };

        let mut added = 0;
        for hit in hits.into_iter().take(RESCUE_FETCH_LIMIT) {
            if !inner.accumulator.try_claim_url(&hit.url) {
                inner.metrics.record_scrape(ScrapeOutcome::Skipped);
                continue;
            }
            added += self.process_url(&hit.url, question, None).await;
        }

        info!(facts = added, "Rescue query complete");
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, FetchResult};
    use crate::fetch::FetchedPage;
    use crate::providers::generation::MockTextGenerator;
    use crate::providers::search::MockSearchProvider;
    use crate::providers::{Generation, GenerationTask, SearchHit};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingFetcher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PageFetcher for CountingFetcher {
        async fn fetch(&self, url: &str, _timeout: Duration) -> FetchResult<FetchedPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FetchError::Failed {
                    url: url.to_string(),
                    message: "404".to_string(),
                });
            }
            Ok(FetchedPage {
                url: url.to_string(),
                text: format!("content of {}", url),
                kind: ContentKind::Html,
            })
        }
    }

    fn generator(score: f64) -> MockTextGenerator {
        let mut generator = MockTextGenerator::new();
        generator.expect_generate().returning(move |request| {
            let text = match request.task {
                GenerationTask::Extract => r#"{"key_findings": ["a finding"]}"#.to_string(),
                GenerationTask::Evaluate => format!(
                    r#"{{"completeness": {s}, "technical_depth": {s}, "source_quality": {s}, "recency": {s}, "missing_aspects": ["depth"]}}"#,
                    s = score
                ),
                GenerationTask::RefineQueries => r#"{"refined_queries": ["deeper"]}"#.to_string(),
                _ => "{}".to_string(),
            };
            Ok(Generation::text(text))
        });
        generator
    }

    fn search(urls: &'static [&'static str]) -> MockSearchProvider {
        let mut search = MockSearchProvider::new();
        search.expect_search().returning(move |_, max| {
            Ok(urls
                .iter()
                .take(max)
                .map(|u| SearchHit::new("t", *u))
                .collect())
        });
        search
    }

    fn executor(
        generator: MockTextGenerator,
        search: MockSearchProvider,
        fetcher: Arc<CountingFetcher>,
    ) -> (StepExecutor, Arc<RunMetrics>) {
        let metrics = Arc::new(RunMetrics::new());
        let executor = StepExecutor::new(
            Arc::new(generator),
            Arc::new(search),
            fetcher,
            None,
            Arc::new(ResearchAccumulator::new()),
            Arc::clone(&metrics),
            ResearchConfig::default(),
        );
        (executor, metrics)
    }

    fn fetcher(fail: bool) -> Arc<CountingFetcher> {
        Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn test_threshold_met_first_iteration() {
        let fetcher = fetcher(false);
        let (executor, metrics) = executor(
            generator(0.9),
            search(&["https://a.org/1", "https://a.org/2"]),
            Arc::clone(&fetcher),
        );
        let step = Step::new(1, "Find docs").with_queries(["q1"]);

        let report = executor.run_step(&step).await;
        assert_eq!(report.exit, LoopExit::ThresholdMet);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.facts_collected, 2);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.snapshot().urls_scraped, 2);
    }

    #[tokio::test]
    async fn test_only_top_results_processed() {
        let fetcher = fetcher(false);
        let (executor, _) = executor(
            generator(0.9),
            search(&["https://a.org/1", "https://a.org/2", "https://a.org/3", "https://a.org/4", "https://a.org/5"]),
            Arc::clone(&fetcher),
        );
        executor
            .run_step(&Step::new(1, "x").with_queries(["q"]))
            .await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shared_urls_fetched_once() {
        let fetcher = fetcher(false);
        let (executor, metrics) = executor(
            generator(0.9),
            search(&["https://a.org/same"]),
            Arc::clone(&fetcher),
        );
        let step = Step::new(1, "x").with_queries(["q1", "q2", "q3", "q4"]);
        executor.run_step(&step).await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().urls_skipped, 3);
        assert_eq!(executor.accumulator().fact_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_facts_runs_to_refinement() {
        let fetcher = fetcher(true);
        let (executor, metrics) = executor(generator(0.9), search(&["https://a.org/x"]), fetcher);
        let report = executor
            .run_step(&Step::new(4, "x").with_queries(["q"]))
            .await;

        assert_eq!(report.final_score, 0.0);
        assert_eq!(report.facts_collected, 0);
        assert_eq!(metrics.step_scores(4)[0], 0.0);
        assert!(metrics.snapshot().urls_failed >= 1);
    }

    #[tokio::test]
    async fn test_rescue_fetches_at_most_two() {
        let fetcher = fetcher(false);
        let (executor, metrics) = executor(
            generator(0.9),
            search(&["https://a.org/1", "https://a.org/2", "https://a.org/3"]),
            Arc::clone(&fetcher),
        );
        let added = executor.run_rescue("gap", "question").await;

        assert_eq!(added, 2);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.snapshot().rescue_queries, 1);
    }

    #[tokio::test]
    async fn test_batch_runs_every_step() {
        let fetcher = fetcher(false);
        let (executor, metrics) = executor(generator(0.9), search(&["https://a.org/1"]), fetcher);
        let steps = vec![
            Step::new(1, "a").with_queries(["qa"]),
            Step::new(2, "b").with_queries(["qb"]),
        ];
        let reports = executor.run_batch(steps, Arc::new(NoopObserver)).await;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].step_number, 1);
        assert_eq!(metrics.snapshot().steps_completed, 2);
    }
}
