//! Scripted provider fakes shared by the engine tests
//!
//! The generator answers by task, the search provider from a fixed
//! query table and the fetcher from a fixed page table. All of them count
//! calls so tests can assert on what the engine actually did.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use research_orchestrator::error::{FetchError, FetchResult, ProviderError, ProviderResult};
use research_orchestrator::fetch::{ContentKind, FetchedPage, PageFetcher};
use research_orchestrator::providers::{
    Generation, GenerationRequest, GenerationTask, SearchHit, SearchProvider, TextGenerator,
};
use research_orchestrator::research::{Plan, Step};

/// Text generator that answers each task from a script
pub struct ScriptedGenerator {
    plan: Plan,
    scores: Mutex<VecDeque<f64>>,
    last_score: Mutex<f64>,
    missing_aspects: Vec<String>,
    sufficiency: Mutex<Option<serde_json::Value>>,
    failing: HashSet<GenerationTask>,
    calls: Mutex<HashMap<GenerationTask, usize>>,
    refinements: Mutex<usize>,
}

impl ScriptedGenerator {
    /// Generator for `plan`; evaluations score 0.9 unless scripted
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            scores: Mutex::new(VecDeque::new()),
            last_score: Mutex::new(0.9),
            missing_aspects: vec!["more implementation detail".to_string()],
            sufficiency: Mutex::new(Some(json!({"pass": true, "reason": "Covered"}))),
            failing: HashSet::new(),
            calls: Mutex::new(HashMap::new()),
            refinements: Mutex::new(0),
        }
    }

    /// Evaluation scores in call order; the last one repeats
    pub fn with_scores(self, scores: &[f64]) -> Self {
        if let Some(last) = scores.last() {
            *self.last_score.lock() = *last;
        }
        *self.scores.lock() = scores.iter().copied().collect();
        self
    }

    /// Sufficiency verdict to return
    pub fn with_sufficiency(self, verdict: serde_json::Value) -> Self {
        *self.sufficiency.lock() = Some(verdict);
        self
    }

    /// Make every call for `task` fail
    pub fn failing(mut self, task: GenerationTask) -> Self {
        self.failing.insert(task);
        self
    }

    /// Number of calls made for `task`
    pub fn calls(&self, task: GenerationTask) -> usize {
        self.calls.lock().get(&task).copied().unwrap_or(0)
    }

    fn next_score(&self) -> f64 {
        match self.scores.lock().pop_front() {
            Some(score) => score,
            None => *self.last_score.lock(),
        }
    }

    fn respond(&self, request: &GenerationRequest) -> String {
        match request.task {
            GenerationTask::Plan | GenerationTask::RefinePlan => {
                serde_json::to_string(&self.plan).unwrap()
            }
            GenerationTask::Extract => {
                let url = source_url(&request.prompt);
                json!({ "key_findings": [format!("Finding from {}", url)] }).to_string()
            }
            GenerationTask::Evaluate => {
                let score = self.next_score();
                json!({
                    "completeness": score,
                    "technical_depth": score,
                    "source_quality": score,
                    "recency": score,
                    "missing_aspects": self.missing_aspects,
                })
                .to_string()
            }
            GenerationTask::RefineQueries => {
                let mut count = self.refinements.lock();
                *count += 1;
                json!({ "refined_queries": [format!("refined query {}", *count)] }).to_string()
            }
            GenerationTask::Sufficiency => self
                .sufficiency
                .lock()
                .clone()
                .unwrap_or_else(|| json!({"pass": true}))
                .to_string(),
            GenerationTask::Report => "# Findings\n\nTokio schedules tasks [^1].".to_string(),
        }
    }
}

/// Pull the source URL out of an extraction prompt
fn source_url(prompt: &str) -> String {
    prompt
        .split("--- SOURCE URL ---\n")
        .nth(1)
        .and_then(|rest| rest.lines().next())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest) -> ProviderResult<Generation> {
        *self.calls.lock().entry(request.task).or_insert(0) += 1;

        if self.failing.contains(&request.task) {
            return Err(ProviderError::Exhausted {
                provider: "scripted".to_string(),
            });
        }

        Ok(Generation {
            text: self.respond(&request),
            model: Some("scripted-model".to_string()),
            total_tokens: Some(100),
        })
    }

    fn rotations(&self) -> u64 {
        0
    }
}

/// Search provider backed by a query table
#[derive(Default)]
pub struct FakeSearch {
    results: HashMap<String, Vec<String>>,
    queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `query` with `urls`, in order
    pub fn with_results(mut self, query: &str, urls: &[&str]) -> Self {
        self.results.insert(
            query.to_string(),
            urls.iter().map(|u| u.to_string()).collect(),
        );
        self
    }

    /// Every query searched so far
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    /// Times `query` was searched
    pub fn count(&self, query: &str) -> usize {
        self.queries.lock().iter().filter(|q| *q == query).count()
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    fn name(&self) -> &str {
        "fake-search"
    }

    async fn search(&self, query: &str, max_results: usize) -> ProviderResult<Vec<SearchHit>> {
        self.queries.lock().push(query.to_string());
        Ok(self
            .results
            .get(query)
            .map(|urls| {
                urls.iter()
                    .take(max_results)
                    .map(|url| SearchHit::new(format!("Title of {}", url), url))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn rotations(&self) -> u64 {
        0
    }
}

/// Page fetcher backed by a page table; unknown URLs fail
#[derive(Default)]
pub struct FakeFetcher {
    pages: HashMap<String, String>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `text` for `url`
    pub fn with_page(mut self, url: &str, text: &str) -> Self {
        self.pages.insert(url.to_string(), text.to_string());
        self
    }

    /// Times `url` was fetched
    pub fn count(&self, url: &str) -> usize {
        self.fetches.lock().get(url).copied().unwrap_or(0)
    }

    /// Total fetches of any URL
    pub fn total(&self) -> usize {
        self.fetches.lock().values().sum()
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> FetchResult<FetchedPage> {
        *self.fetches.lock().entry(url.to_string()).or_insert(0) += 1;

        match self.pages.get(url) {
            Some(text) => Ok(FetchedPage {
                url: url.to_string(),
                text: text.clone(),
                kind: ContentKind::Html,
            }),
            None => Err(FetchError::Failed {
                url: url.to_string(),
                message: "HTTP 404".to_string(),
            }),
        }
    }
}

/// One-step plan searching `queries`
pub fn single_step_plan(queries: &[&str]) -> Plan {
    Plan::new(
        "Understand the tokio scheduler",
        vec![Step::new(1, "Research the tokio scheduler").with_queries(queries.iter().copied())],
    )
}
