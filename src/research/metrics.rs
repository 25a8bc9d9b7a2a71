use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::time::Instant;

/// Outcome of processing one search result URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeOutcome {
    Success { pdf: bool },
    Failed { pdf: bool },
    /// Already claimed by another worker or an earlier step
    Skipped,
}

/// Counters for one research run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub api_calls: u64,
    pub tokens_estimated: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rotations: u64,
    pub iterations: u64,
    pub query_refinements: u64,
    pub rescue_queries: u64,
    pub urls_scraped: u64,
    pub urls_failed: u64,
    pub urls_skipped: u64,
    pub pdfs_processed: u64,
    pub facts_extracted: u64,
    pub checkpoints_saved: u64,
    pub steps_completed: u64,
    pub total_steps: u64,
    /// Overall score of every iteration, per step
    pub quality_scores: BTreeMap<u32, Vec<f64>>,
    pub step_durations_secs: BTreeMap<u32, f64>,
    pub elapsed_secs: f64,
}

impl MetricsSnapshot {
    /// Share of processed URLs that produced content, as a percentage
    pub fn scrape_success_rate(&self) -> f64 {
        let attempted = self.urls_scraped + self.urls_failed;
        if attempted == 0 {
            0.0
        } else {
            (self.urls_scraped as f64 / attempted as f64) * 100.0
        }
    }

    /// Cache hit rate as a percentage
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }

    /// Plain-text summary for the terminal
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Research Metrics");
        let _ = writeln!(out, "  Elapsed:            {:.1}s", self.elapsed_secs);
        let _ = writeln!(
            out,
            "  Steps:              {}/{}",
            self.steps_completed, self.total_steps
        );
        let _ = writeln!(out, "  API calls:          {}", self.api_calls);
        let _ = writeln!(out, "  Tokens (est.):      {}", self.tokens_estimated);
        let _ = writeln!(out, "  Credential rotations: {}", self.rotations);
        let _ = writeln!(out, "  Iterations:         {}", self.iterations);
        let _ = writeln!(out, "  Query refinements:  {}", self.query_refinements);
        let _ = writeln!(out, "  Rescue queries:     {}", self.rescue_queries);
        let _ = writeln!(
            out,
            "  URLs:               {} ok, {} failed, {} skipped ({:.0}% success)",
            self.urls_scraped,
            self.urls_failed,
            self.urls_skipped,
            self.scrape_success_rate()
        );
        let _ = writeln!(out, "  PDFs processed:     {}", self.pdfs_processed);
        let _ = writeln!(
            out,
            "  Cache:              {} hits, {} misses ({:.0}% hit rate)",
            self.cache_hits,
            self.cache_misses,
            self.cache_hit_rate()
        );
        let _ = writeln!(out, "  Facts extracted:    {}", self.facts_extracted);
        let _ = writeln!(out, "  Checkpoints saved:  {}", self.checkpoints_saved);

        for (step, scores) in &self.quality_scores {
            let rendered: Vec<String> = scores.iter().map(|s| format!("{:.2}", s)).collect();
            let duration = self
                .step_durations_secs
                .get(step)
                .map(|d| format!(" in {:.1}s", d))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  Step {} scores:      [{}]{}",
                step,
                rendered.join(", "),
                duration
            );
        }

        out
    }
}

/// Thread-safe metrics sink owned by one run
#[derive(Debug)]
pub struct RunMetrics {
    data: Mutex<MetricsSnapshot>,
    step_started: Mutex<HashMap<u32, Instant>>,
    started: Instant,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(MetricsSnapshot::default()),
            step_started: Mutex::new(HashMap::new()),
            started: Instant::now(),
        }
    }

    pub fn set_total_steps(&self, total: usize) {
        self.data.lock().total_steps = total as u64;
    }

    /// One generation call and the tokens it consumed
    pub fn record_generation(&self, tokens: u64) {
        let mut data = self.data.lock();
        data.api_calls += 1;
        data.tokens_estimated += tokens;
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let mut data = self.data.lock();
        if hit {
            data.cache_hits += 1;
        } else {
            data.cache_misses += 1;
        }
    }

    pub fn set_rotations(&self, rotations: u64) {
        self.data.lock().rotations = rotations;
    }

    /// One finished iteration of a step's convergence loop
    pub fn record_iteration(&self, step_number: u32, score: f64) {
        let mut data = self.data.lock();
        data.iterations += 1;
        data.quality_scores.entry(step_number).or_default().push(score);
    }

    pub fn record_query_refinement(&self) {
        self.data.lock().query_refinements += 1;
    }

    pub fn record_rescue_query(&self) {
        self.data.lock().rescue_queries += 1;
    }

    pub fn record_scrape(&self, outcome: ScrapeOutcome) {
        let mut data = self.data.lock();
        match outcome {
            ScrapeOutcome::Success { pdf } => {
                data.urls_scraped += 1;
                if pdf {
                    data.pdfs_processed += 1;
                }
            }
            ScrapeOutcome::Failed { .. } => data.urls_failed += 1,
            ScrapeOutcome::Skipped => data.urls_skipped += 1,
        }
    }

    pub fn record_facts(&self, count: usize) {
        self.data.lock().facts_extracted += count as u64;
    }

    pub fn record_checkpoint(&self) {
        self.data.lock().checkpoints_saved += 1;
    }

    pub fn start_step(&self, step_number: u32) {
        self.step_started.lock().insert(step_number, Instant::now());
    }

    /// Mark a step finished and record its wall time
    pub fn end_step(&self, step_number: u32) {
        let started = self.step_started.lock().remove(&step_number);
        let mut data = self.data.lock();
        data.steps_completed += 1;
        if let Some(started) = started {
            data.step_durations_secs
                .insert(step_number, started.elapsed().as_secs_f64());
        }
    }

    /// Scores recorded so far for one step
    pub fn step_scores(&self, step_number: u32) -> Vec<f64> {
        self.data
            .lock()
            .quality_scores
            .get(&step_number)
            .cloned()
            .unwrap_or_default()
    }

    /// Copy of the current counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = self.data.lock().clone();
        snapshot.elapsed_secs = self.started.elapsed().as_secs_f64();
        snapshot
    }
}
