use parking_lot::Mutex;
use std::collections::HashSet;

use super::types::Fact;

/// Run-wide shared state mutated by concurrent workers.
///
/// The fact list and the scraped-URL set each sit behind their own lock and
/// only ever grow during a run. Locks are held for a single push or insert.
#[derive(Debug, Default)]
pub struct ResearchAccumulator {
    facts: Mutex<Vec<Fact>>,
    scraped_urls: Mutex<HashSet<String>>,
}

impl ResearchAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an accumulator pre-loaded from a checkpoint
    pub fn restored(facts: Vec<Fact>, scraped_urls: Vec<String>) -> Self {
        Self {
            facts: Mutex::new(facts),
            scraped_urls: Mutex::new(scraped_urls.into_iter().collect()),
        }
    }

    /// Atomically mark `url` as scraped.
    ///
    /// Returns `true` for the first caller only; every later caller gets
    /// `false` and must skip the URL.
    pub fn try_claim_url(&self, url: &str) -> bool {
        self.scraped_urls.lock().insert(url.to_string())
    }

    /// Whether `url` has already been claimed.
    pub fn is_scraped(&self, url: &str) -> bool {
        self.scraped_urls.lock().contains(url)
    }

    /// Append facts to the shared list.
    pub fn append_facts(&self, facts: &[Fact]) {
        if facts.is_empty() {
            return;
        }
        self.facts.lock().extend_from_slice(facts);
    }

    /// Copy of the fact list, in append order.
    pub fn facts_snapshot(&self) -> Vec<Fact> {
        self.facts.lock().clone()
    }

    /// Sorted copy of the scraped-URL set.
    pub fn scraped_urls_snapshot(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.scraped_urls.lock().iter().cloned().collect();
        urls.sort();
        urls
    }

    pub fn fact_count(&self) -> usize {
        self.facts.lock().len()
    }

    pub fn url_count(&self) -> usize {
        self.scraped_urls.lock().len()
    }
}
