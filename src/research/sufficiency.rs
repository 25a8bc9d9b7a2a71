use std::sync::Arc;
use tracing::{info, warn};

use super::extractor::truncate_chars;
use super::types::{Fact, SufficiencyVerdict};
use crate::prompts::SUFFICIENCY_PROMPT;
use crate::providers::{GenerationRequest, GenerationTask, TextGenerator};

/// Facts text beyond this many characters is not sent to the audit.
pub const MAX_SUFFICIENCY_CHARS: usize = 20_000;

/// Final audit of whether all collected facts can answer the question.
pub struct SufficiencyChecker {
    generator: Arc<dyn TextGenerator>,
}

impl SufficiencyChecker {
    /// Create a checker
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Audit `facts` against `question`. Never fails: any error passes.
    pub async fn check(&self, question: &str, facts: &[Fact]) -> SufficiencyVerdict {
        let facts_text = facts
            .iter()
            .map(|f| format!("- {} (Source: {})", f.text, f.source))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "--- USER GOAL ---\n{}\n\n--- COLLECTED FACTS ({} total) ---\n{}",
            question,
            facts.len(),
            truncate_chars(&facts_text, MAX_SUFFICIENCY_CHARS)
        );
        let request =
            GenerationRequest::new(GenerationTask::Sufficiency, SUFFICIENCY_PROMPT, prompt)
                .json()
                .with_temperature(0.2);

        match self
            .generator
            .generate(request)
            .await
            .and_then(|g| g.parse_json::<SufficiencyVerdict>())
        {
            Ok(verdict) => {
                info!(
                    pass = verdict.pass,
                    rescue_query = verdict.rescue().unwrap_or(""),
                    reason = %verdict.reason,
                    "Sufficiency check complete"
                );
                verdict
            }
            Err(e) => {
                warn!(error = %e, "Sufficiency check failed, passing");
                SufficiencyVerdict::fail_open("Error in sanity check")
            }
        }
    }
}
