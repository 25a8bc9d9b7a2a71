//! Report assembly: citation numbering, evidence serialization and writing.
//!
//! Citation numbers are assigned by first appearance of each source URL, so
//! several facts from one page share a number. The References section is
//! always built here and appended after the body, whether the body came from
//! the writer model or from the fallback rendering.

use chrono::Utc;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

use super::types::Fact;
use crate::prompts::REPORT_WRITER_PROMPT;
use crate::providers::{GenerationRequest, GenerationTask, TextGenerator};

/// Source URLs in citation order, numbered from 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Citations {
    urls: Vec<String>,
    numbers: HashMap<String, usize>,
}

impl Citations {
    /// Number every distinct source in `facts` by first appearance.
    pub fn assign(facts: &[Fact]) -> Self {
        let mut citations = Self::default();
        for fact in facts {
            if !citations.numbers.contains_key(&fact.source) {
                citations.urls.push(fact.source.clone());
                citations
                    .numbers
                    .insert(fact.source.clone(), citations.urls.len());
            }
        }
        citations
    }

    /// Citation number of `url`
    pub fn number(&self, url: &str) -> Option<usize> {
        self.numbers.get(url).copied()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Sources in citation order
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Markdown References section, one footnote per source.
    pub fn references_section(&self) -> String {
        let mut out = String::from("\n\n## References\n\n");
        if self.urls.is_empty() {
            out.push_str("No sources were collected.\n");
            return out;
        }
        for (i, url) in self.urls.iter().enumerate() {
            let _ = writeln!(out, "[^{}]: {}", i + 1, url);
        }
        out
    }
}

/// Facts as numbered evidence lines, each tagged with its citation marker.
pub fn format_evidence(facts: &[Fact], citations: &Citations) -> String {
    let mut out = String::new();
    for (i, fact) in facts.iter().enumerate() {
        let marker = citations
            .number(&fact.source)
            .map(|n| format!("[^{}]", n))
            .unwrap_or_default();
        let _ = writeln!(out, "[{}] Fact: {}\n    Citation: {}", i + 1, fact.text, marker);
    }
    out
}

/// Deterministic report body used when the writer model is unavailable.
pub fn fallback_body(question: &str, facts: &[Fact], citations: &Citations) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Research Report\n");
    let _ = writeln!(out, "**Question:** {}\n", question);
    let _ = writeln!(out, "_Generated {}_\n", Utc::now().format("%Y-%m-%d"));

    if facts.is_empty() {
        out.push_str("No facts were collected, so no findings can be reported.\n");
        return out;
    }

    let _ = writeln!(out, "## Findings\n");
    for url in citations.urls() {
        for fact in facts.iter().filter(|f| &f.source == url) {
            let marker = citations
                .number(url)
                .map(|n| format!(" [^{}]", n))
                .unwrap_or_default();
            let _ = writeln!(out, "- {}{}", fact.text, marker);
        }
    }
    out
}

/// Writes the final report from the accumulated facts.
pub struct ReportWriter {
    generator: Arc<dyn TextGenerator>,
}

impl ReportWriter {
    /// Create a writer
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Produce the Markdown report for `question`.
    ///
    /// Falls back to [`fallback_body`] when generation fails or returns
    /// nothing. The References section is always appended.
    pub async fn write(&self, question: &str, facts: &[Fact]) -> String {
        let citations = Citations::assign(facts);

        let body = if facts.is_empty() {
            warn!("No facts collected, writing fallback report");
            fallback_body(question, facts, &citations)
        } else {
            let prompt = format!(
                "Current date: {}\n\n--- USER QUESTION ---\n{}\n\n--- EVIDENCE ({} facts, {} sources) ---\n{}",
                Utc::now().format("%B %d, %Y"),
                question,
                facts.len(),
                citations.len(),
                format_evidence(facts, &citations)
            );
            let request =
                GenerationRequest::new(GenerationTask::Report, REPORT_WRITER_PROMPT, prompt)
                    .with_temperature(0.4);

            match self.generator.generate(request).await {
                Ok(generation) if !generation.text.trim().is_empty() => {
                    generation.text.trim_end().to_string()
                }
                Ok(_) => {
                    warn!("Report writer returned empty text, using fallback rendering");
                    fallback_body(question, facts, &citations)
                }
                Err(e) => {
                    warn!(error = %e, "Report writing failed, using fallback rendering");
                    fallback_body(question, facts, &citations)
                }
            }
        };

        info!(
            facts = facts.len(),
            sources = citations.len(),
            "Report assembled"
        );
        format!("{}{}", body.trim_end(), citations.references_section())
    }
}
