use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::Fact;
use crate::prompts::EXTRACTOR_PROMPT;
use crate::providers::{GenerationRequest, GenerationTask, TextGenerator};

/// Page text beyond this many characters is not sent for extraction.
pub const MAX_EXTRACTION_CHARS: usize = 30_000;

#[derive(Debug, Deserialize)]
struct Findings {
    #[serde(default)]
    key_findings: Vec<Value>,
}

/// Turns page text into source-attributed facts.
pub struct FactExtractor {
    generator: Arc<dyn TextGenerator>,
}

impl FactExtractor {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Extract facts relevant to `objective` from `text`.
    ///
    /// The source URL is attached here rather than trusted from the model.
    /// Any failure yields no facts.
    pub async fn extract(&self, objective: &str, text: &str, source_url: &str) -> Vec<Fact> {
        let prompt = format!(
            "--- RESEARCH OBJECTIVE ---\n{}\n\n--- SOURCE URL ---\n{}\n\n--- PAGE TEXT ---\n{}\n\nRespond with JSON: {{\"key_findings\": [\"fact 1\", \"fact 2\"]}}",
            objective,
            source_url,
            truncate_chars(text, MAX_EXTRACTION_CHARS)
        );
        let request = GenerationRequest::new(GenerationTask::Extract, EXTRACTOR_PROMPT, prompt)
            .json()
            .with_temperature(0.1);

        let findings = match self
            .generator
            .generate(request)
            .await
            .and_then(|g| g.parse_json::<Findings>())
        {
            Ok(findings) => findings,
            Err(e) => {
                warn!(url = %source_url, error = %e, "Extraction failed");
                return Vec::new();
            }
        };

        let facts: Vec<Fact> = findings
            .key_findings
            .into_iter()
            .filter_map(finding_text)
            .map(|text| Fact::new(text, source_url))
            .collect();

        debug!(url = %source_url, facts = facts.len(), "Extracted facts");
        facts
    }
}

fn finding_text(value: Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s,
        Value::Object(map) => map
            .get("fact")
            .or_else(|| map.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)?,
        Value::Null => return None,
        other => other.to_string(),
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
