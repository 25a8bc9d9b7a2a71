use chrono::{Datelike, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::extractor::truncate_chars;
use super::types::{Fact, QualityEvaluation};
use crate::prompts::{QUALITY_EVALUATOR_PROMPT, QUERY_REFINER_PROMPT};
use crate::providers::{GenerationRequest, GenerationTask, TextGenerator};

/// Facts shown to the evaluator.
const EVAL_FACT_LIMIT: usize = 30;
const EVAL_FACT_CHARS: usize = 200;
/// Sources shown to the evaluator.
const EVAL_SOURCE_LIMIT: usize = 20;
/// Facts shown to the query refiner.
const REFINE_FACT_LIMIT: usize = 15;
const REFINE_FACT_CHARS: usize = 150;
/// Refined queries used per iteration.
pub const MAX_REFINED_QUERIES: usize = 3;

#[derive(Debug, Deserialize)]
struct RefinedQueries {
    #[serde(default)]
    refined_queries: Vec<String>,
}

/// Scores a step's gathered facts and proposes gap-filling queries.
pub struct QualityEvaluator {
    generator: Arc<dyn TextGenerator>,
    threshold: f64,
}

impl QualityEvaluator {
    pub fn new(generator: Arc<dyn TextGenerator>, threshold: f64) -> Self {
        Self {
            generator,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Evaluate the cumulative facts of one step.
    ///
    /// The returned evaluation is always normalized against the configured
    /// threshold. Evaluator failure yields [`QualityEvaluation::conservative_default`].
    pub async fn evaluate(
        &self,
        objective: &str,
        facts: &[Fact],
        sources: &[String],
        iteration: u32,
    ) -> QualityEvaluation {
        let facts_summary = facts
            .iter()
            .take(EVAL_FACT_LIMIT)
            .map(|f| {
                format!(
                    "- {} [Source: {}]",
                    truncate_chars(&f.text, EVAL_FACT_CHARS),
                    f.source
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let sources_summary = sources
            .iter()
            .take(EVAL_SOURCE_LIMIT)
            .map(|s| format!("- {}", s))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Current year: {}\n\n--- STEP OBJECTIVE ---\n{}\n\n--- ITERATION ---\n{}\n\n--- EXTRACTED FACTS ({} total) ---\n{}\n\n--- SOURCES USED ({} total) ---\n{}",
            Utc::now().year(),
            objective,
            iteration,
            facts.len(),
            facts_summary,
            sources.len(),
            sources_summary
        );
        let request =
            GenerationRequest::new(GenerationTask::Evaluate, QUALITY_EVALUATOR_PROMPT, prompt)
                .json()
                .with_temperature(0.3);

        match self
            .generator
            .generate(request)
            .await
            .and_then(|g| g.parse_json::<QualityEvaluation>())
        {
            Ok(evaluation) => {
                let evaluation = evaluation.normalize(self.threshold);
                info!(
                    iteration,
                    score = evaluation.overall_score,
                    completeness = evaluation.completeness,
                    technical_depth = evaluation.technical_depth,
                    source_quality = evaluation.source_quality,
                    recency = evaluation.recency,
                    threshold_met = evaluation.threshold_met,
                    "Quality evaluated"
                );
                evaluation
            }
            Err(e) => {
                warn!(iteration, error = %e, "Quality evaluation failed, using conservative default");
                QualityEvaluation::conservative_default()
            }
        }
    }

    /// New queries targeting `missing_aspects`, excluding anything in `tried`.
    ///
    /// Falls back to a single generic query when generation fails. May return
    /// an empty list when every candidate was already tried.
    pub async fn refine_queries(
        &self,
        objective: &str,
        facts: &[Fact],
        missing_aspects: &[String],
        tried: &[String],
    ) -> Vec<String> {
        let facts_brief = facts
            .iter()
            .take(REFINE_FACT_LIMIT)
            .map(|f| format!("- {}", truncate_chars(&f.text, REFINE_FACT_CHARS)))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "--- STEP OBJECTIVE ---\n{}\n\n--- WHAT WE ALREADY FOUND ---\n{}\n\n--- WHAT'S STILL MISSING ---\n{}\n\n--- QUERIES ALREADY TRIED (DO NOT REPEAT) ---\n{}",
            objective,
            facts_brief,
            missing_aspects.join(", "),
            tried.join(", ")
        );
        let request =
            GenerationRequest::new(GenerationTask::RefineQueries, QUERY_REFINER_PROMPT, prompt)
                .json()
                .with_temperature(0.7);

        let candidates = match self
            .generator
            .generate(request)
            .await
            .and_then(|g| g.parse_json::<RefinedQueries>())
        {
            Ok(refined) => refined.refined_queries,
            Err(e) => {
                warn!(error = %e, "Query refinement failed, using fallback query");
                vec![format!("{} detailed implementation guide", objective)]
            }
        };

        filter_new_queries(candidates, tried)
    }
}

/// Drop empty, already-tried and duplicate queries; keep at most
/// [`MAX_REFINED_QUERIES`].
pub fn filter_new_queries(candidates: Vec<String>, tried: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = tried.iter().map(|q| normalize_query(q)).collect();

    candidates
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty() && seen.insert(normalize_query(q)))
        .take(MAX_REFINED_QUERIES)
        .collect()
}

fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::providers::generation::MockTextGenerator;
    use crate::providers::Generation;
    use pretty_assertions::assert_eq;

    fn evaluator(response: Result<&'static str, ()>) -> QualityEvaluator {
        let mut generator = MockTextGenerator::new();
        generator.expect_generate().returning(move |_| match response {
            Ok(text) => Ok(Generation::text(text)),
            Err(()) => Err(ProviderError::Unavailable {
                message: "down".to_string(),
                retries: 3,
            }),
        });
        QualityEvaluator::new(Arc::new(generator), 0.7)
    }

    fn facts(n: usize) -> Vec<Fact> {
        (0..n)
            .map(|i| Fact::new(format!("fact {}", i), format!("https://s{}.org", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_evaluate_recomputes_score() {
        let evaluator = evaluator(Ok(r#"{
            "completeness": 0.9, "technical_depth": 0.8, "source_quality": 0.9, "recency": 1.0,
            "overall_score": 0.1, "threshold_met": false, "missing_aspects": []
        }"#));
        let eval = evaluator.evaluate("obj", &facts(2), &[], 1).await;
        assert!((eval.overall_score - 0.88).abs() < 1e-9);
        assert!(eval.threshold_met);
    }

    #[tokio::test]
    async fn test_evaluate_failure_is_conservative() {
        let eval = evaluator(Err(())).evaluate("obj", &facts(1), &[], 1).await;
        assert_eq!(eval, QualityEvaluation::conservative_default());
    }

    #[tokio::test]
    async fn test_evaluate_empty_object_is_conservative() {
        let eval = evaluator(Ok("{}")).evaluate("obj", &facts(3), &[], 1).await;
        assert_eq!(eval, QualityEvaluation::conservative_default());
        assert!(!eval.threshold_met);
    }

    #[tokio::test]
    async fn test_evaluate_missing_dimension_is_conservative() {
        let evaluator = evaluator(Ok(
            r#"{"completeness": 1.0, "technical_depth": 1.0, "source_quality": 1.0}"#,
        ));
        let eval = evaluator.evaluate("obj", &facts(3), &[], 1).await;
        assert_eq!(eval, QualityEvaluation::conservative_default());
    }

    #[tokio::test]
    async fn test_evaluate_prompt_limits_facts_and_sources() {
        let mut generator = MockTextGenerator::new();
        generator.expect_generate().returning(|request| {
            assert!(request.prompt.contains("fact 29"));
            assert!(!request.prompt.contains("fact 30 "));
            assert!(request.prompt.contains("(45 total)"));
            assert!(request.prompt.contains("https://src19.org"));
            assert!(!request.prompt.contains("https://src20.org"));
            Ok(Generation::text(
                r#"{"completeness": 0.5, "technical_depth": 0.5, "source_quality": 0.5, "recency": 0.5}"#,
            ))
        });
        let evaluator = QualityEvaluator::new(Arc::new(generator), 0.7);
        let sources: Vec<String> = (0..25).map(|i| format!("https://src{}.org", i)).collect();
        evaluator.evaluate("obj", &facts(45), &sources, 2).await;
    }

    #[tokio::test]
    async fn test_refine_queries_filters_tried() {
        let evaluator = evaluator(Ok(
            r#"{"refined_queries": ["tokio scheduler", "Tokio  Scheduler internals", "tokio scheduler internals", "", "tokio budget", "tokio io driver"]}"#,
        ));
        let queries = evaluator
            .refine_queries("obj", &[], &["internals".to_string()], &["TOKIO scheduler".to_string()])
            .await;
        assert_eq!(
            queries,
            vec![
                "Tokio  Scheduler internals".to_string(),
                "tokio budget".to_string(),
                "tokio io driver".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_refine_queries_fallback() {
        let queries = evaluator(Err(()))
            .refine_queries("Tokio runtime", &[], &["x".to_string()], &[])
            .await;
        assert_eq!(queries, vec!["Tokio runtime detailed implementation guide"]);
    }

    #[tokio::test]
    async fn test_refine_queries_fallback_already_tried() {
        let tried = vec!["Tokio runtime detailed implementation guide".to_string()];
        let queries = evaluator(Err(()))
            .refine_queries("Tokio runtime", &[], &["x".to_string()], &tried)
            .await;
        assert!(queries.is_empty());
    }
}
