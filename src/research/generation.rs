use async_trait::async_trait;
use std::sync::Arc;

use super::metrics::RunMetrics;
use crate::error::ProviderResult;
use crate::providers::{Generation, GenerationRequest, TextGenerator};

/// Tokens per whitespace-separated word, used when a provider omits usage.
pub const TOKENS_PER_WORD: f64 = 1.3;

/// Rough token count of `text`.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.split_whitespace().count() as f64 * TOKENS_PER_WORD).ceil() as u64
}

/// Generator wrapper that counts calls and tokens into the run metrics.
pub struct MeteredGenerator {
    inner: Arc<dyn TextGenerator>,
    metrics: Arc<RunMetrics>,
}

impl MeteredGenerator {
    pub fn new(inner: Arc<dyn TextGenerator>, metrics: Arc<RunMetrics>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl TextGenerator for MeteredGenerator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, request: GenerationRequest) -> ProviderResult<Generation> {
        let prompt_tokens =
            estimate_tokens(&request.system_instruction) + estimate_tokens(&request.prompt);
        let generation = self.inner.generate(request).await?;

        let tokens = generation
            .total_tokens
            .map(u64::from)
            .unwrap_or_else(|| prompt_tokens + estimate_tokens(&generation.text));
        self.metrics.record_generation(tokens);

        Ok(generation)
    }

    fn rotations(&self) -> u64 {
        self.inner.rotations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::generation::MockTextGenerator;
    use crate::providers::GenerationTask;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one two three"), 4);
        assert_eq!(estimate_tokens("ten words here to check rounding of the estimate ok"), 13);
    }

    #[tokio::test]
    async fn test_prefers_reported_usage() {
        let mut inner = MockTextGenerator::new();
        inner.expect_generate().returning(|_| {
            Ok(Generation {
                text: "a b c".to_string(),
                model: None,
                total_tokens: Some(42),
            })
        });

        let metrics = Arc::new(RunMetrics::new());
        let generator = MeteredGenerator::new(Arc::new(inner), Arc::clone(&metrics));
        generator
            .generate(GenerationRequest::new(GenerationTask::Extract, "s", "p"))
            .await
            .unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.api_calls, 1);
        assert_eq!(snapshot.tokens_estimated, 42);
    }

    #[tokio::test]
    async fn test_estimates_when_usage_missing() {
        let mut inner = MockTextGenerator::new();
        inner
            .expect_generate()
            .returning(|_| Ok(Generation::text("w w w w w w w w w w")));

        let metrics = Arc::new(RunMetrics::new());
        let generator = MeteredGenerator::new(Arc::new(inner), Arc::clone(&metrics));
        generator
            .generate(GenerationRequest::new(GenerationTask::Extract, "", ""))
            .await
            .unwrap();

        assert_eq!(metrics.snapshot().tokens_estimated, 13);
    }

    #[tokio::test]
    async fn test_failed_calls_are_not_counted() {
        let mut inner = MockTextGenerator::new();
        inner.expect_generate().returning(|_| {
            Err(crate::error::ProviderError::Timeout { timeout_ms: 1 })
        });

        let metrics = Arc::new(RunMetrics::new());
        let generator = MeteredGenerator::new(Arc::new(inner), Arc::clone(&metrics));
        assert!(generator
            .generate(GenerationRequest::new(GenerationTask::Plan, "s", "p"))
            .await
            .is_err());
        assert_eq!(metrics.snapshot().api_calls, 0);
    }
}
