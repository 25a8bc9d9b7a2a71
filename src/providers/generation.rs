use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{ChatCompletionRequest, ChatCompletionResponse, Generation, GenerationRequest};
use crate::config::{LlmProviderConfig, RequestConfig};
use crate::error::{ProviderError, ProviderResult};
use crate::rotation::CredentialPool;

/// Text-generation capability: system instruction plus prompt in, text out.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Run one generation request.
    async fn generate(&self, request: GenerationRequest) -> ProviderResult<Generation>;

    /// Credential rotations performed so far.
    fn rotations(&self) -> u64;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint
#[derive(Clone)]
pub struct ChatCompletionClient {
    client: Client,
    name: String,
    base_url: String,
    model: String,
    request_config: RequestConfig,
}

impl ChatCompletionClient {
    /// Create a new chat completion client
    pub fn new(config: &LlmProviderConfig, request_config: RequestConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(ProviderError::Http)?;

        Ok(Self {
            client,
            name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            request_config,
        })
    }

    /// Provider name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run a completion with one credential, retrying transient failures.
    ///
    /// Rate-limit signals are returned immediately so the caller can rotate.
    pub async fn complete(
        &self,
        api_key: &str,
        request: &GenerationRequest,
    ) -> ProviderResult<Generation> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest::from_request(&self.model, request);

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = backoff_delay(self.request_config.retry_delay_ms, retries);
                warn!(
                    provider = %self.name,
                    task = %request.task,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying generation request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(&url, api_key, &body).await {
                Ok(generation) => {
                    info!(
                        provider = %self.name,
                        task = %request.task,
                        latency_ms = start.elapsed().as_millis(),
                        "Generation call succeeded"
                    );
                    return Ok(generation);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    error!(
                        provider = %self.name,
                        task = %request.task,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Generation call failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(ProviderError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    /// Execute a single request (internal)
    async fn execute_request(
        &self,
        url: &str,
        api_key: &str,
        body: &ChatCompletionRequest,
    ) -> ProviderResult<Generation> {
        debug!(provider = %self.name, model = %body.model, "Calling chat completions");

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            if is_rate_limit_signal(status.as_u16(), &error_body) {
                return Err(ProviderError::RateLimited {
                    provider: self.name.clone(),
                    message: format!("{} {}", status.as_u16(), error_body),
                });
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let completion: ChatCompletionResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::MalformedResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::MalformedResponse {
                message: "Response contained no completion text".to_string(),
            })?;

        Ok(Generation {
            text,
            model: completion.model,
            total_tokens: completion.usage.and_then(|u| u.total_tokens),
        })
    }
}

/// Delay before retry number `retry` (1-based): `base_ms` doubled per
/// earlier retry, saturating at `u64::MAX` milliseconds.
fn backoff_delay(base_ms: u64, retry: u32) -> Duration {
    let factor = 2_u64.saturating_pow(retry.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// HTTP 429, or any error body that mentions a quota or rate limit.
pub(crate) fn is_rate_limit_signal(status: u16, body: &str) -> bool {
    if status == 429 {
        return true;
    }
    let body = body.to_lowercase();
    body.contains("quota") || body.contains("rate limit") || body.contains("rate_limit")
}

/// A chat completion client whose calls rotate through a credential pool
pub struct RotatingGenerator {
    client: ChatCompletionClient,
    pool: CredentialPool<String>,
}

impl RotatingGenerator {
    /// Create a generator for one configured provider
    pub fn new(config: &LlmProviderConfig, request_config: RequestConfig) -> ProviderResult<Self> {
        Ok(Self {
            client: ChatCompletionClient::new(config, request_config)?,
            pool: CredentialPool::new(config.name.clone(), config.api_keys.clone()),
        })
    }

    /// The credential pool backing this generator
    pub fn pool(&self) -> &CredentialPool<String> {
        &self.pool
    }
}

#[async_trait]
impl TextGenerator for RotatingGenerator {
    fn name(&self) -> &str {
        self.client.name()
    }

    async fn generate(&self, request: GenerationRequest) -> ProviderResult<Generation> {
        let client = &self.client;
        let request = &request;
        self.pool
            .call(|api_key| async move { client.complete(&api_key, request).await })
            .await
    }

    fn rotations(&self) -> u64 {
        self.pool.rotations()
    }
}

/// Ordered fallback over several generators.
///
/// Each call starts at the first provider and moves down the list on any
/// error, so an exhausted primary falls through to the secondary's own pool.
pub struct GeneratorChain {
    providers: Vec<Arc<dyn TextGenerator>>,
}

impl GeneratorChain {
    /// Create a chain from providers in priority order
    pub fn new(providers: Vec<Arc<dyn TextGenerator>>) -> Self {
        Self { providers }
    }

    /// Number of providers in the chain
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the chain holds no providers
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl TextGenerator for GeneratorChain {
    fn name(&self) -> &str {
        "generation-chain"
    }

    async fn generate(&self, request: GenerationRequest) -> ProviderResult<Generation> {
        let mut last_error = None;

        for provider in &self.providers {
            match provider.generate(request.clone()).await {
                Ok(generation) => return Ok(generation),
                Err(e) => {
                    warn!(
                        provider = %provider.name(),
                        task = %request.task,
                        error = %e,
                        "Generation provider failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Unavailable {
            message: "No generation providers configured".to_string(),
            retries: 0,
        }))
    }

    fn rotations(&self) -> u64 {
        self.providers.iter().map(|p| p.rotations()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::GenerationTask;

    fn request() -> GenerationRequest {
        GenerationRequest::new(GenerationTask::Plan, "sys", "question")
    }

    #[test]
    fn test_backoff_delay_doubles() {
        assert_eq!(backoff_delay(1000, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1000, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(1000, 4), Duration::from_millis(8000));
    }

    #[test]
    fn test_backoff_delay_saturates() {
        assert_eq!(backoff_delay(1000, 64), Duration::from_millis(u64::MAX));
        assert_eq!(backoff_delay(1000, u32::MAX), Duration::from_millis(u64::MAX));
        assert_eq!(backoff_delay(u64::MAX, 2), Duration::from_millis(u64::MAX));
        assert_eq!(backoff_delay(0, 100), Duration::ZERO);
    }

    #[test]
    fn test_rate_limit_signal_detection() {
        assert!(is_rate_limit_signal(429, ""));
        assert!(is_rate_limit_signal(403, "Quota exceeded for this key"));
        assert!(is_rate_limit_signal(400, "rate limit reached"));
        assert!(!is_rate_limit_signal(500, "internal error"));
        assert!(!is_rate_limit_signal(401, "bad key"));
    }

    #[tokio::test]
    async fn test_chain_falls_back_to_second_provider() {
        let mut primary = MockTextGenerator::new();
        primary.expect_name().return_const("primary".to_string());
        primary.expect_generate().times(1).returning(|_| {
            Err(ProviderError::Exhausted {
                provider: "primary".to_string(),
            })
        });

        let mut secondary = MockTextGenerator::new();
        secondary.expect_name().return_const("secondary".to_string());
        secondary
            .expect_generate()
            .times(1)
            .returning(|_| Ok(Generation::text("from secondary")));

        let chain = GeneratorChain::new(vec![Arc::new(primary), Arc::new(secondary)]);
        let generation = chain.generate(request()).await.unwrap();
        assert_eq!(generation.text, "from secondary");
    }

    #[tokio::test]
    async fn test_chain_stops_at_first_success() {
        let mut primary = MockTextGenerator::new();
        primary
            .expect_generate()
            .times(1)
            .returning(|_| Ok(Generation::text("from primary")));

        let mut secondary = MockTextGenerator::new();
        secondary.expect_generate().never();

        let chain = GeneratorChain::new(vec![Arc::new(primary), Arc::new(secondary)]);
        assert_eq!(chain.generate(request()).await.unwrap().text, "from primary");
    }

    #[tokio::test]
    async fn test_chain_returns_last_error_when_all_fail() {
        let mut primary = MockTextGenerator::new();
        primary.expect_name().return_const("primary".to_string());
        primary.expect_generate().returning(|_| {
            Err(ProviderError::Timeout { timeout_ms: 10 })
        });

        let mut secondary = MockTextGenerator::new();
        secondary.expect_name().return_const("secondary".to_string());
        secondary.expect_generate().returning(|_| {
            Err(ProviderError::Api {
                status: 400,
                message: "bad".to_string(),
            })
        });

        let chain = GeneratorChain::new(vec![Arc::new(primary), Arc::new(secondary)]);
        let err = chain.generate(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_empty_chain_is_unavailable() {
        let chain = GeneratorChain::new(vec![]);
        assert!(chain.is_empty());
        assert!(matches!(
            chain.generate(request()).await,
            Err(ProviderError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_chain_sums_rotations() {
        let mut a = MockTextGenerator::new();
        a.expect_rotations().return_const(2u64);
        let mut b = MockTextGenerator::new();
        b.expect_rotations().return_const(1u64);

        let chain = GeneratorChain::new(vec![Arc::new(a), Arc::new(b)]);
        assert_eq!(chain.rotations(), 3);
    }
}
