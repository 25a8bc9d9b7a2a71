use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::types::{
    GoogleSearchResponse, SearchHit, TavilySearchRequest, TavilySearchResponse,
};
use crate::config::{GoogleSearchConfig, RequestConfig, TavilyConfig};
use crate::error::{ProviderError, ProviderResult};
use crate::rotation::CredentialPool;

/// Web search capability: query in, ordered `{title, url}` hits out.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Search for `query`, returning at most `max_results` hits.
    async fn search(&self, query: &str, max_results: usize) -> ProviderResult<Vec<SearchHit>>;

    /// Credential rotations performed so far.
    fn rotations(&self) -> u64;
}

/// An API key paired with its programmable search engine id
#[derive(Debug, Clone)]
pub struct GoogleCredential {
    pub api_key: String,
    pub engine_id: String,
}

/// Google Custom Search client with key rotation
pub struct GoogleSearchClient {
    client: Client,
    base_url: String,
    pool: CredentialPool<GoogleCredential>,
}

impl GoogleSearchClient {
    /// Max results the API returns per request.
    const MAX_PAGE_SIZE: usize = 10;

    /// Create a new Google search client
    pub fn new(config: &GoogleSearchConfig, request_config: &RequestConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(ProviderError::Http)?;

        let credentials = config
            .api_keys
            .iter()
            .zip(config.engine_ids.iter())
            .map(|(api_key, engine_id)| GoogleCredential {
                api_key: api_key.clone(),
                engine_id: engine_id.clone(),
            })
            .collect();

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            pool: CredentialPool::new("google", credentials),
        })
    }

    /// The credential pool backing this client
    pub fn pool(&self) -> &CredentialPool<GoogleCredential> {
        &self.pool
    }

    async fn search_with(
        &self,
        credential: &GoogleCredential,
        query: &str,
        max_results: usize,
    ) -> ProviderResult<Vec<SearchHit>> {
        let num = max_results.clamp(1, Self::MAX_PAGE_SIZE).to_string();

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("key", credential.api_key.as_str()),
                ("cx", credential.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            // Google reports daily quota exhaustion as 403
            if status.as_u16() == 403 || status.as_u16() == 429 {
                return Err(ProviderError::RateLimited {
                    provider: "google".to_string(),
                    message: format!("{} {}", status.as_u16(), error_body),
                });
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let body: GoogleSearchResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::MalformedResponse {
                    message: format!("Failed to parse search response: {}", e),
                })?;

        Ok(body
            .items
            .into_iter()
            .take(max_results)
            .map(|item| SearchHit::new(item.title, item.link))
            .collect())
    }
}

#[async_trait]
impl SearchProvider for GoogleSearchClient {
    fn name(&self) -> &str {
        "google"
    }

    async fn search(&self, query: &str, max_results: usize) -> ProviderResult<Vec<SearchHit>> {
        debug!(query = %query, "Google search");
        self.pool
            .call(|credential| async move {
                self.search_with(&credential, query, max_results).await
            })
            .await
    }

    fn rotations(&self) -> u64 {
        self.pool.rotations()
    }
}

/// Tavily search client (single key)
pub struct TavilySearchClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl TavilySearchClient {
    /// Create a new Tavily search client
    pub fn new(config: &TavilyConfig, request_config: &RequestConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(ProviderError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl SearchProvider for TavilySearchClient {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str, max_results: usize) -> ProviderResult<Vec<SearchHit>> {
        debug!(query = %query, "Tavily search");

        let request = TavilySearchRequest {
            query: query.to_string(),
            search_depth: "basic".to_string(),
            max_results,
            include_images: false,
        };

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || status.as_u16() == 432 {
                return Err(ProviderError::RateLimited {
                    provider: "tavily".to_string(),
                    message: format!("{} {}", status.as_u16(), error_body),
                });
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let body: TavilySearchResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::MalformedResponse {
                    message: format!("Failed to parse search response: {}", e),
                })?;

        Ok(body
            .results
            .into_iter()
            .take(max_results)
            .map(|r| SearchHit::new(r.title, r.url))
            .collect())
    }

    fn rotations(&self) -> u64 {
        0
    }
}

/// Ordered fallback over search providers.
///
/// Rate-limit and exhaustion signals move the chain to the next provider for
/// the rest of the run. Other errors fall through to the next provider for this
/// call only. When nothing is left the chain returns no hits.
pub struct SearchChain {
    providers: Vec<Arc<dyn SearchProvider>>,
    active: AtomicUsize,
}

impl SearchChain {
    /// Create a chain from providers in priority order
    pub fn new(providers: Vec<Arc<dyn SearchProvider>>) -> Self {
        Self {
            providers,
            active: AtomicUsize::new(0),
        }
    }

    /// Index of the provider new searches start from
    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for SearchChain {
    fn name(&self) -> &str {
        "search-chain"
    }

    async fn search(&self, query: &str, max_results: usize) -> ProviderResult<Vec<SearchHit>> {
        let start = self.active.load(Ordering::SeqCst);

        for (index, provider) in self.providers.iter().enumerate().skip(start) {
            match provider.search(query, max_results).await {
                Ok(hits) => return Ok(hits),
                Err(e) if e.is_rate_limit() || e.is_exhausted() => {
                    let previous = self.active.fetch_max(index + 1, Ordering::SeqCst);
                    if previous <= index {
                        info!(
                            provider = %provider.name(),
                            error = %e,
                            "Search provider exhausted, switching to fallback"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        provider = %provider.name(),
                        query = %query,
                        error = %e,
                        "Search failed, trying next provider"
                    );
                }
            }
        }

        warn!(query = %query, "All search providers failed or exhausted");
        Ok(Vec::new())
    }

    fn rotations(&self) -> u64 {
        self.providers.iter().map(|p| p.rotations()).sum()
    }
}
