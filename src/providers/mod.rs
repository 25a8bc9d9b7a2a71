//! External capability providers.
//!
//! - [`generation`]: OpenAI-compatible chat completion clients, each wrapped by
//!   its own credential pool, and the primary → secondary fallback chain.
//! - [`search`]: Google Custom Search and Tavily clients and their chain.
//! - [`types`]: provider-independent request/response types and wire formats.

pub mod generation;
pub mod search;
pub mod types;

pub use generation::{
    ChatCompletionClient, GeneratorChain, RotatingGenerator, TextGenerator,
};
pub use search::{
    GoogleCredential, GoogleSearchClient, SearchChain, SearchProvider, TavilySearchClient,
};
pub use types::{Generation, GenerationRequest, GenerationTask, ResponseFormat, SearchHit};

use std::sync::Arc;

use crate::config::Config;
use crate::error::ProviderResult;

/// Build the generation chain from configured providers, in priority order
pub fn build_generator(config: &Config) -> ProviderResult<GeneratorChain> {
    let providers = config
        .providers
        .generation
        .iter()
        .map(|provider| {
            RotatingGenerator::new(provider, config.request.clone())
                .map(|g| Arc::new(g) as Arc<dyn TextGenerator>)
        })
        .collect::<ProviderResult<Vec<_>>>()?;

    Ok(GeneratorChain::new(providers))
}

/// Build the search chain: Google first when configured, then Tavily
pub fn build_search(config: &Config) -> ProviderResult<SearchChain> {
    let mut providers: Vec<Arc<dyn SearchProvider>> = Vec::new();

    if let Some(google) = &config.providers.google {
        providers.push(Arc::new(GoogleSearchClient::new(google, &config.request)?));
    }
    if let Some(tavily) = &config.providers.tavily {
        providers.push(Arc::new(TavilySearchClient::new(tavily, &config.request)?));
    }

    if providers.is_empty() {
        tracing::warn!("No search providers configured, searches will return no results");
    }

    Ok(SearchChain::new(providers))
}
