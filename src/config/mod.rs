use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub providers: ProvidersConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub research: ResearchConfig,
}

/// External provider configuration.
///
/// Generation providers are tried in order; each one owns its own credential set.
#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    pub generation: Vec<LlmProviderConfig>,
    pub google: Option<GoogleSearchConfig>,
    pub tavily: Option<TavilyConfig>,
}

/// An OpenAI-compatible chat completion endpoint with a set of API keys
#[derive(Debug, Clone)]
pub struct LlmProviderConfig {
    pub name: String,
    pub base_url: String,
    pub model: String,
    pub api_keys: Vec<String>,
}

/// Google Custom Search configuration, keys paired with engine ids by position
#[derive(Debug, Clone)]
pub struct GoogleSearchConfig {
    pub base_url: String,
    pub api_keys: Vec<String>,
    pub engine_ids: Vec<String>,
}

/// Tavily search configuration
#[derive(Debug, Clone)]
pub struct TavilyConfig {
    pub base_url: String,
    pub api_key: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Limits and thresholds for the research pipeline
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    /// Hard cap on quality-convergence iterations per step.
    pub max_iterations_per_step: u32,
    /// Queries executed per iteration.
    pub max_queries_per_step: usize,
    /// Parallel queries within one iteration.
    pub max_concurrent_queries: usize,
    /// Search results processed per query.
    pub results_per_query: usize,
    /// Search results requested per query.
    pub search_results_requested: usize,
    pub quality_threshold: f64,
    /// Minimum score gain between iterations before the loop gives up.
    pub min_improvement: f64,
    pub html_timeout: Duration,
    pub pdf_timeout: Duration,
    pub cache_enabled: bool,
    pub cache_ttl_hours: i64,
    pub checkpoint_name: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let mut generation = Vec::new();

        let primary_keys = parse_list(env::var("PRIMARY_LLM_KEYS").ok());
        if !primary_keys.is_empty() {
            generation.push(LlmProviderConfig {
                name: "primary".to_string(),
                base_url: env::var("PRIMARY_LLM_BASE_URL")
                    .unwrap_or_else(|_| "https://models.github.ai/inference".to_string()),
                model: env::var("PRIMARY_LLM_MODEL").unwrap_or_else(|_| "openai/gpt-4o".to_string()),
                api_keys: primary_keys,
            });
        }

        let secondary_keys = parse_list(env::var("SECONDARY_LLM_KEYS").ok());
        if !secondary_keys.is_empty() {
            generation.push(LlmProviderConfig {
                name: "secondary".to_string(),
                base_url: env::var("SECONDARY_LLM_BASE_URL").unwrap_or_else(|_| {
                    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
                }),
                model: env::var("SECONDARY_LLM_MODEL")
                    .unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
                api_keys: secondary_keys,
            });
        }

        if generation.is_empty() {
            return Err(AppError::Config {
                message: "PRIMARY_LLM_KEYS or SECONDARY_LLM_KEYS is required".to_string(),
            });
        }

        let google_keys = parse_list(env::var("GOOGLE_SEARCH_KEYS").ok());
        let google_engines = parse_list(env::var("GOOGLE_SEARCH_ENGINE_IDS").ok());
        let google = if google_keys.is_empty() {
            None
        } else {
            if google_keys.len() != google_engines.len() {
                return Err(AppError::Config {
                    message: format!(
                        "GOOGLE_SEARCH_KEYS has {} entries but GOOGLE_SEARCH_ENGINE_IDS has {}",
                        google_keys.len(),
                        google_engines.len()
                    ),
                });
            }
            Some(GoogleSearchConfig {
                base_url: env::var("GOOGLE_SEARCH_BASE_URL")
                    .unwrap_or_else(|_| "https://www.googleapis.com/customsearch/v1".to_string()),
                api_keys: google_keys,
                engine_ids: google_engines,
            })
        };

        let tavily = env::var("TAVILY_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(|api_key| TavilyConfig {
                base_url: env::var("TAVILY_BASE_URL")
                    .unwrap_or_else(|_| "https://api.tavily.com".to_string()),
                api_key,
            });

        let providers = ProvidersConfig {
            generation,
            google,
            tavily,
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/research.db".to_string()),
            ),
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_or("REQUEST_TIMEOUT_MS", 60000),
            max_retries: parse_or("MAX_RETRIES", 3),
            retry_delay_ms: parse_or("RETRY_DELAY_MS", 1000),
        };

        let defaults = ResearchConfig::default();
        let research = ResearchConfig {
            max_iterations_per_step: parse_or(
                "MAX_ITERATIONS_PER_STEP",
                defaults.max_iterations_per_step,
            ),
            max_queries_per_step: parse_or("MAX_QUERIES_PER_STEP", defaults.max_queries_per_step),
            quality_threshold: parse_or("QUALITY_THRESHOLD", defaults.quality_threshold),
            min_improvement: parse_or("MIN_IMPROVEMENT", defaults.min_improvement),
            html_timeout: Duration::from_secs(parse_or("HTML_TIMEOUT_SECS", 7)),
            pdf_timeout: Duration::from_secs(parse_or("PDF_TIMEOUT_SECS", 20)),
            cache_enabled: parse_or("CACHE_ENABLED", defaults.cache_enabled),
            cache_ttl_hours: parse_or("CACHE_TTL_HOURS", defaults.cache_ttl_hours),
            checkpoint_name: env::var("CHECKPOINT_NAME").unwrap_or(defaults.checkpoint_name),
            ..ResearchConfig::default()
        };

        Ok(Config {
            providers,
            database,
            logging,
            request,
            research,
        })
    }
}

/// Split a comma-separated variable into trimmed, non-empty entries
fn parse_list(value: Option<String>) -> Vec<String> {
    value
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_iterations_per_step: 3,
            max_queries_per_step: 5,
            max_concurrent_queries: 3,
            results_per_query: 3,
            search_results_requested: 5,
            quality_threshold: 0.7,
            min_improvement: 0.05,
            html_timeout: Duration::from_secs(7),
            pdf_timeout: Duration::from_secs(20),
            cache_enabled: true,
            cache_ttl_hours: 24,
            checkpoint_name: "research_checkpoint".to_string(),
        }
    }
}
