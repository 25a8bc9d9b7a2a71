use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, ProviderResult};

/// What a generation call is for. Used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTask {
    Plan,
    RefinePlan,
    Extract,
    Evaluate,
    RefineQueries,
    Sufficiency,
    Report,
}

impl GenerationTask {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationTask::Plan => "plan",
            GenerationTask::RefinePlan => "refine_plan",
            GenerationTask::Extract => "extract",
            GenerationTask::Evaluate => "evaluate",
            GenerationTask::RefineQueries => "refine_queries",
            GenerationTask::Sufficiency => "sufficiency",
            GenerationTask::Report => "report",
        }
    }
}

impl std::fmt::Display for GenerationTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Expected shape of the completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// A provider-independent generation request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub task: GenerationTask,
    pub system_instruction: String,
    pub prompt: String,
    pub response_format: ResponseFormat,
    pub temperature: f32,
}

impl GenerationRequest {
    /// Create a plain-text request
    pub fn new(
        task: GenerationTask,
        system_instruction: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            task,
            system_instruction: system_instruction.into(),
            prompt: prompt.into(),
            response_format: ResponseFormat::Text,
            temperature: 0.5,
        }
    }

    /// Request a JSON object response
    pub fn json(mut self) -> Self {
        self.response_format = ResponseFormat::Json;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Completion text plus whatever usage data the provider reported
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub text: String,
    pub model: Option<String>,
    pub total_tokens: Option<u32>,
}

impl Generation {
    /// Create a generation from bare text
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
            total_tokens: None,
        }
    }

    /// Parse the completion as JSON, tolerating a surrounding markdown fence.
    pub fn parse_json<T: DeserializeOwned>(&self) -> ProviderResult<T> {
        let body = strip_code_fence(&self.text);
        serde_json::from_str(body).map_err(|e| ProviderError::MalformedResponse {
            message: format!("Failed to parse structured response: {}", e),
        })
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// One web search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
}

impl SearchHit {
    /// Create a search hit
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

// ============================================================================
// Wire types: OpenAI-compatible chat completions
// ============================================================================

/// Message in a chat completion conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Request body for `/chat/completions`
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormatSpec>,
}

/// `response_format` object
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormatSpec {
    #[serde(rename = "type")]
    pub format_type: String,
}

impl ChatCompletionRequest {
    /// Build the wire request for a generation request
    pub fn from_request(model: &str, request: &GenerationRequest) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![
                Message::system(&request.system_instruction),
                Message::user(&request.prompt),
            ],
            temperature: request.temperature,
            response_format: match request.response_format {
                ResponseFormat::Json => Some(ResponseFormatSpec {
                    format_type: "json_object".to_string(),
                }),
                ResponseFormat::Text => None,
            },
        }
    }
}

/// Response body for `/chat/completions`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

/// One completion choice
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

/// Assistant message inside a choice
#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    pub content: Option<String>,
}

/// Token usage information
#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ============================================================================
// Wire types: search providers
// ============================================================================

/// Google Custom Search response
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleSearchResponse {
    #[serde(default)]
    pub items: Vec<GoogleSearchItem>,
}

/// One Google Custom Search item
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleSearchItem {
    #[serde(default)]
    pub title: String,
    pub link: String,
}

/// Tavily search request body
#[derive(Debug, Clone, Serialize)]
pub struct TavilySearchRequest {
    pub query: String,
    pub search_depth: String,
    pub max_results: usize,
    pub include_images: bool,
}

/// Tavily search response
#[derive(Debug, Clone, Deserialize)]
pub struct TavilySearchResponse {
    #[serde(default)]
    pub results: Vec<TavilyResult>,
}

/// One Tavily result
#[derive(Debug, Clone, Deserialize)]
pub struct TavilyResult {
    #[serde(default)]
    pub title: String,
    pub url: String,
}
