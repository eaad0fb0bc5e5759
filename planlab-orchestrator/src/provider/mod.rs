//! LLM Provider abstraction and implementations
//!
//! Every provider classifies its own failures into [`ProviderError`], so the
//! retry loop and callers branch on variants rather than on message text.

mod gemini;
mod ollama;
mod openai;

pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiCompatProvider;

use crate::ProviderConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when interacting with an LLM provider
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("Provider returned an empty response")]
    EmptyResponse,

    #[error("Response does not match the plan schema: {0}")]
    Schema(String),

    #[error("Provider quota or rate limit exceeded: {0}")]
    Quota(String),

    #[error("Provider refused the request on safety grounds: {0}")]
    Safety(String),
}

/// Failure category surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Config,
    Transport,
    EmptyResponse,
    Schema,
    Quota,
    Safety,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Transport => write!(f, "transport"),
            ErrorCategory::EmptyResponse => write!(f, "empty response"),
            ErrorCategory::Schema => write!(f, "schema"),
            ErrorCategory::Quota => write!(f, "quota"),
            ErrorCategory::Safety => write!(f, "safety"),
        }
    }
}

impl ProviderError {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::Config(_) => ErrorCategory::Config,
            ProviderError::Http(_) | ProviderError::Status { .. } | ProviderError::Timeout => {
                ErrorCategory::Transport
            }
            ProviderError::EmptyResponse => ErrorCategory::EmptyResponse,
            ProviderError::Schema(_) => ErrorCategory::Schema,
            ProviderError::Quota(_) => ErrorCategory::Quota,
            ProviderError::Safety(_) => ErrorCategory::Safety,
        }
    }

    /// Whether another attempt may succeed. Only configuration errors are final.
    pub fn is_retryable(&self) -> bool {
        self.category() != ErrorCategory::Config
    }
}

/// Request to send to an LLM
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    /// System prompt
    pub system: String,

    /// User message/prompt
    pub prompt: String,

    /// Temperature (0.0 - 1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// JSON Schema the response must conform to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
}

impl LlmRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature: None,
            max_tokens: None,
            response_schema: None,
        }
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_response_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

/// Response from an LLM
#[derive(Debug, Clone, Deserialize)]
pub struct LlmResponse {
    /// The generated text
    pub content: String,

    /// Token usage statistics
    pub usage: Option<TokenUsage>,

    /// Time taken for generation (ms)
    pub duration_ms: Option<u64>,
}

impl LlmResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
            duration_ms: None,
        }
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name for logging/identification
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;

    /// Send a completion request to the LLM
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError>;
}

/// Build the shared HTTP client used by every provider
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(ProviderError::from)
}

/// Map a transport failure, folding client timeouts into [`ProviderError::Timeout`]
pub(crate) fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Http(err)
    }
}

/// Resolve the API key: explicit value, then the configured env var, then `API_KEY`
pub fn resolve_api_key(config: &ProviderConfig) -> Option<String> {
    let non_blank = |key: &String| !key.trim().is_empty();
    config
        .api_key
        .clone()
        .filter(non_blank)
        .or_else(|| std::env::var(&config.api_key_env).ok().filter(non_blank))
        .or_else(|| std::env::var("API_KEY").ok().filter(non_blank))
}

/// Construct the provider named by `config.provider_type`
///
/// Hosted providers fail fast with [`ProviderError::Config`] when no
/// credential can be resolved.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let require_key = || {
        resolve_api_key(config).ok_or_else(|| {
            ProviderError::Config(format!(
                "{} provider configured but no API key found (set {} or API_KEY)",
                config.provider_type, config.api_key_env
            ))
        })
    };

    let provider: Arc<dyn LlmProvider> = match config.provider_type.to_lowercase().as_str() {
        "gemini" => {
            let mut provider = GeminiProvider::new(require_key()?, timeout)?;
            if !config.model.is_empty() {
                provider = provider.with_model(&config.model);
            }
            if !config.base_url.is_empty() {
                provider = provider.with_base_url(&config.base_url);
            }
            Arc::new(provider)
        }
        kind @ ("openai" | "deepseek" | "litellm") => {
            let base_url = match (config.base_url.is_empty(), kind) {
                (false, _) => config.base_url.clone(),
                (true, "deepseek") => "https://api.deepseek.com".to_string(),
                (true, "litellm") => "http://localhost:4000".to_string(),
                (true, _) => "https://api.openai.com/v1".to_string(),
            };
            let model = match (config.model.is_empty(), kind) {
                (false, _) => config.model.clone(),
                (true, "deepseek") => "deepseek-chat".to_string(),
                (true, _) => "gpt-4o-mini".to_string(),
            };
            Arc::new(
                OpenAiCompatProvider::new(base_url, require_key()?, model, timeout)?
                    .with_name(kind),
            )
        }
        "ollama" => {
            let base_url = if config.base_url.is_empty() {
                "http://localhost:11434"
            } else {
                config.base_url.as_str()
            };
            let model = if config.model.is_empty() {
                "llama3.2:3b"
            } else {
                config.model.as_str()
            };
            Arc::new(OllamaProvider::new(base_url, model, timeout)?)
        }
        other => {
            return Err(ProviderError::Config(format!(
                "Unknown provider type: {}",
                other
            )));
        }
    };

    Ok(provider)
}
