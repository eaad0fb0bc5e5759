//! OpenAI-compatible chat completions provider
//!
//! Covers OpenAI, DeepSeek and a LiteLLM proxy. Structured output is requested
//! with `response_format: {"type": "json_schema", ...}` in strict mode.

use super::{
    http_client, transport_error, LlmProvider, LlmRequest, LlmResponse, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

/// OpenAI-compatible provider
pub struct OpenAiCompatProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    name: String,
}

impl OpenAiCompatProvider {
    /// Create a provider for the API rooted at `base_url`
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client: http_client(timeout)?,
            base_url,
            api_key: api_key.into(),
            model: model.into(),
            name: "openai".to_string(),
        })
    }

    /// Create with a custom name (e.g. "deepseek", "litellm")
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<Value>,
}

fn build_request(model: &str, request: &LlmRequest) -> ChatRequest {
    let messages = vec![
        ChatMessage {
            role: "system".to_string(),
            content: request.system.clone(),
        },
        ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        },
    ];

    let response_format = request.response_schema.as_ref().map(|schema| {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": "structured_output",
                "strict": true,
                "schema": schema,
            }
        })
    });

    ChatRequest {
        model: model.to_string(),
        messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        response_format,
        stream: false,
    }
}

fn classify_error(status: u16, body: &str) -> ProviderError {
    let (message, code) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let code = envelope
                .error
                .code
                .as_ref()
                .and_then(Value::as_str)
                .map(str::to_string);
            (envelope.error.message, code)
        }
        Err(_) => (body.to_string(), None),
    };

    match (status, code.as_deref()) {
        (429, _) | (_, Some("insufficient_quota")) => ProviderError::Quota(message),
        (_, Some("content_policy_violation")) => ProviderError::Safety(message),
        _ => ProviderError::Status { status, message },
    }
}

fn parse_response(body: &str) -> Result<(String, Option<TokenUsage>), ProviderError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Schema(format!("malformed chat completion body: {}", e)))?;

    let usage = response.usage.map(|u| TokenUsage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(ProviderError::EmptyResponse)?;

    if let Some(refusal) = choice.message.refusal {
        return Err(ProviderError::Safety(refusal));
    }
    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(ProviderError::Safety("content filtered".to_string()));
    }

    match choice.message.content {
        Some(content) if !content.trim().is_empty() => Ok((content, usage)),
        _ => Err(ProviderError::EmptyResponse),
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let chat_request = build_request(&self.model, request);

        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&chat_request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &text));
        }

        let (content, usage) = parse_response(&text)?;
        let duration_ms = start.elapsed().as_millis() as u64;

        Ok(LlmResponse {
            content,
            usage,
            duration_ms: Some(duration_ms),
        })
    }
}
