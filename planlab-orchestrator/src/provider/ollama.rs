//! Ollama LLM provider implementation
//!
//! Structured output is requested by passing the JSON Schema as `format`.

use super::{
    http_client, transport_error, LlmProvider, LlmRequest, LlmResponse, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Ollama provider for local or remote Ollama servers
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    name: String,
}

impl OllamaProvider {
    /// Create a new Ollama provider
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let model = model.into();
        let name = format!("ollama:{}", model);

        Ok(Self {
            client: http_client(timeout)?,
            base_url,
            model,
            name,
        })
    }
}

/// Ollama API request format
#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    system: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// Ollama API response format
#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    total_duration: Option<u64>,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        let url = format!("{}/api/generate", self.base_url);

        let ollama_request = OllamaRequest {
            model: self.model.clone(),
            prompt: request.prompt.clone(),
            system: request.system.clone(),
            stream: false,
            format: request.response_schema.clone(),
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .json(&ollama_request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, message });
        }

        let ollama_response: OllamaResponse = response.json().await.map_err(transport_error)?;

        if ollama_response.response.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        // Use Ollama's reported duration (nanoseconds) or fall back to our measurement
        let duration_ms = ollama_response
            .total_duration
            .map(|ns| ns / 1_000_000)
            .unwrap_or_else(|| start.elapsed().as_millis() as u64);

        let usage = match (ollama_response.prompt_eval_count, ollama_response.eval_count) {
            (Some(prompt), Some(completion)) => Some(TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }),
            _ => None,
        };

        Ok(LlmResponse {
            content: ollama_response.response,
            usage,
            duration_ms: Some(duration_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_creation() {
        let provider = OllamaProvider::new(
            "http://localhost:11434/",
            "qwen2.5-coder:14b",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(provider.model(), "qwen2.5-coder:14b");
        assert!(provider.name().contains("ollama"));
        assert_eq!(provider.base_url, "http://localhost:11434");
    }
}
