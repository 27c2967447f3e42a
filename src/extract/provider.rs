use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChatMessage, CompletionRequest, LlmProvider};
use crate::core::config::ExtractorConfig;
use crate::core::error::ProviderError;

/// Chat-completions client for OpenAI-compatible endpoints (Perplexity, OpenAI, local gateways).
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Value,
}

impl OpenAiCompatibleProvider {
    pub fn new(client: Client, base_url: &str, api_key: &str, model: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(anyhow!("LLM API key is required"));
        }
        let parsed = url::Url::parse(base_url)
            .with_context(|| format!("Invalid LLM base URL: {}", base_url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("LLM base URL must be http(s): {}", base_url));
        }
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.llm_timeout)
            .build()
            .context("Failed to create LLM HTTP client")?;
        Self::new(
            client,
            &config.llm_base_url,
            &config.llm_api_key,
            &config.llm_model,
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Message content is either a plain string or a list of typed parts.
fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => Some(
            parts
                .iter()
                .filter_map(|part| match part {
                    Value::String(text) => Some(text.as_str()),
                    Value::Object(map) => map.get("text").and_then(Value::as_str),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        ),
        _ => None,
    }
}

fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let message = format!("LLM API error ({}): {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::Transient(message)
    } else {
        ProviderError::Rejected(message)
    }
}

fn classify_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ProviderError::Transient(format!("LLM request failed: {}", err))
    } else {
        ProviderError::Rejected(format!("LLM request failed: {}", err))
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify_status(status, &error_text));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Transient(format!("LLM response timed out: {}", e))
            } else {
                ProviderError::Rejected(format!("Failed to parse LLM response: {}", e))
            }
        })?;

        let content = parsed
            .choices
            .first()
            .and_then(|choice| content_text(&choice.message.content))
            .ok_or_else(|| ProviderError::Rejected("LLM response has no message content".to_string()))?;
        log::trace!("LLM reply: {}", content);
        Ok(content)
    }
}
