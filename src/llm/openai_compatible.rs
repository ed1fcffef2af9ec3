// ABOUTME: OpenAI-compatible LLM provider for local and hosted endpoints
// ABOUTME: Covers Ollama, vLLM and any /v1/chat/completions-speaking backend
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! # OpenAI-Compatible Provider
//!
//! Generic implementation for any endpoint speaking the OpenAI chat
//! completions wire format. Agents reach local model servers (Ollama, vLLM)
//! and hosted gateways through this one client.
//!
//! Transient failures (connection errors, 5xx, 429) are retried with
//! bounded exponential backoff; 4xx responses are permanent.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::sse_parser::{
    frame_sse_stream, is_retryable_request_error, is_retryable_status, RetryConfig,
};
use super::{
    ChatMessage, CompletionRequest, CompletionResponse, CompletionStream, LlmCapabilities,
    LlmProvider, StreamChunk, TokenUsage,
};
use crate::errors::{AppError, ErrorCode};

/// Environment variable for the default LLM base URL
const BASE_URL_ENV: &str = "SIAMGATE_LLM_BASE_URL";
/// Environment variable for the default model
const MODEL_ENV: &str = "SIAMGATE_LLM_MODEL";
/// Environment variable for the API key (optional for local servers)
const API_KEY_ENV: &str = "SIAMGATE_LLM_API_KEY";

/// Default base URL (local Ollama)
const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";
/// Default model for local inference
const DEFAULT_MODEL: &str = "qwen2.5:14b-instruct";

/// Connection timeout
const CONNECT_TIMEOUT_SECS: u64 = 5;
/// Overall request timeout (local inference can be slow)
const REQUEST_TIMEOUT_SECS: u64 = 120;

// ============================================================================
// Wire types (OpenAI-compatible format)
// ============================================================================

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().to_owned(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireStreamChunk {
    choices: Vec<WireStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireErrorResponse {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    message: String,
}

// ============================================================================
// Provider configuration
// ============================================================================

/// Configuration for the OpenAI-compatible provider
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    /// Base URL for the API (e.g. <http://localhost:11434/v1>)
    pub base_url: String,
    /// API key (optional for local servers)
    pub api_key: Option<String>,
    /// Default model to use
    pub default_model: String,
    /// Retry behavior for transient failures
    pub retry: RetryConfig,
}

impl OpenAiCompatibleConfig {
    /// Configuration from process environment with local-server defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            base_url: env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned()),
            api_key: env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()),
            default_model: env::var(MODEL_ENV).unwrap_or_else(|_| DEFAULT_MODEL.to_owned()),
            retry: RetryConfig::default_config(),
        }
    }
}

/// OpenAI-compatible LLM provider
pub struct OpenAiCompatibleProvider {
    config: OpenAiCompatibleConfig,
    client: Client,
}

impl OpenAiCompatibleProvider {
    /// Create a provider with the given configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Create a provider from environment configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_env() -> Result<Self, AppError> {
        Self::new(OpenAiCompatibleConfig::from_env())
    }

    fn build_wire_request(&self, request: &CompletionRequest, stream: bool) -> WireRequest {
        WireRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.config.default_model.clone()),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: stream.then_some(true),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn send_with_retry(
        &self,
        wire: &WireRequest,
    ) -> Result<reqwest::Response, AppError> {
        let mut attempt = 0;
        loop {
            let mut builder = self.client.post(self.endpoint()).json(wire);
            if let Some(key) = &self.config.api_key {
                builder = builder.bearer_auth(key);
            }

            match builder.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    let detail = serde_json::from_str::<WireErrorResponse>(&body)
                        .map_or(body, |parsed| parsed.error.message);

                    if is_retryable_status(status) && attempt < self.config.retry.max_retries {
                        let delay = self.config.retry.delay_for_attempt(attempt);
                        warn!(
                            "LLM endpoint returned {status}, retry {}/{} in {delay:?}",
                            attempt + 1,
                            self.config.retry.max_retries
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    let code = if (400..500).contains(&status) {
                        ErrorCode::BadRequest
                    } else {
                        ErrorCode::ProviderUnavailable
                    };
                    return Err(AppError::new(
                        code,
                        format!("LLM endpoint returned {status}: {detail}"),
                    ));
                }
                Err(e) => {
                    if is_retryable_request_error(&e) && attempt < self.config.retry.max_retries {
                        let delay = self.config.retry.delay_for_attempt(attempt);
                        warn!(
                            "LLM request failed ({e}), retry {}/{} in {delay:?}",
                            attempt + 1,
                            self.config.retry.max_retries
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(AppError::provider(format!("LLM request failed: {e}")));
                }
            }
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    fn capabilities(&self) -> LlmCapabilities {
        LlmCapabilities::STREAMING | LlmCapabilities::JSON_MODE | LlmCapabilities::SYSTEM_MESSAGES
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, AppError> {
        let wire = self.build_wire_request(request, false);
        debug!("LLM completion: model={}", wire.model);

        let response = self.send_with_retry(&wire).await?;
        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| AppError::provider(format!("malformed LLM response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::provider("LLM response contained no choices"))?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            model: parsed.model.unwrap_or(wire.model),
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, AppError> {
        let wire = self.build_wire_request(request, true);
        debug!("LLM streaming completion: model={}", wire.model);

        let response = self.send_with_retry(&wire).await?;
        let byte_stream = response.bytes_stream();

        Ok(frame_sse_stream(
            byte_stream,
            |json| match serde_json::from_str::<WireStreamChunk>(json) {
                Ok(chunk) => {
                    let choice = chunk.choices.into_iter().next()?;
                    Some(Ok(StreamChunk {
                        delta: choice.delta.content.unwrap_or_default(),
                        is_final: choice.finish_reason.is_some(),
                        finish_reason: choice.finish_reason,
                    }))
                }
                Err(e) => Some(Err(AppError::provider(format!(
                    "malformed stream chunk: {e}"
                )))),
            },
            "openai-compatible",
        ))
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        let url = format!("{}/models", self.config.base_url.trim_end_matches('/'));
        let mut builder = self.client.get(url).timeout(Duration::from_secs(5));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        match builder.send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => Err(AppError::provider(format!("health check failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_request_uses_default_model_when_unset() {
        let provider = OpenAiCompatibleProvider::new(OpenAiCompatibleConfig {
            base_url: "http://localhost:11434/v1".to_owned(),
            api_key: None,
            default_model: "test-model".to_owned(),
            retry: RetryConfig::default_config(),
        })
        .unwrap();

        let request = CompletionRequest::new(vec![ChatMessage::user("hi")]);
        let wire = provider.build_wire_request(&request, false);
        assert_eq!(wire.model, "test-model");
        assert_eq!(wire.stream, None);

        let wire = provider.build_wire_request(&request.with_model("other"), true);
        assert_eq!(wire.model, "other");
        assert_eq!(wire.stream, Some(true));
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let provider = OpenAiCompatibleProvider::new(OpenAiCompatibleConfig {
            base_url: "http://host/v1/".to_owned(),
            api_key: None,
            default_model: "m".to_owned(),
            retry: RetryConfig::default_config(),
        })
        .unwrap();
        assert_eq!(provider.endpoint(), "http://host/v1/chat/completions");
    }
}
