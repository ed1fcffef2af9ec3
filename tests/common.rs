// ABOUTME: Shared helpers for gateway integration tests
// ABOUTME: Builds registries, scripted LLM providers and an in-memory router
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use tokio::sync::Mutex;
use tower::ServiceExt;

use siamgate::config::ServerConfig;
use siamgate::dispatch::Dispatcher;
use siamgate::errors::AppError;
use siamgate::http::{router, AppState};
use siamgate::llm::{
    CompletionRequest, CompletionResponse, CompletionStream, LlmCapabilities, LlmProvider,
    StreamChunk, TokenUsage,
};
use siamgate::metrics::Metrics;
use siamgate::tenant::TenantRegistry;

/// Two tenants: `company-a` (Thai) with a knowledge base, `company-b`
/// (English) without one. Database hosts point at a closed local port so
/// the SQL agent fails fast instead of hanging.
pub const TEST_CONFIG: &str = r#"
default_tenant: company-a
tenants:
  company-a:
    name: Company A
    description: Bangkok head office
    model: llama3.1:8b
    database:
      host: 127.0.0.1
      port: 1
      database: tenant_a
      user: gateway
      password: secret-a
    knowledge_base:
      id: KB-A
      prefix: company-a
      search_type: SEMANTIC
      max_results: 5
    settings:
      max_tokens: 512
      response_language: th
    contact_info:
      email: info@company-a.example
  company-b:
    name: Company B
    description: Regional office
    model: gemma2:9b
    database:
      host: 127.0.0.1
      port: 1
      database: tenant_b
      user: gateway
      password: secret-b
    settings:
      max_tokens: 256
      response_language: en
global_settings:
  retry_count: 3
  timeout_seconds: 20
  security:
    require_tenant_header: false
    default_tenant_on_missing: true
    tenant_header_name: X-Tenant-ID
  logging:
    level: info
    log_queries: false
"#;

/// Deterministic LLM provider for tests: pops scripted replies in order and
/// repeats the last one when the script runs dry.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    last: String,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<&str>) -> Self {
        let last = replies.last().map_or_else(String::new, |r| (*r).to_owned());
        Self {
            replies: Mutex::new(replies.into_iter().map(ToOwned::to_owned).collect()),
            last,
        }
    }

    pub fn fixed(reply: &str) -> Self {
        Self::new(vec![reply])
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn capabilities(&self) -> LlmCapabilities {
        LlmCapabilities::text_only()
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, AppError> {
        let content = self
            .replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.last.clone());
        let prompt: String = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(CompletionResponse {
            usage: Some(TokenUsage::estimate(&prompt, &content)),
            content,
            model: "scripted-model".to_owned(),
            finish_reason: Some("stop".to_owned()),
        })
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, AppError> {
        let response = self.complete(request).await?;
        let chunks = vec![
            Ok(StreamChunk {
                delta: response.content,
                is_final: false,
                finish_reason: None,
            }),
            Ok(StreamChunk {
                delta: String::new(),
                is_final: true,
                finish_reason: Some("stop".to_owned()),
            }),
        ];
        Ok(Box::pin(tokio_stream::iter(chunks)))
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        Ok(true)
    }
}

/// Server config tuned for tests: short keep-alive, admin token set.
pub fn test_server_config() -> ServerConfig {
    ServerConfig {
        keep_alive_secs: 1,
        admin_token: Some("test-admin".to_owned()),
        ..ServerConfig::default()
    }
}

/// Build a router whose dispatcher talks to a scripted provider.
pub fn scripted_router(replies: Vec<&'static str>) -> Router {
    scripted_router_with_config(replies, test_server_config(), TEST_CONFIG)
}

/// Build a router with explicit server and tenant configuration.
pub fn scripted_router_with_config(
    replies: Vec<&'static str>,
    server: ServerConfig,
    tenant_yaml: &str,
) -> Router {
    let registry = Arc::new(TenantRegistry::load_str(tenant_yaml).unwrap());
    let config = Arc::new(server);
    let metrics = Arc::new(Metrics::new());

    let replies: Vec<String> = replies.into_iter().map(ToOwned::to_owned).collect();
    let dispatcher = Dispatcher::new(Arc::clone(&config), metrics).with_provider_factory(
        Arc::new(move |_tenant, _server, _retries| {
            let script: Vec<&str> = replies.iter().map(String::as_str).collect();
            let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new(script));
            Ok(provider)
        }),
    );

    let state = Arc::new(AppState::new(
        registry,
        Arc::new(dispatcher),
        Arc::clone(&config),
    ));
    router(state)
}

/// Fire one JSON request at the router and return status plus parsed body.
pub async fn send_json(
    app: Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }

    let request = builder
        .body(Body::from(
            body.map(|b| b.to_string()).unwrap_or_default(),
        ))
        .expect("request builds");

    let response = app.oneshot(request).await.expect("request executes");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, value)
}

/// Fire one request and return the raw body text (for SSE streams).
pub async fn send_raw(
    app: Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<serde_json::Value>,
) -> (StatusCode, String) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }

    let request = builder
        .body(Body::from(
            body.map(|b| b.to_string()).unwrap_or_default(),
        ))
        .expect("request builds");

    let response = app.oneshot(request).await.expect("request executes");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

/// Concatenate `delta.content` across the chunks of an SSE body.
pub fn concat_sse_deltas(sse_body: &str) -> String {
    let mut content = String::new();
    for line in sse_body.lines() {
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        if data.trim() == "[DONE]" {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
            continue;
        };
        if let Some(delta) = value["choices"][0]["delta"]["content"].as_str() {
            content.push_str(delta);
        }
    }
    content
}
