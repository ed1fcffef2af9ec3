// ABOUTME: OpenAI-compatible chat completions endpoint with SSE streaming
// ABOUTME: Extracts tenant identity, dispatches, and shapes the wire envelope
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! # Chat Completions
//!
//! Requests are decoded permissively (extra fields ignored, most fields
//! optional); responses are encoded strictly. Tenant extraction order:
//! header → API-key prefix → model prefix → body `tenant_id` → default.
//! A header/body disagreement is a `tenant_conflict` 400.
//!
//! Streaming responses re-chunk the agent's answer into SSE deltas whose
//! concatenation equals the non-streaming content for the same input, emit
//! a zero-content heartbeat when the agent is quiet longer than the
//! keep-alive window, and always terminate with `data: [DONE]`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::AppState;
use crate::agents::{AgentAnswer, AgentSelection};
use crate::dispatch::GatewayRequest;
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::llm::{ChatMessage, TokenUsage};

/// Longest delta piece before sentence splitting kicks in
const MAX_PIECE_CHARS: usize = 200;

/// Permissively decoded chat completion request
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    /// Requested model, possibly `<tenant>-<model>`
    #[serde(default)]
    pub model: Option<String>,
    /// Conversation messages
    #[serde(default)]
    pub messages: Vec<WireMessage>,
    /// Stream the response as SSE chunks
    #[serde(default)]
    pub stream: bool,
    /// Temperature override
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Token budget override
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Tenant id carried in the body
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Agent selection
    #[serde(default)]
    pub agent_type: AgentSelection,
}

/// One wire message; content tolerates absence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// Message role
    pub role: String,
    /// Message content
    #[serde(default)]
    pub content: String,
}

/// `POST /v1/chat/completions`
///
/// # Errors
///
/// Structured error envelopes per the gateway taxonomy.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, AppError> {
    let generation = state.registry.snapshot().await;

    let header_name = generation.policy.security.tenant_header_name.clone();
    let header_tenant = header_value(&headers, &header_name);
    let bearer = bearer_token(&headers);

    // Header and body naming different tenants is a client error, not a
    // precedence question.
    if let (Some(from_header), Some(from_body)) = (&header_tenant, &request.tenant_id) {
        if from_header != from_body {
            return Err(AppError::new(
                ErrorCode::TenantConflict,
                format!("header names tenant '{from_header}' but body names '{from_body}'"),
            ));
        }
    }

    let hint = crate::tenant::TenantHint {
        header: header_tenant,
        api_key: bearer,
        model: request.model.clone(),
        body: request.tenant_id.clone(),
    };
    let runtime = generation.resolve(&hint)?;

    if request.messages.is_empty() {
        return Err(AppError::bad_request("messages must not be empty"));
    }
    let question = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .ok_or_else(|| AppError::bad_request("no user message found"))?;
    if question.trim().is_empty() {
        return Err(AppError::bad_request("user message is empty"));
    }

    let history = if generation.flags.enable_conversation_history {
        conversation_history(&request.messages)
    } else {
        Vec::new()
    };

    let gateway_request = GatewayRequest {
        question,
        history,
        agent_type: request.agent_type,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    };

    let model_echo = request
        .model
        .clone()
        .or_else(|| runtime.config.model.clone())
        .unwrap_or_else(|| "siamgate".to_owned());

    let streaming = request.stream && generation.flags.enable_streaming_responses;
    debug!(
        tenant = %runtime.config.tenant_id,
        streaming,
        "chat completion accepted"
    );

    if streaming {
        Ok(stream_response(state, gateway_request, runtime, generation, model_echo)
            .into_response())
    } else {
        let answer = state
            .dispatcher
            .dispatch(&gateway_request, &runtime, &generation)
            .await?;
        Ok(Json(completion_envelope(
            &model_echo,
            &gateway_request.question,
            &answer,
        ))
        .into_response())
    }
}

/// Non-streaming completion envelope
fn completion_envelope(
    model: &str,
    question: &str,
    answer: &AgentAnswer,
) -> serde_json::Value {
    let usage = answer
        .usage
        .clone()
        .unwrap_or_else(|| TokenUsage::estimate(question, &answer.content));

    json!({
        "id": completion_id(),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": answer.content},
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": usage.prompt_tokens,
            "completion_tokens": usage.completion_tokens,
            "total_tokens": usage.total_tokens
        }
    })
}

/// Aborts the dispatch task when the client goes away mid-stream
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Build the SSE response: heartbeats while the agent works, sentence-sized
/// deltas once the answer arrives, `[DONE]` at the end.
fn stream_response(
    state: Arc<AppState>,
    request: GatewayRequest,
    runtime: Arc<crate::tenant::TenantRuntime>,
    generation: Arc<crate::tenant::Generation>,
    model: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let keep_alive = Duration::from_secs(state.config.keep_alive_secs.max(1));
    let (tx, mut rx) = mpsc::channel::<AppResult<AgentAnswer>>(1);

    let dispatcher = Arc::clone(&state.dispatcher);
    let handle = tokio::spawn(async move {
        let result = dispatcher.dispatch(&request, &runtime, &generation).await;
        let _ = tx.send(result).await;
    });

    let stream = async_stream::stream! {
        // Dropping this guard (client disconnect) aborts the dispatch task,
        // which rolls back any in-flight read-only transaction.
        let _abort_guard = AbortOnDrop(handle);
        let id = completion_id();
        let created = Utc::now().timestamp();

        yield Ok(sse_chunk(&id, created, &model, json!({"role": "assistant", "content": ""}), None));

        let answer = loop {
            match tokio::time::timeout(keep_alive, rx.recv()).await {
                Ok(Some(result)) => break Some(result),
                Ok(None) => break None,
                Err(_) => {
                    // Zero-content heartbeat keeps intermediaries from
                    // timing the stream out while an agent is working.
                    yield Ok(sse_chunk(&id, created, &model, json!({"content": ""}), None));
                }
            }
        };

        match answer {
            Some(Ok(answer)) => {
                for piece in chunk_text(&answer.content) {
                    yield Ok(sse_chunk(&id, created, &model, json!({"content": piece}), None));
                }
                yield Ok(sse_chunk(&id, created, &model, json!({}), Some("stop")));
            }
            Some(Err(error)) => {
                let body = json!({"content": error.sanitized_message()});
                yield Ok(sse_chunk(&id, created, &model, body, Some("stop")));
            }
            None => {}
        }

        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream)
}

fn sse_chunk(
    id: &str,
    created: i64,
    model: &str,
    delta: serde_json::Value,
    finish_reason: Option<&str>,
) -> Event {
    let body = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason
        }]
    });
    Event::default().data(body.to_string())
}

fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

/// Prior turns mapped for agents, excluding the final user message
fn conversation_history(messages: &[WireMessage]) -> Vec<ChatMessage> {
    let last_user = messages.iter().rposition(|m| m.role == "user");
    messages
        .iter()
        .enumerate()
        .filter(|(index, _)| Some(*index) != last_user)
        .filter_map(|(_, m)| match m.role.as_str() {
            "user" => Some(ChatMessage::user(&m.content)),
            "assistant" => Some(ChatMessage::assistant(&m.content)),
            "system" => Some(ChatMessage::system(&m.content)),
            _ => None,
        })
        .collect()
}

/// Split an answer into streaming pieces whose concatenation is exactly the
/// original text. Lines stream individually; long lines split after
/// sentence boundaries.
fn chunk_text(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    for line in text.split_inclusive('\n') {
        if line.len() <= MAX_PIECE_CHARS {
            pieces.push(line.to_owned());
            continue;
        }
        let mut rest = line;
        while rest.len() > MAX_PIECE_CHARS {
            let split_at = rest[..MAX_PIECE_CHARS]
                .rfind(". ")
                .map_or(MAX_PIECE_CHARS.min(rest.len()), |pos| pos + 2);
            let boundary = floor_char_boundary(rest, split_at);
            if boundary == 0 {
                break;
            }
            pieces.push(rest[..boundary].to_owned());
            rest = &rest[boundary..];
        }
        if !rest.is_empty() {
            pieces.push(rest.to_owned());
        }
    }
    pieces
}

/// Largest char boundary at or below `index`
fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_preserves_content() {
        let text = "ผลลัพธ์จาก Company A: 42\n\nแหล่งข้อมูล: ตาราง employees (1 แถว)";
        let pieces = chunk_text(text);
        assert!(pieces.len() > 1);
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn long_lines_split_at_sentences() {
        let sentence = "This is a sentence that repeats. ";
        let text = sentence.repeat(20);
        let pieces = chunk_text(&text);
        assert!(pieces.len() > 1);
        assert_eq!(pieces.concat(), text);
        assert!(pieces[0].ends_with(". "));
    }

    #[test]
    fn multibyte_text_never_splits_inside_a_char() {
        let text = "ก".repeat(600);
        let pieces = chunk_text(&text);
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn permissive_request_decoding() {
        let request: ChatCompletionRequest = serde_json::from_str(
            r#"{"model": "company-a-llama", "messages": [{"role": "user", "content": "hi"}],
                "unknown_field": 7}"#,
        )
        .unwrap();
        assert_eq!(request.model.as_deref(), Some("company-a-llama"));
        assert!(!request.stream);
        assert_eq!(request.agent_type, AgentSelection::Auto);
    }

    #[test]
    fn history_excludes_final_user_message() {
        let messages = vec![
            WireMessage {
                role: "system".to_owned(),
                content: "be helpful".to_owned(),
            },
            WireMessage {
                role: "user".to_owned(),
                content: "first".to_owned(),
            },
            WireMessage {
                role: "assistant".to_owned(),
                content: "answer".to_owned(),
            },
            WireMessage {
                role: "user".to_owned(),
                content: "second".to_owned(),
            },
        ];
        let history = conversation_history(&messages);
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].content, "first");
    }
}
