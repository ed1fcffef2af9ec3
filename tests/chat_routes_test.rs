// ABOUTME: Integration tests for the OpenAI-compatible chat facade
// ABOUTME: Covers tenant extraction, envelopes, streaming and error codes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{concat_sse_deltas, scripted_router, send_json, send_raw};

const COMPLETIONS: &str = "/v1/chat/completions";

#[tokio::test]
async fn empty_messages_is_bad_request() {
    let app = scripted_router(vec!["unused"]);
    let (status, body) = send_json(
        app,
        Method::POST,
        COMPLETIONS,
        &[],
        Some(json!({"model": "x", "messages": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn header_body_tenant_conflict_is_rejected() {
    let app = scripted_router(vec!["unused"]);
    let (status, body) = send_json(
        app,
        Method::POST,
        COMPLETIONS,
        &[("X-Tenant-ID", "company-a")],
        Some(json!({
            "model": "x",
            "tenant_id": "company-b",
            "messages": [{"role": "user", "content": "hello"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "tenant_conflict");
}

#[tokio::test]
async fn unknown_tenant_is_404() {
    let app = scripted_router(vec!["unused"]);
    let (status, body) = send_json(
        app,
        Method::POST,
        COMPLETIONS,
        &[("X-Tenant-ID", "company-z")],
        Some(json!({
            "model": "x",
            "messages": [{"role": "user", "content": "hello"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "tenant_unknown");
}

#[tokio::test]
async fn fallback_answer_has_well_formed_envelope() {
    // A question with no structured cues and no knowledge base for
    // company-b goes straight to the generative fallback.
    let app = scripted_router(vec!["Our office opens at nine."]);
    let (status, body) = send_json(
        app,
        Method::POST,
        COMPLETIONS,
        &[("X-Tenant-ID", "company-b")],
        Some(json!({
            "model": "company-b-gemma2:9b",
            "messages": [{"role": "user", "content": "When does the office open?"}]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "company-b-gemma2:9b");
    assert_eq!(body["choices"][0]["index"], 0);
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    let content = body["choices"][0]["message"]["content"].as_str().unwrap();
    assert!(content.contains("Our office opens at nine."));
    // The fallback agent always discloses its generic source
    assert!(content.contains("general knowledge"));
    assert!(body["usage"]["total_tokens"].as_u64().unwrap() > 0);
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
}

#[tokio::test]
async fn max_tokens_of_one_still_returns_an_envelope() {
    let app = scripted_router(vec!["ok"]);
    let (status, body) = send_json(
        app,
        Method::POST,
        COMPLETIONS,
        &[("X-Tenant-ID", "company-b")],
        Some(json!({
            "model": "x",
            "max_tokens": 1,
            "messages": [{"role": "user", "content": "When does the office open?"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["choices"][0]["message"]["content"].is_string());
}

#[tokio::test]
async fn model_prefix_alone_selects_the_tenant() {
    let app = scripted_router(vec!["answer"]);
    let (status, body) = send_json(
        app,
        Method::POST,
        COMPLETIONS,
        &[],
        Some(json!({
            "model": "company-b-gemma2:9b",
            "messages": [{"role": "user", "content": "When does the office open?"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // owned_by in /v1/models and the disclaimer language confirm tenant B
    let content = body["choices"][0]["message"]["content"].as_str().unwrap();
    assert!(content.contains("general knowledge"), "expected English disclaimer");
}

#[tokio::test]
async fn streaming_concatenation_equals_non_streaming_content() {
    let reply = "The office opens at nine. Staff arrive earlier on Mondays.";

    let (status, body) = send_json(
        scripted_router(vec![reply]),
        Method::POST,
        COMPLETIONS,
        &[("X-Tenant-ID", "company-b")],
        Some(json!({
            "model": "x",
            "stream": false,
            "messages": [{"role": "user", "content": "When does the office open?"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let non_streaming = body["choices"][0]["message"]["content"]
        .as_str()
        .unwrap()
        .to_owned();

    let (status, sse_body) = send_raw(
        scripted_router(vec![reply]),
        Method::POST,
        COMPLETIONS,
        &[("X-Tenant-ID", "company-b")],
        Some(json!({
            "model": "x",
            "stream": true,
            "messages": [{"role": "user", "content": "When does the office open?"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(sse_body.contains("chat.completion.chunk"));
    assert!(sse_body.trim_end().ends_with("data: [DONE]"));
    assert_eq!(concat_sse_deltas(&sse_body), non_streaming);
}

#[tokio::test]
async fn unstructured_question_with_no_kb_never_touches_sql() {
    // Knowledge base unavailable, generic question: the fallback agent
    // answers and no SQL executes.
    let app = scripted_router(vec!["นโยบายการลางานมีดังนี้"]);

    let (_, health_before) = send_json(app.clone(), Method::GET, "/health", &[], None).await;
    let sql_before = health_before["counters"]["sql_executed_total"]
        .as_u64()
        .unwrap();

    let (status, body) = send_json(
        app.clone(),
        Method::POST,
        COMPLETIONS,
        &[("X-Tenant-ID", "company-b")],
        Some(json!({
            "model": "x",
            "messages": [{"role": "user", "content": "อธิบายนโยบายการลางาน"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["choices"][0]["message"]["content"]
        .as_str()
        .unwrap()
        .contains("นโยบายการลางาน"));

    let (_, health_after) = send_json(app, Method::GET, "/health", &[], None).await;
    let sql_after = health_after["counters"]["sql_executed_total"]
        .as_u64()
        .unwrap();
    assert_eq!(sql_before, sql_after);
}

#[tokio::test]
async fn models_lists_one_logical_model_per_tenant() {
    let app = scripted_router(vec!["unused"]);
    let (status, body) = send_json(app, Method::GET, "/v1/models", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["object"], "list");

    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["company-a-llama3.1:8b", "company-b-gemma2:9b"]);
}

#[tokio::test]
async fn health_reports_tenant_readiness() {
    let app = scripted_router(vec!["unused"]);
    let (status, body) = send_json(app, Method::GET, "/health", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["generation"], 1);
    assert_eq!(body["tenants"]["company-a"]["knowledge_base_agent"], true);
    assert_eq!(body["tenants"]["company-b"]["knowledge_base_agent"], false);
    assert_eq!(body["tenants"]["company-a"]["pool_initialized"], false);
}

#[tokio::test]
async fn tenants_endpoint_requires_the_admin_token() {
    let app = scripted_router(vec!["unused"]);

    let (status, _) = send_json(app.clone(), Method::GET, "/tenants", &[], None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send_json(
        app,
        Method::GET,
        "/tenants",
        &[("authorization", "Bearer test-admin")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tenants"].as_array().unwrap().len(), 2);

    // Secrets never leave the process
    let serialized = body.to_string();
    assert!(!serialized.contains("secret-a"));
    assert!(!serialized.contains("secret-b"));
    assert!(!serialized.contains("password"));
}
