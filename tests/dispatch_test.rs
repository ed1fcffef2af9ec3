// ABOUTME: Integration tests for agent selection and the fallback chain
// ABOUTME: Exercises recoverable fallbacks, pinned agents and policy errors
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{scripted_router_with_config, send_json, test_server_config, ScriptedProvider, TEST_CONFIG};
use siamgate::agents::AgentSelection;
use siamgate::config::ServerConfig;
use siamgate::dispatch::{Dispatcher, GatewayRequest};
use siamgate::errors::ErrorCode;
use siamgate::metrics::Metrics;
use siamgate::tenant::{TenantHint, TenantRegistry};

fn scripted_dispatcher(replies: Vec<&'static str>, server: ServerConfig) -> Dispatcher {
    let config = Arc::new(server);
    let metrics = Arc::new(Metrics::new());
    let replies: Vec<String> = replies.into_iter().map(ToOwned::to_owned).collect();
    Dispatcher::new(config, metrics).with_provider_factory(Arc::new(
        move |_tenant, _server, _retries| {
            let script: Vec<&str> = replies.iter().map(String::as_str).collect();
            let provider: Arc<dyn siamgate::llm::LlmProvider> =
                Arc::new(ScriptedProvider::new(script));
            Ok(provider)
        },
    ))
}

fn request(question: &str) -> GatewayRequest {
    GatewayRequest {
        question: question.to_owned(),
        history: Vec::new(),
        agent_type: AgentSelection::Auto,
        max_tokens: None,
        temperature: None,
    }
}

#[tokio::test]
async fn structured_question_falls_back_down_the_chain() {
    // The tenant database is unreachable and no retrieval service is
    // configured, so a structured question walks postgres -> knowledge_base
    // -> fallback and still gets an answer.
    let registry = TenantRegistry::load_str(TEST_CONFIG).unwrap();
    let generation = registry.snapshot().await;
    let runtime = generation
        .resolve(&TenantHint {
            header: Some("company-a".to_owned()),
            ..TenantHint::default()
        })
        .unwrap();

    let dispatcher = scripted_dispatcher(vec!["มีพนักงานทั้งหมด 42 คน"], test_server_config());
    let answer = dispatcher
        .dispatch(&request("How many employees are there?"), &runtime, &generation)
        .await
        .unwrap();

    assert_eq!(answer.agent.as_str(), "fallback");
    assert!(answer.content.contains("42"));

    let metrics = dispatcher.metrics();
    use std::sync::atomic::Ordering;
    assert_eq!(metrics.agent_success_total.load(Ordering::Relaxed), 1);
    // postgres and knowledge_base each consumed one fallback hop
    assert_eq!(metrics.agent_fallback_total.load(Ordering::Relaxed), 2);
    assert_eq!(metrics.sql_executed_total.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn attempt_budget_bounds_the_chain() {
    // With retry_count 1 the dispatcher stops after the first recoverable
    // failure and surfaces it.
    let tight = TEST_CONFIG.replace("retry_count: 3", "retry_count: 1");
    let registry = TenantRegistry::load_str(&tight).unwrap();
    let generation = registry.snapshot().await;
    let runtime = generation
        .resolve(&TenantHint {
            header: Some("company-a".to_owned()),
            ..TenantHint::default()
        })
        .unwrap();

    let dispatcher = scripted_dispatcher(vec!["unused"], test_server_config());
    let err = dispatcher
        .dispatch(&request("How many employees are there?"), &runtime, &generation)
        .await
        .unwrap_err();
    assert!(err.code.is_transient(), "expected a transient cause, got {err}");
}

#[tokio::test]
async fn pinned_disabled_agent_is_a_policy_error() {
    let no_postgres = TEST_CONFIG.replace(
        "      max_tokens: 256\n      response_language: en",
        "      max_tokens: 256\n      response_language: en\n      enable_postgres_agent: false",
    );
    let registry = TenantRegistry::load_str(&no_postgres).unwrap();
    let generation = registry.snapshot().await;
    let runtime = generation
        .resolve(&TenantHint {
            header: Some("company-b".to_owned()),
            ..TenantHint::default()
        })
        .unwrap();

    let dispatcher = scripted_dispatcher(vec!["unused"], test_server_config());
    let mut pinned = request("anything at all");
    pinned.agent_type = AgentSelection::Postgres;

    let err = dispatcher
        .dispatch(&pinned, &runtime, &generation)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AgentDisabled);
}

#[tokio::test]
async fn pinned_fallback_skips_classification_entirely() {
    let registry = TenantRegistry::load_str(TEST_CONFIG).unwrap();
    let generation = registry.snapshot().await;
    let runtime = generation
        .resolve(&TenantHint {
            header: Some("company-b".to_owned()),
            ..TenantHint::default()
        })
        .unwrap();

    let dispatcher = scripted_dispatcher(vec!["direct answer"], test_server_config());
    let mut pinned = request("How many employees are there?");
    pinned.agent_type = AgentSelection::Fallback;

    let answer = dispatcher
        .dispatch(&pinned, &runtime, &generation)
        .await
        .unwrap();
    assert_eq!(answer.agent.as_str(), "fallback");
    assert!(answer.content.contains("direct answer"));
}

#[tokio::test]
async fn pinned_disabled_agent_maps_to_503_on_the_wire() {
    let no_postgres = TEST_CONFIG.replace(
        "      max_tokens: 256\n      response_language: en",
        "      max_tokens: 256\n      response_language: en\n      enable_postgres_agent: false",
    );
    let app = scripted_router_with_config(vec!["unused"], test_server_config(), &no_postgres);

    let (status, body) = send_json(
        app,
        Method::POST,
        "/v1/chat/completions",
        &[("X-Tenant-ID", "company-b")],
        Some(json!({
            "model": "x",
            "agent_type": "postgres",
            "messages": [{"role": "user", "content": "How many employees?"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "agent_unavailable");
}

#[tokio::test]
async fn tenant_default_agent_type_applies_when_request_is_auto() {
    let pinned_default = TEST_CONFIG.replace(
        "      max_tokens: 256\n      response_language: en",
        "      max_tokens: 256\n      response_language: en\n      default_agent_type: fallback",
    );
    let registry = TenantRegistry::load_str(&pinned_default).unwrap();
    let generation = registry.snapshot().await;
    let runtime = generation
        .resolve(&TenantHint {
            header: Some("company-b".to_owned()),
            ..TenantHint::default()
        })
        .unwrap();

    let dispatcher = scripted_dispatcher(vec!["tenant default won"], test_server_config());
    // A heavily structured question would normally route to postgres
    let answer = dispatcher
        .dispatch(
            &request("How many employees earn a salary above average?"),
            &runtime,
            &generation,
        )
        .await
        .unwrap();
    assert_eq!(answer.agent.as_str(), "fallback");
}
