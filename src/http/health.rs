// ABOUTME: Health endpoint with build info and per-tenant readiness
// ABOUTME: Reports pool state, knowledge-base bindings and usage counters
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! `GET /health`: build info plus per-tenant readiness.
//!
//! Readiness is reported from cheap local state (pool constructed,
//! knowledge base bound); it deliberately avoids probing tenant databases
//! on every poll.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Map, Value};

use super::AppState;

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let generation = state.registry.snapshot().await;

    let mut tenants = Map::new();
    for runtime in generation.tenants() {
        let config = &runtime.config;
        tenants.insert(
            config.tenant_id.clone(),
            json!({
                "name": config.name,
                "postgres_agent": config.settings.enable_postgres_agent,
                "knowledge_base_agent": config.settings.enable_knowledge_base_agent
                    && config.knowledge_base.is_some(),
                "pool_initialized": runtime.pool_initialized(),
            }),
        );
    }

    let usage = state.metrics.token_usage().await;

    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "started_at": state.started_at.to_rfc3339(),
        "generation": generation.number,
        "tenants": tenants,
        "counters": {
            "sql_executed_total": state.metrics.sql_executed_total.load(Ordering::Relaxed),
            "agent_success_total": state.metrics.agent_success_total.load(Ordering::Relaxed),
            "agent_fallback_total": state.metrics.agent_fallback_total.load(Ordering::Relaxed),
            "safety_rejected_total": state.metrics.safety_rejected_total.load(Ordering::Relaxed),
        },
        "token_usage": usage,
    }))
}
