// ABOUTME: OpenAI-compatible model listing derived from tenant configuration
// ABOUTME: Exposes one logical model id per tenant for chat front-ends
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! `GET /v1/models`: per-tenant logical models.
//!
//! Chat front-ends pick a model from this list; the `<tenant-id>-<model>`
//! convention doubles as a tenant hint on subsequent completions.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use super::AppState;
use crate::llm::resolve_model_id;

/// `GET /v1/models`
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    let generation = state.registry.snapshot().await;
    let fallback_model = generation
        .policy
        .aws
        .bedrock_model
        .clone()
        .unwrap_or_else(|| "siamgate".to_owned());
    let created = Utc::now().timestamp();

    let data: Vec<Value> = generation
        .tenants()
        .iter()
        .map(|runtime| {
            json!({
                "id": resolve_model_id(&runtime.config, &fallback_model),
                "object": "model",
                "created": created,
                "owned_by": runtime.config.tenant_id,
            })
        })
        .collect();

    Json(json!({"object": "list", "data": data}))
}
