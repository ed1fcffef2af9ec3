// ABOUTME: Admin-only tenant summary endpoint
// ABOUTME: Lists tenant metadata with credentials and keys stripped
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! `GET /tenants`: admin summary without secrets.
//!
//! Guarded by the `SIAMGATE_ADMIN_TOKEN` bearer token; the endpoint is
//! disabled entirely when no token is configured. Passwords and API keys
//! never appear in the response.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use super::AppState;
use crate::errors::{AppError, ErrorCode};

/// `GET /tenants`
///
/// # Errors
///
/// `403` when the admin token is missing, wrong, or not configured.
pub async fn list_tenants(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    authorize(&state, &headers)?;

    let generation = state.registry.snapshot().await;
    let tenants: Vec<Value> = generation
        .tenants()
        .iter()
        .map(|runtime| {
            let config = &runtime.config;
            json!({
                "tenant_id": config.tenant_id,
                "name": config.name,
                "description": config.description,
                "model": config.model,
                "response_language": config.settings.response_language,
                "agents": {
                    "postgres": config.settings.enable_postgres_agent,
                    "knowledge_base": config.settings.enable_knowledge_base_agent,
                    "fallback": config.settings.enable_fallback_agent,
                },
                "knowledge_base": config.knowledge_base.as_ref().map(|kb| json!({
                    "id": kb.id,
                    "prefix": kb.prefix,
                    "search_type": kb.search_type,
                    "max_results": kb.max_results,
                })),
                "contact_info": config.contact_info,
            })
        })
        .collect();

    Ok(Json(json!({
        "generation": generation.number,
        "default_tenant": generation.default_tenant,
        "tenants": tenants,
    })))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = &state.config.admin_token else {
        return Err(AppError::new(
            ErrorCode::TenantDisabled,
            "admin endpoint is not configured",
        ));
    };

    let supplied = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if supplied == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(AppError::new(
            ErrorCode::TenantDisabled,
            "admin token missing or invalid",
        ))
    }
}
