// ABOUTME: Tenant-aware LLM provider construction
// ABOUTME: Resolves base URL, API key and model per tenant with env fallbacks
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! # Per-Tenant Provider Factory
//!
//! Every tenant may pin its own model id and API key; the endpoint itself is
//! process-wide. Resolution order for credentials:
//!
//! 1. Tenant `api_keys.llm` from the configuration document
//! 2. Process environment (`SIAMGATE_LLM_API_KEY`)

use std::sync::Arc;

use tracing::debug;

use super::sse_parser::RetryConfig;
use super::{LlmProvider, OpenAiCompatibleConfig, OpenAiCompatibleProvider};
use crate::config::ServerConfig;
use crate::errors::AppResult;
use crate::tenant::TenantConfig;

/// Build the LLM provider serving a tenant's requests
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be constructed.
pub fn provider_for_tenant(
    tenant: &TenantConfig,
    server: &ServerConfig,
    retry_count: u32,
) -> AppResult<Arc<dyn LlmProvider>> {
    let base = OpenAiCompatibleConfig::from_env();

    let config = OpenAiCompatibleConfig {
        base_url: server
            .llm_base_url
            .clone()
            .unwrap_or(base.base_url),
        api_key: tenant
            .api_keys
            .get("llm")
            .cloned()
            .filter(|k| !k.is_empty())
            .or(base.api_key),
        default_model: tenant.model.clone().unwrap_or(base.default_model),
        retry: RetryConfig::bounded(retry_count),
    };

    debug!(
        tenant = %tenant.tenant_id,
        model = %config.default_model,
        "constructing LLM provider"
    );

    Ok(Arc::new(OpenAiCompatibleProvider::new(config)?))
}

/// Logical model id exposed by `GET /v1/models`: `<tenant-id>-<model>`
#[must_use]
pub fn resolve_model_id(tenant: &TenantConfig, fallback_model: &str) -> String {
    let model = tenant.model.as_deref().unwrap_or(fallback_model);
    format!("{}-{}", tenant.tenant_id, model)
}
