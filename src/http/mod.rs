// ABOUTME: HTTP surface assembly for the gateway
// ABOUTME: Wires the chat, models, health and tenant routes onto shared state
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! # HTTP Façade
//!
//! OpenAI-compatible chat completions plus the operational endpoints:
//!
//! - `POST /v1/chat/completions`: streaming and non-streaming chat
//! - `GET /v1/models`: per-tenant logical models
//! - `GET /health`: build info and per-tenant readiness
//! - `GET /tenants`: admin-only tenant summary without secrets

pub mod chat;
pub mod health;
pub mod models;
pub mod tenants;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::metrics::Metrics;
use crate::tenant::TenantRegistry;

/// Shared state behind every route
pub struct AppState {
    /// Tenant registry (the only process-wide mutable state)
    pub registry: Arc<TenantRegistry>,
    /// Agent dispatcher
    pub dispatcher: Arc<Dispatcher>,
    /// Process configuration
    pub config: Arc<ServerConfig>,
    /// Metrics registry
    pub metrics: Arc<Metrics>,
    /// Process start time, reported by the health endpoint
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Assemble the state from its parts
    #[must_use]
    pub fn new(
        registry: Arc<TenantRegistry>,
        dispatcher: Arc<Dispatcher>,
        config: Arc<ServerConfig>,
    ) -> Self {
        let metrics = dispatcher.metrics();
        Self {
            registry,
            dispatcher,
            config,
            metrics,
            started_at: Utc::now(),
        }
    }
}

/// Build the gateway router
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/models", get(models::list_models))
        .route("/health", get(health::health))
        .route("/tenants", get(tenants::list_tenants))
        .with_state(state)
}
