// ABOUTME: Process-wide counters for query execution and token accounting
// ABOUTME: Exposes per-tenant usage totals consumed by the health endpoint
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! Lightweight metrics without an exporter dependency.
//!
//! Counters are plain atomics; the per-tenant token ledger sits behind an
//! async `RwLock` because it is touched once per completed LLM call, never
//! on the streaming hot path. A quota hook is reserved here: token usage is
//! recorded but no threshold is enforced.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::RwLock;

use crate::llm::TokenUsage;

/// Token totals accumulated for one tenant
#[derive(Debug, Default, Clone, Serialize)]
pub struct TenantTokenUsage {
    /// Prompt tokens consumed
    pub prompt_tokens: u64,
    /// Completion tokens consumed
    pub completion_tokens: u64,
    /// LLM calls observed
    pub calls: u64,
}

/// Gateway metrics registry
#[derive(Debug, Default)]
pub struct Metrics {
    /// Number of SQL statements actually executed against tenant databases
    pub sql_executed_total: AtomicU64,
    /// Agent executions that produced a successful answer
    pub agent_success_total: AtomicU64,
    /// Agent executions that fell through to another agent
    pub agent_fallback_total: AtomicU64,
    /// Requests rejected by the SQL safety gate
    pub safety_rejected_total: AtomicU64,
    tokens: RwLock<HashMap<String, TenantTokenUsage>>,
}

impl Metrics {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one executed SQL statement
    pub fn record_sql_executed(&self) {
        self.sql_executed_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a safety-gate rejection
    pub fn record_safety_rejection(&self) {
        self.safety_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful agent outcome
    pub fn record_agent_success(&self) {
        self.agent_success_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fallback hop between agents
    pub fn record_agent_fallback(&self) {
        self.agent_fallback_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Add an LLM call's token usage to the tenant ledger
    pub async fn record_token_usage(&self, tenant_id: &str, usage: &TokenUsage) {
        let mut tokens = self.tokens.write().await;
        let entry = tokens.entry(tenant_id.to_owned()).or_default();
        entry.prompt_tokens += u64::from(usage.prompt_tokens);
        entry.completion_tokens += u64::from(usage.completion_tokens);
        entry.calls += 1;
    }

    /// Snapshot of per-tenant token totals
    pub async fn token_usage(&self) -> HashMap<String, TenantTokenUsage> {
        self.tokens.read().await.clone()
    }

    /// Reserved policy hook: token quotas are accounted but not enforced.
    /// Always allows in the current configuration surface.
    pub async fn enforce_quota(&self, _tenant_id: &str) -> bool {
        true
    }
}
