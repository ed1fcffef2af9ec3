// ABOUTME: Agent contract shared by the SQL, knowledge-base and fallback agents
// ABOUTME: Defines outcomes, execution context and deadline-aware LLM helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! # Query Agents
//!
//! An agent is a specialized question-answerer. Each one classifies every
//! failure it hits as recoverable (the dispatcher may try the next agent in
//! the chain) or fatal (surfaces immediately). Agents never panic and never
//! throw: the only exit is an [`AgentOutcome`].

pub mod fallback;
pub mod knowledge_base;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::llm::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, TokenUsage};
use crate::metrics::Metrics;
use crate::tenant::{FeatureFlags, GlobalPolicy, TenantConfig, TenantRuntime};

/// The concrete agents the dispatcher can select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Structured NL→SQL agent against the tenant database
    Postgres,
    /// Retrieval-augmented knowledge-base agent
    KnowledgeBase,
    /// Generative fallback agent
    Fallback,
}

impl AgentKind {
    /// Stable string form used in logs and responses
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::KnowledgeBase => "knowledge_base",
            Self::Fallback => "fallback",
        }
    }
}

/// Agent selection as it appears in requests and tenant settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentSelection {
    /// Let the dispatcher classify the question
    #[default]
    Auto,
    /// Force the SQL agent
    Postgres,
    /// Force the knowledge-base agent
    KnowledgeBase,
    /// Force the fallback agent
    Fallback,
}

impl AgentSelection {
    /// The pinned agent, if this selection is explicit
    #[must_use]
    pub const fn pinned(self) -> Option<AgentKind> {
        match self {
            Self::Auto => None,
            Self::Postgres => Some(AgentKind::Postgres),
            Self::KnowledgeBase => Some(AgentKind::KnowledgeBase),
            Self::Fallback => Some(AgentKind::Fallback),
        }
    }
}

/// A successful agent answer
#[derive(Debug, Clone)]
pub struct AgentAnswer {
    /// Rendered answer content
    pub content: String,
    /// Agent that produced the answer
    pub agent: AgentKind,
    /// Token usage across the agent's LLM calls, when known
    pub usage: Option<TokenUsage>,
    /// True when the content is a clarifying question rather than an answer
    pub clarification: bool,
}

impl AgentAnswer {
    /// Plain answer from an agent
    #[must_use]
    pub fn new(agent: AgentKind, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            agent,
            usage: None,
            clarification: false,
        }
    }

    /// Attach token usage
    #[must_use]
    pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.usage = usage;
        self
    }

    /// Mark the content as a clarifying question
    #[must_use]
    pub const fn as_clarification(mut self) -> Self {
        self.clarification = true;
        self
    }
}

/// Result of one agent execution
#[derive(Debug)]
pub enum AgentOutcome {
    /// The agent produced an answer
    Success(AgentAnswer),
    /// The agent failed but the dispatcher may try the next candidate
    Recoverable(AppError),
    /// The failure must surface immediately; no fallback
    Fatal(AppError),
}

impl AgentOutcome {
    /// Classify an error by its code's transience
    #[must_use]
    pub fn from_error(error: AppError) -> Self {
        if error.code.is_transient() {
            Self::Recoverable(error)
        } else {
            Self::Fatal(error)
        }
    }
}

/// Request-level overrides, already clamped to tenant bounds
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOverrides {
    /// Maximum tokens for generation
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

/// Everything an agent needs for one execution
pub struct AgentContext<'a> {
    /// The resolved tenant's runtime
    pub runtime: &'a Arc<TenantRuntime>,
    /// LLM provider for this tenant
    pub provider: &'a Arc<dyn LlmProvider>,
    /// Absolute deadline for the whole request
    pub deadline: Instant,
    /// Process configuration (row caps, schema budget, service URLs)
    pub server: &'a ServerConfig,
    /// Global policy for the active generation
    pub policy: &'a GlobalPolicy,
    /// Feature flags for the active generation
    pub flags: &'a FeatureFlags,
    /// Metrics registry
    pub metrics: &'a Arc<Metrics>,
    /// Prior conversation turns (empty unless history is enabled)
    pub history: &'a [ChatMessage],
    /// Clamped request overrides
    pub overrides: RequestOverrides,
}

impl AgentContext<'_> {
    /// The tenant's frozen configuration
    #[must_use]
    pub fn config(&self) -> &TenantConfig {
        &self.runtime.config
    }

    /// Time left before the request deadline
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Effective generation budget for this request
    #[must_use]
    pub fn max_tokens(&self) -> u32 {
        self.overrides
            .max_tokens
            .map_or(self.config().settings.max_tokens, |requested| {
                requested.min(self.config().settings.max_tokens)
            })
    }

    /// Effective sampling temperature for this request
    #[must_use]
    pub fn temperature(&self) -> f32 {
        self.overrides
            .temperature
            .unwrap_or(self.config().settings.temperature)
    }

    /// Run a completion against the tenant provider under the deadline,
    /// recording token usage in the tenant ledger.
    ///
    /// # Errors
    ///
    /// `Timeout` when the deadline elapses first; provider errors otherwise.
    pub async fn complete(&self, request: &CompletionRequest) -> AppResult<CompletionResponse> {
        self.complete_within(request, self.remaining()).await
    }

    /// Like [`Self::complete`] but with an explicit sub-deadline (e.g. the
    /// 5-second classification budget), still capped by the request deadline.
    ///
    /// # Errors
    ///
    /// `Timeout` when the budget elapses first; provider errors otherwise.
    pub async fn complete_within(
        &self,
        request: &CompletionRequest,
        budget: Duration,
    ) -> AppResult<CompletionResponse> {
        let budget = budget.min(self.remaining());
        if budget.is_zero() {
            return Err(AppError::timeout("llm call"));
        }

        let response = tokio::time::timeout(budget, self.provider.complete(request))
            .await
            .map_err(|_| AppError::timeout("llm call"))??;

        if let Some(usage) = &response.usage {
            self.metrics
                .record_token_usage(&self.config().tenant_id, usage)
                .await;
        }
        Ok(response)
    }
}

/// The contract every agent implements
#[async_trait]
pub trait QueryAgent: Send + Sync {
    /// Which agent this is
    fn kind(&self) -> AgentKind;

    /// Whether the tenant has this agent enabled
    fn is_enabled(&self, tenant: &TenantConfig) -> bool;

    /// Answer the question, classifying every failure
    async fn answer(&self, question: &str, ctx: &AgentContext<'_>) -> AgentOutcome;
}
