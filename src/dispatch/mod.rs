// ABOUTME: Agent dispatcher with classification, fallback chain and deadlines
// ABOUTME: Drives each request through an explicit execution state machine
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! # Dispatcher
//!
//! Chooses the agent, executes it under the shared deadline, and applies
//! the fallback chain. Selection precedence: explicit `agent_type` on the
//! request, then the tenant's `default_agent_type`, then the keyword
//! classifier, then a cached LLM routing call for ambiguous questions.
//!
//! Each execution walks `Classifying → Selecting → Running → Rendering →
//! Done`, looping through `Retrying` on recoverable failures. Fatal
//! failures surface immediately; recoverable ones consume an attempt and
//! move to the next candidate in the chain `postgres → knowledge_base →
//! fallback`, bounded by `retry_count` and the deadline.

pub mod intent;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agents::fallback::FallbackAgent;
use crate::agents::knowledge_base::KnowledgeBaseAgent;
use crate::agents::postgres::PostgresAgent;
use crate::agents::{
    AgentAnswer, AgentContext, AgentKind, AgentOutcome, AgentSelection, QueryAgent,
    RequestOverrides,
};
use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::llm::{provider_for_tenant, ChatMessage, LlmProvider};
use crate::metrics::Metrics;
use crate::tenant::{Generation, TenantConfig, TenantRuntime};

/// Canonical fallback order
const AGENT_ORDER: [AgentKind; 3] = [
    AgentKind::Postgres,
    AgentKind::KnowledgeBase,
    AgentKind::Fallback,
];

/// Factory producing the provider for a tenant; swapped out in tests
pub type ProviderFactory = Arc<
    dyn Fn(&TenantConfig, &ServerConfig, u32) -> AppResult<Arc<dyn LlmProvider>> + Send + Sync,
>;

/// One inbound question after façade translation
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// The user's question (last user message)
    pub question: String,
    /// Prior conversation turns, when history is enabled
    pub history: Vec<ChatMessage>,
    /// Agent selection from the request body
    pub agent_type: AgentSelection,
    /// Requested generation budget
    pub max_tokens: Option<u32>,
    /// Requested temperature
    pub temperature: Option<f32>,
}

/// Execution state machine per dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionState {
    Classifying,
    Selecting,
    Running,
    Retrying,
    Done,
}

impl ExecutionState {
    /// Advance the machine, tracing the transition
    fn advance(&mut self, next: Self) {
        debug!(from = ?self, to = ?next, "execution state");
        *self = next;
    }
}

/// The agent dispatcher
pub struct Dispatcher {
    postgres: PostgresAgent,
    knowledge_base: KnowledgeBaseAgent,
    fallback: FallbackAgent,
    routing: intent::RoutingCache,
    server: Arc<ServerConfig>,
    metrics: Arc<Metrics>,
    provider_factory: ProviderFactory,
}

impl Dispatcher {
    /// Create a dispatcher with the real provider factory
    #[must_use]
    pub fn new(server: Arc<ServerConfig>, metrics: Arc<Metrics>) -> Self {
        let routing_ttl = Duration::from_secs(server.routing_cache_ttl_secs);
        Self {
            postgres: PostgresAgent::new(),
            knowledge_base: KnowledgeBaseAgent::new(),
            fallback: FallbackAgent::new(),
            routing: intent::RoutingCache::new(routing_ttl),
            server,
            metrics,
            provider_factory: Arc::new(|tenant, server, retries| {
                provider_for_tenant(tenant, server, retries)
            }),
        }
    }

    /// Replace the provider factory (tests inject scripted providers)
    #[must_use]
    pub fn with_provider_factory(mut self, factory: ProviderFactory) -> Self {
        self.provider_factory = factory;
        self
    }

    /// Metrics registry shared with the façade
    #[must_use]
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Dispatch one request against a coherent generation snapshot
    ///
    /// # Errors
    ///
    /// Surfaces fatal agent failures, deadline expiry, or the last
    /// recoverable failure once the chain and attempt budget are spent.
    pub async fn dispatch(
        &self,
        request: &GatewayRequest,
        runtime: &Arc<TenantRuntime>,
        generation: &Generation,
    ) -> AppResult<AgentAnswer> {
        let deadline = Instant::now() + Duration::from_secs(generation.policy.timeout_seconds);
        let provider = (self.provider_factory)(
            &runtime.config,
            &self.server,
            generation.policy.retry_count,
        )?;

        let overrides = RequestOverrides {
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let ctx = AgentContext {
            runtime,
            provider: &provider,
            deadline,
            server: &self.server,
            policy: &generation.policy,
            flags: &generation.flags,
            metrics: &self.metrics,
            history: &request.history,
            overrides,
        };

        let mut state = ExecutionState::Classifying;
        let selected = self.select_agent(request, &ctx).await;

        state.advance(ExecutionState::Selecting);
        let chain = self.candidate_chain(selected, &runtime.config, request.agent_type)?;
        debug!(
            tenant = %runtime.config.tenant_id,
            chain = ?chain.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
            "agent chain selected"
        );

        let max_attempts = generation.policy.retry_count.max(1) as usize;
        let mut attempts = 0;
        let mut last_error: Option<AppError> = None;

        for kind in chain {
            if attempts >= max_attempts {
                break;
            }
            if deadline.saturating_duration_since(Instant::now()).is_zero() {
                return Err(AppError::timeout("request"));
            }

            state.advance(ExecutionState::Running);
            attempts += 1;
            let outcome = self.agent(kind).answer(&request.question, &ctx).await;

            match outcome {
                AgentOutcome::Success(answer) => {
                    state.advance(ExecutionState::Done);
                    self.metrics.record_agent_success();
                    info!(
                        tenant = %runtime.config.tenant_id,
                        agent = kind.as_str(),
                        attempts,
                        "dispatch complete"
                    );
                    return Ok(answer);
                }
                AgentOutcome::Recoverable(error) => {
                    state.advance(ExecutionState::Retrying);
                    self.metrics.record_agent_fallback();
                    warn!(
                        tenant = %runtime.config.tenant_id,
                        agent = kind.as_str(),
                        "recoverable failure, trying next candidate: {}",
                        error.internal_details()
                    );
                    last_error = Some(error);
                }
                AgentOutcome::Fatal(error) => {
                    warn!(
                        tenant = %runtime.config.tenant_id,
                        agent = kind.as_str(),
                        "fatal failure: {}",
                        error.internal_details()
                    );
                    return Err(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AppError::new(
                ErrorCode::AgentDisabled,
                "no agent produced an answer within the attempt budget",
            )
        }))
    }

    /// Selection precedence: explicit request, tenant default, keyword
    /// classifier, cached LLM router.
    async fn select_agent(&self, request: &GatewayRequest, ctx: &AgentContext<'_>) -> AgentKind {
        if let Some(kind) = request.agent_type.pinned() {
            debug!("agent pinned by request: {}", kind.as_str());
            return kind;
        }
        if let Some(kind) = ctx.config().settings.default_agent_type.pinned() {
            debug!("agent pinned by tenant default: {}", kind.as_str());
            return kind;
        }

        match intent::keyword_intent(&request.question) {
            intent::Intent::Structured => AgentKind::Postgres,
            intent::Intent::Unstructured => AgentKind::KnowledgeBase,
            intent::Intent::Ambiguous => self.routing.route(&request.question, ctx).await,
        }
    }

    /// Build the fallback chain from the selected agent onward, filtered by
    /// tenant enablement
    fn candidate_chain(
        &self,
        selected: AgentKind,
        tenant: &TenantConfig,
        explicit: AgentSelection,
    ) -> AppResult<Vec<AgentKind>> {
        // An explicitly pinned agent that is disabled is a policy error,
        // not an invitation to fall back.
        if let Some(pinned) = explicit.pinned() {
            if !self.agent(pinned).is_enabled(tenant) {
                return Err(AppError::new(
                    ErrorCode::AgentDisabled,
                    format!("agent '{}' is disabled for this tenant", pinned.as_str()),
                ));
            }
        }

        let start = AGENT_ORDER
            .iter()
            .position(|k| *k == selected)
            .unwrap_or(0);
        let chain: Vec<AgentKind> = AGENT_ORDER[start..]
            .iter()
            .copied()
            .filter(|kind| self.agent(*kind).is_enabled(tenant))
            .collect();

        if chain.is_empty() {
            return Err(AppError::new(
                ErrorCode::AgentDisabled,
                "no agent is enabled for this tenant",
            ));
        }
        Ok(chain)
    }

    fn agent(&self, kind: AgentKind) -> &dyn QueryAgent {
        match kind {
            AgentKind::Postgres => &self.postgres,
            AgentKind::KnowledgeBase => &self.knowledge_base,
            AgentKind::Fallback => &self.fallback,
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
