// ABOUTME: Retrieval-augmented agent against the tenant's knowledge base
// ABOUTME: Fetches prefixed passages and synthesizes a citation-backed answer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! # Knowledge-Base Agent
//!
//! Retrieval goes through the managed service with the tenant's binding
//! (`kb_id`, `prefix`, search type, result cap); the isolation invariant
//! holds because the prefix comes from the resolved tenant's frozen config.
//! Synthesis prompts the model to cite passage ids; an empty retrieval is a
//! recoverable failure so the dispatcher can fall back.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AgentAnswer, AgentContext, AgentKind, AgentOutcome, QueryAgent};
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::llm::{ChatMessage, CompletionRequest};
use crate::tenant::{SearchType, TenantConfig};

/// Budget for one retrieval call
const RETRIEVAL_TIMEOUT_SECS: u64 = 10;

/// Wire request to the retrieval service
#[derive(Debug, Serialize)]
struct RetrievalRequest<'a> {
    kb_id: &'a str,
    prefix: &'a str,
    query: &'a str,
    top_k: u32,
    search_type: &'a str,
}

/// Wire response from the retrieval service
#[derive(Debug, Deserialize)]
struct RetrievalResponse {
    #[serde(default)]
    passages: Vec<Passage>,
}

/// One retrieved passage
#[derive(Debug, Clone, Deserialize)]
pub struct Passage {
    /// Passage id, cited in the answer
    pub id: String,
    /// Passage text
    pub text: String,
    /// Relevance score
    #[serde(default)]
    pub score: f64,
    /// Source document
    #[serde(default)]
    pub source: Option<String>,
}

/// Retrieval-augmented knowledge-base agent
pub struct KnowledgeBaseAgent {
    client: Client,
}

impl Default for KnowledgeBaseAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeBaseAgent {
    /// Create the agent with its own HTTP client
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    async fn run(&self, question: &str, ctx: &AgentContext<'_>) -> AppResult<AgentOutcome> {
        let Some(binding) = &ctx.config().knowledge_base else {
            return Ok(AgentOutcome::Recoverable(AppError::new(
                ErrorCode::KbUnavailable,
                "tenant has no knowledge-base binding",
            )));
        };
        let Some(service_url) = &ctx.server.kb_service_url else {
            return Ok(AgentOutcome::Recoverable(AppError::new(
                ErrorCode::KbUnavailable,
                "no knowledge-base service endpoint configured",
            )));
        };

        let search_type = if binding.search_type == SearchType::Hybrid
            && !ctx.flags.enable_hybrid_search
        {
            SearchType::Semantic
        } else {
            binding.search_type
        };

        let passages = self
            .retrieve(service_url, binding.id.as_str(), &binding.prefix, question, binding.max_results, search_type, ctx)
            .await?;

        if passages.is_empty() {
            return Ok(AgentOutcome::Recoverable(AppError::new(
                ErrorCode::KbUnavailable,
                "retrieval returned no passages",
            )));
        }

        let answer = self.synthesize(question, &passages, ctx).await?;
        Ok(AgentOutcome::Success(answer))
    }

    #[allow(clippy::too_many_arguments)]
    async fn retrieve(
        &self,
        service_url: &str,
        kb_id: &str,
        prefix: &str,
        question: &str,
        top_k: u32,
        search_type: SearchType,
        ctx: &AgentContext<'_>,
    ) -> AppResult<Vec<Passage>> {
        let request = RetrievalRequest {
            kb_id,
            prefix,
            query: question,
            top_k,
            search_type: search_type.as_str(),
        };

        let budget = ctx
            .remaining()
            .min(Duration::from_secs(RETRIEVAL_TIMEOUT_SECS));
        if budget.is_zero() {
            return Err(AppError::timeout("knowledge-base retrieval"));
        }

        debug!(kb_id, prefix, top_k, "retrieving passages");

        let url = format!("{}/retrieve", service_url.trim_end_matches('/'));
        let response = tokio::time::timeout(
            budget,
            self.client.post(url).json(&request).send(),
        )
        .await
        .map_err(|_| AppError::timeout("knowledge-base retrieval"))?
        .map_err(|e| {
            AppError::new(
                ErrorCode::KbUnavailable,
                format!("retrieval request failed: {e}"),
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 4xx is a permanent misconfiguration; 5xx is transient
            let code = if status.is_client_error() {
                ErrorCode::Internal
            } else {
                ErrorCode::KbUnavailable
            };
            warn!("retrieval service returned {status}: {body}");
            return Err(AppError::new(
                code,
                format!("retrieval service returned {status}"),
            ));
        }

        let parsed: RetrievalResponse = response.json().await.map_err(|e| {
            AppError::new(
                ErrorCode::KbUnavailable,
                format!("malformed retrieval response: {e}"),
            )
        })?;
        Ok(parsed.passages)
    }

    async fn synthesize(
        &self,
        question: &str,
        passages: &[Passage],
        ctx: &AgentContext<'_>,
    ) -> AppResult<AgentAnswer> {
        let mut context_block = String::new();
        for passage in passages {
            context_block.push_str(&format!("[{}] {}\n", passage.id, passage.text));
        }

        let language = match ctx.config().settings.response_language {
            crate::tenant::ResponseLanguage::Th => "Thai",
            crate::tenant::ResponseLanguage::En => "English",
        };

        let system = format!(
            "You answer questions using only the numbered passages provided. \
             Answer in {language}. Cite the id of every passage you rely on in \
             square brackets, e.g. [doc-3]. If the passages do not contain the \
             answer, say so."
        );
        let user = format!("Passages:\n{context_block}\nQuestion: {question}");

        let request = CompletionRequest::new(vec![
            ChatMessage::system(system),
            ChatMessage::user(user),
        ])
        .with_temperature(ctx.temperature())
        .with_max_tokens(ctx.max_tokens());

        let response = ctx.complete(&request).await?;

        let mut content = response.content;
        if !passages.iter().any(|p| content.contains(&p.id)) {
            // The model ignored the citation instruction; append sources so
            // the answer still names its evidence.
            let ids: Vec<&str> = passages.iter().map(|p| p.id.as_str()).collect();
            content.push_str(&format!("\n\nSources: [{}]", ids.join("], [")));
        }

        Ok(AgentAnswer::new(AgentKind::KnowledgeBase, content).with_usage(response.usage))
    }
}

#[async_trait]
impl QueryAgent for KnowledgeBaseAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::KnowledgeBase
    }

    fn is_enabled(&self, tenant: &TenantConfig) -> bool {
        tenant.settings.enable_knowledge_base_agent && tenant.knowledge_base.is_some()
    }

    async fn answer(&self, question: &str, ctx: &AgentContext<'_>) -> AgentOutcome {
        match self.run(question, ctx).await {
            Ok(outcome) => outcome,
            Err(error) => AgentOutcome::from_error(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieval_request_shape() {
        let request = RetrievalRequest {
            kb_id: "KB123",
            prefix: "company-a",
            query: "leave policy",
            top_k: 10,
            search_type: "SEMANTIC",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["kb_id"], "KB123");
        assert_eq!(json["prefix"], "company-a");
        assert_eq!(json["top_k"], 10);
        assert_eq!(json["search_type"], "SEMANTIC");
    }

    #[test]
    fn passages_parse_with_optional_fields() {
        let response: RetrievalResponse = serde_json::from_str(
            r#"{"passages": [{"id": "doc-1", "text": "Employees get 10 days."}]}"#,
        )
        .unwrap();
        assert_eq!(response.passages.len(), 1);
        assert_eq!(response.passages[0].id, "doc-1");
        assert!(response.passages[0].source.is_none());
    }
}
