// ABOUTME: Generative fallback agent for questions no specialist can answer
// ABOUTME: Produces a best-effort reply with a generic-source disclaimer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! # Generative Fallback Agent
//!
//! The agent of last resort. No external IO beyond the LLM call, no tenant
//! data access. Every answer carries a disclaimer that it was generated
//! without the tenant's structured or document sources.

use async_trait::async_trait;

use super::{AgentAnswer, AgentContext, AgentKind, AgentOutcome, QueryAgent};
use crate::llm::{ChatMessage, CompletionRequest};
use crate::tenant::{ResponseLanguage, TenantConfig};

/// Generative fallback agent
#[derive(Debug, Default)]
pub struct FallbackAgent;

impl FallbackAgent {
    /// Create the agent
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn disclaimer(language: ResponseLanguage) -> &'static str {
        match language {
            ResponseLanguage::Th => {
                "หมายเหตุ: คำตอบนี้สร้างจากความรู้ทั่วไป ไม่ได้มาจากข้อมูลภายในของบริษัท"
            }
            ResponseLanguage::En => {
                "Note: this answer was generated from general knowledge, not from company data."
            }
        }
    }
}

#[async_trait]
impl QueryAgent for FallbackAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Fallback
    }

    fn is_enabled(&self, tenant: &TenantConfig) -> bool {
        tenant.settings.enable_fallback_agent
    }

    async fn answer(&self, question: &str, ctx: &AgentContext<'_>) -> AgentOutcome {
        let settings = &ctx.config().settings;
        let language = match settings.response_language {
            ResponseLanguage::Th => "Thai",
            ResponseLanguage::En => "English",
        };

        let system = format!(
            "You are the assistant for {}. Answer helpfully in {language}. \
             You have no access to company databases or documents; answer \
             from general knowledge and keep it brief.",
            ctx.config().name
        );

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend_from_slice(ctx.history);
        messages.push(ChatMessage::user(question));

        let request = CompletionRequest::new(messages)
            .with_temperature(ctx.temperature())
            .with_max_tokens(ctx.max_tokens());

        match ctx.complete(&request).await {
            Ok(response) => {
                let content = format!(
                    "{}\n\n{}",
                    response.content,
                    Self::disclaimer(settings.response_language)
                );
                AgentOutcome::Success(
                    AgentAnswer::new(AgentKind::Fallback, content).with_usage(response.usage),
                )
            }
            Err(error) => AgentOutcome::from_error(error),
        }
    }
}
