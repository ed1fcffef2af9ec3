// ABOUTME: Intent classification for agent routing
// ABOUTME: Keyword cues first, cached LLM tie-break for ambiguous questions
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! # Intent Classification
//!
//! A cheap deterministic classifier runs first: Thai/English keyword cues
//! for structured-data intent (tables, counts, sums, money and date terms).
//! A clear score routes immediately; an ambiguous one asks the model once
//! with a terse routing prompt, cached by normalized question hash.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::agents::{AgentContext, AgentKind};
use crate::llm::{ChatMessage, CompletionRequest};

/// Cache size for routed questions
const CACHE_SIZE: usize = 1024;
/// Budget for the routing LLM call
const ROUTING_BUDGET_SECS: u64 = 5;

/// Structured-data cues, Thai and English. Substring matching handles both
/// languages uniformly (Thai text carries no word boundaries).
const DB_KEYWORDS: &[&str] = &[
    "employees", "พนักงาน", "salary", "เงินเดือน", "projects", "โปรเจค", "count",
    "จำนวน", "average", "เฉลี่ย", "budget", "งบประมาณ", "department", "แผนก",
    "statistics", "สถิติ", "how many", "กี่คน", "sum", "รวม", "total", "ยอด",
    "revenue", "รายได้", "expense", "ค่าใช้จ่าย", "price", "ราคา", "บาท",
    "clients", "ลูกค้า", "timesheet", "บันทึกเวลา", "month", "เดือน", "year", "ปี",
];

/// Coarse question intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Clearly a structured-data question
    Structured,
    /// Clearly a document/general question
    Unstructured,
    /// The keyword cues cannot decide
    Ambiguous,
}

/// Score a question against the structured-data cues
#[must_use]
pub fn keyword_intent(question: &str) -> Intent {
    let lowered = question.to_lowercase();
    let score = DB_KEYWORDS
        .iter()
        .filter(|keyword| lowered.contains(*keyword))
        .count();

    match score {
        0 => Intent::Unstructured,
        1 => Intent::Ambiguous,
        _ => Intent::Structured,
    }
}

struct CachedRoute {
    kind: AgentKind,
    cached_at: Instant,
}

/// LLM-backed router for ambiguous questions, cached by normalized hash
pub struct RoutingCache {
    cache: Mutex<LruCache<u64, CachedRoute>>,
    ttl: Duration,
}

impl RoutingCache {
    /// Create a cache with the given TTL
    ///
    /// # Panics
    ///
    /// Never panics: the cache size is a non-zero constant.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_SIZE).expect("cache size is non-zero"),
            )),
            ttl,
        }
    }

    /// Route an ambiguous question, consulting the cache first
    ///
    /// Falls back to the knowledge-base agent when the routing call fails;
    /// routing must never sink a request on its own.
    pub async fn route(&self, question: &str, ctx: &AgentContext<'_>) -> AgentKind {
        let key = normalized_hash(question);

        {
            let mut cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.cached_at.elapsed() < self.ttl {
                    debug!("routing cache hit");
                    return entry.kind;
                }
                cache.pop(&key);
            }
        }

        let kind = self.ask_model(question, ctx).await;

        self.cache.lock().await.put(
            key,
            CachedRoute {
                kind,
                cached_at: Instant::now(),
            },
        );
        kind
    }

    async fn ask_model(&self, question: &str, ctx: &AgentContext<'_>) -> AgentKind {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(
                "Route the user question to exactly one agent. Reply with one word: \
                 'postgres' for questions answerable from business database tables, \
                 'knowledge_base' for questions about documents and policies, \
                 'fallback' for anything else.",
            ),
            ChatMessage::user(question),
        ])
        .with_temperature(0.0)
        .with_max_tokens(8);

        match ctx
            .complete_within(&request, Duration::from_secs(ROUTING_BUDGET_SECS))
            .await
        {
            Ok(response) => parse_route(&response.content),
            Err(e) => {
                debug!("routing call failed, defaulting to knowledge_base: {e}");
                AgentKind::KnowledgeBase
            }
        }
    }
}

fn parse_route(reply: &str) -> AgentKind {
    let lowered = reply.to_lowercase();
    if lowered.contains("postgres") || lowered.contains("sql") {
        AgentKind::Postgres
    } else if lowered.contains("knowledge") {
        AgentKind::KnowledgeBase
    } else {
        AgentKind::Fallback
    }
}

/// Hash of the question with case and whitespace normalized
fn normalized_hash(question: &str) -> u64 {
    let normalized: String = question
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_structured_cues() {
        assert_eq!(
            keyword_intent("How many employees are in IT?"),
            Intent::Structured
        );
        assert_eq!(keyword_intent("มีพนักงานกี่คน"), Intent::Structured);
        assert_eq!(
            keyword_intent("เงินเดือนเฉลี่ยของแผนกไอที"),
            Intent::Structured
        );
    }

    #[test]
    fn no_cues_is_unstructured() {
        assert_eq!(
            keyword_intent("อธิบายนโยบายการลางาน"),
            Intent::Unstructured
        );
        assert_eq!(
            keyword_intent("What is the leave policy?"),
            Intent::Unstructured
        );
    }

    #[test]
    fn single_cue_is_ambiguous() {
        assert_eq!(
            keyword_intent("Tell me about the projects"),
            Intent::Ambiguous
        );
    }

    #[test]
    fn route_replies_parse() {
        assert_eq!(parse_route("postgres"), AgentKind::Postgres);
        assert_eq!(parse_route("Knowledge_base."), AgentKind::KnowledgeBase);
        assert_eq!(parse_route("something else"), AgentKind::Fallback);
    }

    #[test]
    fn normalization_collapses_case_and_spacing() {
        assert_eq!(
            normalized_hash("How many  Employees?"),
            normalized_hash("how many employees?")
        );
        assert_ne!(
            normalized_hash("how many employees"),
            normalized_hash("how many projects")
        );
    }
}
