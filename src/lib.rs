// ABOUTME: Library entry point for the SiamGate multi-tenant AI query gateway
// ABOUTME: Wires tenants, agents, dispatch and the OpenAI-compatible facade
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

#![deny(unsafe_code)]

//! # SiamGate
//!
//! A multi-tenant AI query gateway. Natural-language questions arrive
//! through an OpenAI-compatible chat API, are attributed to a tenant, and
//! are answered by one of three agents (a PostgreSQL NL→SQL agent, a
//! retrieval-augmented knowledge-base agent, or a generative fallback)
//! against that tenant's isolated resources.
//!
//! ## Architecture
//!
//! - **Tenant registry**: credentials, per-tenant DB pools and policy,
//!   published as atomic configuration generations
//! - **Chat façade**: OpenAI-compatible HTTP surface with SSE streaming
//! - **Dispatcher**: intent classification, agent selection, fallback chain
//! - **Agents**: SQL generation behind a strict safety gate, prefixed
//!   knowledge-base retrieval, generative fallback
//! - **LLM provider**: provider-neutral completion interface with retries
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use siamgate::config::ServerConfig;
//! use siamgate::errors::AppResult;
//!
//! fn main() -> AppResult<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("gateway configured: {}", config.summary());
//!     Ok(())
//! }
//! ```

/// Query agents: SQL, knowledge-base and generative fallback
pub mod agents;

/// Configuration loading (process env + tenant document)
pub mod config;

/// Intent classification and agent dispatch
pub mod dispatch;

/// Unified error handling with stable wire codes
pub mod errors;

/// OpenAI-compatible HTTP surface
pub mod http;

/// LLM provider abstraction
pub mod llm;

/// Logging initialization
pub mod logging;

/// Process-wide counters and token accounting
pub mod metrics;

/// Tenant identity, policy, pools and the registry
pub mod tenant;
