// ABOUTME: Environment-derived server configuration for deployment settings
// ABOUTME: Parses ports, paths, limits and strictness flags with sane defaults
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! Process-level configuration from environment variables.
//!
//! Everything here is deployment plumbing; tenant-facing behavior lives in
//! the tenant configuration document instead.

use std::env;

use serde::{Deserialize, Serialize};

use crate::errors::AppResult;

/// Server configuration for the gateway process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen port
    pub http_port: u16,
    /// HTTP listen host
    pub host: String,
    /// Path to the tenant configuration document
    pub tenant_config_path: String,
    /// Fail startup when a tenant database or the LLM endpoint is down
    pub strict_startup: bool,
    /// Seconds of stream silence before a heartbeat chunk is emitted
    pub keep_alive_secs: u64,
    /// Schema snapshot staleness window
    pub schema_ttl_secs: u64,
    /// Byte budget for the schema summary handed to the model
    pub schema_budget_bytes: usize,
    /// Hard cap on rows returned by a generated query
    pub max_rows: usize,
    /// TTL of the LLM routing cache
    pub routing_cache_ttl_secs: u64,
    /// Bearer token guarding the admin tenant summary, when set
    pub admin_token: Option<String>,
    /// Knowledge-base retrieval service endpoint
    pub kb_service_url: Option<String>,
    /// LLM endpoint base URL override
    pub llm_base_url: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` keeps the signature stable for
    /// future validation.
    pub fn from_env() -> AppResult<Self> {
        // A missing .env file is fine; a malformed one is not worth dying for
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_env("SIAMGATE_HTTP_PORT", 8080),
            host: env::var("SIAMGATE_HOST").unwrap_or_else(|_| "0.0.0.0".to_owned()),
            tenant_config_path: env::var("SIAMGATE_TENANT_CONFIG")
                .unwrap_or_else(|_| "tenant_config.yaml".to_owned()),
            strict_startup: parse_env("SIAMGATE_STRICT_STARTUP", false),
            keep_alive_secs: parse_env("SIAMGATE_KEEPALIVE_SECS", 15),
            schema_ttl_secs: parse_env("SIAMGATE_SCHEMA_TTL_SECS", 600),
            schema_budget_bytes: parse_env("SIAMGATE_SCHEMA_BUDGET_BYTES", 4096),
            max_rows: parse_env("SIAMGATE_MAX_ROWS", 500),
            routing_cache_ttl_secs: parse_env("SIAMGATE_ROUTING_CACHE_TTL_SECS", 600),
            admin_token: env::var("SIAMGATE_ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
            kb_service_url: env::var("SIAMGATE_KB_SERVICE_URL").ok().filter(|u| !u.is_empty()),
            llm_base_url: env::var("SIAMGATE_LLM_BASE_URL").ok().filter(|u| !u.is_empty()),
        })
    }

    /// One-line startup summary for the log
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "listen={}:{} config={} strict={} max_rows={} schema_ttl={}s",
            self.host,
            self.http_port,
            self.tenant_config_path,
            self.strict_startup,
            self.max_rows,
            self.schema_ttl_secs
        )
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            host: "0.0.0.0".to_owned(),
            tenant_config_path: "tenant_config.yaml".to_owned(),
            strict_startup: false,
            keep_alive_secs: 15,
            schema_ttl_secs: 600,
            schema_budget_bytes: 4096,
            max_rows: 500,
            routing_cache_ttl_secs: 600,
            admin_token: None,
            kb_service_url: None,
            llm_base_url: None,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
