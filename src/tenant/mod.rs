// ABOUTME: Multi-tenant identity, policy and per-tenant runtime state
// ABOUTME: Defines the frozen tenant configuration and its lazily-built resources
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! # Multi-Tenant Core
//!
//! A tenant is an isolated customer scope: its own database, knowledge-base
//! binding, policy and credentials. [`TenantConfig`] is immutable after
//! load; [`TenantRuntime`] wraps it with the lazily-constructed connection
//! pool and schema cache. The registry (see [`registry`]) owns all runtimes
//! and publishes them as coherent generations.

pub mod pool;
pub mod registry;

pub use registry::{Generation, TenantHint, TenantRegistry};

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::OnceCell;

use crate::agents::postgres::schema::SchemaCache;
use crate::agents::AgentSelection;
use crate::errors::{AppError, AppResult, ErrorCode};

/// Database connection settings for one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database host
    pub host: String,
    /// Database port
    #[serde(default = "default_pg_port")]
    pub port: u16,
    /// Database name
    pub database: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size (default 10)
    #[serde(default)]
    pub pool_size: Option<u32>,
}

const fn default_pg_port() -> u16 {
    5432
}

/// Knowledge-base search mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchType {
    /// Pure vector search
    Semantic,
    /// Vector + keyword search
    Hybrid,
}

impl Default for SearchType {
    fn default() -> Self {
        Self::Semantic
    }
}

impl SearchType {
    /// Wire form for the retrieval service
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "SEMANTIC",
            Self::Hybrid => "HYBRID",
        }
    }
}

/// Knowledge-base binding for one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseBinding {
    /// Knowledge-base id at the retrieval service
    pub id: String,
    /// Tenant prefix inside the index
    pub prefix: String,
    /// Backing bucket name
    #[serde(default)]
    pub bucket: Option<String>,
    /// Bucket region
    #[serde(default)]
    pub region: Option<String>,
    /// Search mode
    #[serde(default)]
    pub search_type: SearchType,
    /// Maximum passages per retrieval
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

const fn default_max_results() -> u32 {
    10
}

/// Answer language for a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseLanguage {
    /// Thai
    Th,
    /// English
    En,
}

impl Default for ResponseLanguage {
    fn default() -> Self {
        Self::Th
    }
}

/// Per-tenant generation and agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSettings {
    /// Maximum tokens the tenant may generate per answer
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Preferred agent when the request does not name one
    #[serde(default)]
    pub default_agent_type: AgentSelection,
    /// Language answers are rendered in
    #[serde(default)]
    pub response_language: ResponseLanguage,
    /// Structured SQL agent enabled
    #[serde(default = "default_true")]
    pub enable_postgres_agent: bool,
    /// Knowledge-base agent enabled
    #[serde(default = "default_true")]
    pub enable_knowledge_base_agent: bool,
    /// Generative fallback agent enabled
    #[serde(default = "default_true")]
    pub enable_fallback_agent: bool,
}

const fn default_max_tokens() -> u32 {
    1000
}

const fn default_temperature() -> f32 {
    0.7
}

const fn default_true() -> bool {
    true
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            default_agent_type: AgentSelection::default(),
            response_language: ResponseLanguage::default(),
            enable_postgres_agent: true,
            enable_knowledge_base_agent: true,
            enable_fallback_agent: true,
        }
    }
}

/// Immutable configuration for a single tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Opaque tenant id (the key in the configuration document)
    #[serde(skip)]
    pub tenant_id: String,
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Database connection settings
    pub database: DatabaseSettings,
    /// Knowledge-base binding, when retrieval is configured
    #[serde(default)]
    pub knowledge_base: Option<KnowledgeBaseBinding>,
    /// API keys (e.g. `llm`)
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
    /// Generation and agent settings
    #[serde(default)]
    pub settings: TenantSettings,
    /// Model identifier pinned for this tenant
    #[serde(default)]
    pub model: Option<String>,
    /// Webhook endpoints for the external orchestrator. Parsed and
    /// retained; the gateway itself never posts to them.
    #[serde(default)]
    pub webhooks: HashMap<String, String>,
    /// Contact information surfaced by the admin summary
    #[serde(default)]
    pub contact_info: HashMap<String, String>,
}

impl TenantConfig {
    /// Validate required fields after parsing
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` or `CredentialMissing` naming the field.
    pub fn validate(&self) -> AppResult<()> {
        for (field, value) in [
            ("database.host", &self.database.host),
            ("database.database", &self.database.database),
            ("database.user", &self.database.user),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::config(format!(
                    "tenant '{}': {field} must not be empty",
                    self.tenant_id
                )));
            }
        }
        if self.database.password.is_empty() {
            return Err(AppError::new(
                ErrorCode::CredentialMissing,
                format!("tenant '{}': database.password is empty", self.tenant_id),
            ));
        }
        if let Some(kb) = &self.knowledge_base {
            if kb.id.trim().is_empty() {
                return Err(AppError::config(format!(
                    "tenant '{}': knowledge_base.id must not be empty",
                    self.tenant_id
                )));
            }
        }
        Ok(())
    }
}

/// Security section of the global policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Reject requests that carry no tenant identity at all
    #[serde(default)]
    pub require_tenant_header: bool,
    /// Fall back to the default tenant when no identity is supplied
    #[serde(default = "default_true")]
    pub default_tenant_on_missing: bool,
    /// Header carrying the tenant id
    #[serde(default = "default_tenant_header")]
    pub tenant_header_name: String,
}

fn default_tenant_header() -> String {
    "X-Tenant-ID".to_owned()
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            require_tenant_header: false,
            default_tenant_on_missing: true,
            tenant_header_name: default_tenant_header(),
        }
    }
}

/// Logging section of the global policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingPolicy {
    /// Default log level when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log generated SQL at info level
    #[serde(default)]
    pub log_queries: bool,
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Default for LoggingPolicy {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_queries: false,
        }
    }
}

/// Cloud model settings shared across tenants
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsPolicy {
    /// Region of the hosted model and knowledge bases
    #[serde(default)]
    pub region: Option<String>,
    /// Hosted model id used when a tenant pins none
    #[serde(default)]
    pub bedrock_model: Option<String>,
}

/// Immutable process-wide policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalPolicy {
    /// Agent of last resort
    #[serde(default = "default_fallback_agent")]
    pub fallback_agent: String,
    /// Total agent attempts per request
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Global per-request deadline
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Security settings
    #[serde(default)]
    pub security: SecurityPolicy,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingPolicy,
    /// Cloud model settings
    #[serde(default)]
    pub aws: AwsPolicy,
}

const fn default_retry_count() -> u32 {
    3
}

const fn default_timeout_seconds() -> u64 {
    60
}

fn default_fallback_agent() -> String {
    "fallback".to_owned()
}

impl Default for GlobalPolicy {
    fn default() -> Self {
        Self {
            fallback_agent: default_fallback_agent(),
            retry_count: default_retry_count(),
            timeout_seconds: default_timeout_seconds(),
            security: SecurityPolicy::default(),
            logging: LoggingPolicy::default(),
            aws: AwsPolicy::default(),
        }
    }
}

/// Deployment-wide feature switches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Allow HYBRID knowledge-base search
    #[serde(default = "default_true")]
    pub enable_hybrid_search: bool,
    /// Allow `stream=true` responses
    #[serde(default = "default_true")]
    pub enable_streaming_responses: bool,
    /// Forward prior conversation turns to agents
    #[serde(default)]
    pub enable_conversation_history: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_hybrid_search: true,
            enable_streaming_responses: true,
            enable_conversation_history: false,
        }
    }
}

/// A tenant's configuration plus its lazily-constructed resources
///
/// Owned exclusively by the registry. The pool is created on first SQL-agent
/// use and closed when the runtime's generation is retired.
pub struct TenantRuntime {
    /// Frozen configuration
    pub config: Arc<TenantConfig>,
    pool: OnceCell<PgPool>,
    schema_cache: SchemaCache,
}

impl TenantRuntime {
    /// Wrap a frozen configuration
    #[must_use]
    pub fn new(config: TenantConfig) -> Self {
        Self {
            config: Arc::new(config),
            pool: OnceCell::new(),
            schema_cache: SchemaCache::new(),
        }
    }

    /// Borrow the tenant's connection pool, constructing it on first use
    ///
    /// # Errors
    ///
    /// Returns `DbUnavailable` if the pool cannot be created.
    pub async fn pool(&self) -> AppResult<&PgPool> {
        self.pool
            .get_or_try_init(|| pool::build_pool(&self.config))
            .await
    }

    /// Whether the pool has been constructed yet
    #[must_use]
    pub fn pool_initialized(&self) -> bool {
        self.pool.initialized()
    }

    /// The tenant's schema snapshot cache
    #[must_use]
    pub const fn schema_cache(&self) -> &SchemaCache {
        &self.schema_cache
    }

    /// Close the pool if it was ever created. Called when the generation
    /// holding this runtime is retired.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }

    /// Cheap connectivity probe (`SELECT 1`) against the tenant database
    ///
    /// # Errors
    ///
    /// Returns `DbUnavailable` when the database cannot be reached.
    pub async fn smoke_test(&self) -> AppResult<()> {
        let pool = self.pool().await?;
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }
}

impl std::fmt::Debug for TenantRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantRuntime")
            .field("tenant_id", &self.config.tenant_id)
            .field("pool_initialized", &self.pool_initialized())
            .finish_non_exhaustive()
    }
}
