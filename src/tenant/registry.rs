// ABOUTME: Tenant registry with atomically published configuration generations
// ABOUTME: Resolves tenant hints and manages pool lifecycles across reloads
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! # Tenant Registry
//!
//! The registry is the single source of truth for tenant identity and the
//! only process-wide mutable state. It is read-mostly: each request clones
//! an `Arc<Generation>` once and resolves everything against that snapshot,
//! so a concurrent reload can never expose a mixed configuration to a
//! request already in flight.
//!
//! Reloads build a complete new generation, swap it in atomically, and
//! drain the old generation's pools after a grace window.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{FeatureFlags, GlobalPolicy, TenantConfig, TenantRuntime};
use crate::config::tenant_file;
use crate::errors::{AppError, AppResult, ErrorCode};

/// Grace window before a retired generation's pools are closed
const DRAIN_GRACE_SECS: u64 = 60;

/// Ordered tenant identity hints extracted from one request
///
/// Resolution order: explicit header → API-key prefix → model-name prefix →
/// body field → default tenant (when policy permits). First non-empty wins.
#[derive(Debug, Default, Clone)]
pub struct TenantHint {
    /// Value of the tenant header
    pub header: Option<String>,
    /// Bearer credential, `sk-<tenant-id>` by convention
    pub api_key: Option<String>,
    /// Requested model name, `<tenant-id>-<model>` by convention
    pub model: Option<String>,
    /// `tenant_id` field from the request body
    pub body: Option<String>,
}

/// One coherent snapshot of the tenant configuration
pub struct Generation {
    /// Monotonic generation number
    pub number: u64,
    /// Global policy active for this generation
    pub policy: GlobalPolicy,
    /// Feature switches active for this generation
    pub flags: FeatureFlags,
    /// Default tenant id, when configured
    pub default_tenant: Option<String>,
    tenants: HashMap<String, Arc<TenantRuntime>>,
}

impl Generation {
    fn build(
        number: u64,
        document: tenant_file::ParsedDocument,
    ) -> AppResult<Self> {
        let mut tenants = HashMap::with_capacity(document.tenants.len());
        for config in document.tenants {
            let id = config.tenant_id.clone();
            if tenants
                .insert(id.clone(), Arc::new(TenantRuntime::new(config)))
                .is_some()
            {
                return Err(AppError::new(
                    ErrorCode::TenantDuplicate,
                    format!("tenant id '{id}' appears more than once"),
                ));
            }
        }

        if let Some(default) = &document.default_tenant {
            if !tenants.contains_key(default) {
                return Err(AppError::config(format!(
                    "default_tenant '{default}' is not among the configured tenants"
                )));
            }
        }

        Ok(Self {
            number,
            policy: document.policy,
            flags: document.flags,
            default_tenant: document.default_tenant,
            tenants,
        })
    }

    /// Look up a tenant by exact id
    #[must_use]
    pub fn get(&self, tenant_id: &str) -> Option<Arc<TenantRuntime>> {
        self.tenants.get(tenant_id).cloned()
    }

    /// All tenants in this generation, sorted by id
    #[must_use]
    pub fn tenants(&self) -> Vec<Arc<TenantRuntime>> {
        let mut all: Vec<_> = self.tenants.values().cloned().collect();
        all.sort_by(|a, b| a.config.tenant_id.cmp(&b.config.tenant_id));
        all
    }

    /// Number of configured tenants
    #[must_use]
    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    /// Whether this generation has no tenants
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Resolve a hint to a tenant runtime
    ///
    /// Idempotent: resolving the id of an already-resolved tenant returns
    /// the same runtime.
    ///
    /// # Errors
    ///
    /// `TenantRequired` when policy demands an identity and none was given;
    /// `TenantUnknown` when an explicit hint names no configured tenant.
    pub fn resolve(&self, hint: &TenantHint) -> AppResult<Arc<TenantRuntime>> {
        if let Some(id) = hint.header.as_deref().filter(|s| !s.is_empty()) {
            return self
                .get(id)
                .ok_or_else(|| AppError::tenant_unknown(id));
        }

        if let Some(key) = hint.api_key.as_deref() {
            if let Some(id) = key.strip_prefix("sk-").filter(|s| !s.is_empty()) {
                if let Some(runtime) = self.get(id) {
                    return Ok(runtime);
                }
                // A key that names no tenant is not fatal on its own: the
                // model prefix or body may still identify one.
            }
        }

        if let Some(model) = hint.model.as_deref() {
            if let Some(runtime) = self.resolve_model_prefix(model) {
                return Ok(runtime);
            }
        }

        if let Some(id) = hint.body.as_deref().filter(|s| !s.is_empty()) {
            return self
                .get(id)
                .ok_or_else(|| AppError::tenant_unknown(id));
        }

        if self.policy.security.require_tenant_header {
            return Err(AppError::new(
                ErrorCode::TenantRequired,
                "request carries no tenant identity",
            ));
        }

        if self.policy.security.default_tenant_on_missing {
            if let Some(default) = &self.default_tenant {
                if let Some(runtime) = self.get(default) {
                    return Ok(runtime);
                }
            }
        }

        Err(AppError::new(
            ErrorCode::TenantRequired,
            "no tenant identity and defaulting is disabled",
        ))
    }

    /// Match `<tenant-id>-<model>` against configured tenant ids
    fn resolve_model_prefix(&self, model: &str) -> Option<Arc<TenantRuntime>> {
        // Longest matching id wins so `company-a` beats `company` for
        // `company-a-gpt`.
        let mut best: Option<(&String, &Arc<TenantRuntime>)> = None;
        for (id, runtime) in &self.tenants {
            let prefix = format!("{id}-");
            if model.starts_with(&prefix)
                && best.map_or(true, |(current, _)| id.len() > current.len())
            {
                best = Some((id, runtime));
            }
        }
        best.map(|(_, runtime)| Arc::clone(runtime))
    }
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("number", &self.number)
            .field("tenants", &self.tenants.len())
            .finish_non_exhaustive()
    }
}

/// Process-wide tenant registry behind an atomic generation pointer
pub struct TenantRegistry {
    current: RwLock<Arc<Generation>>,
    drain_grace: Duration,
}

impl TenantRegistry {
    /// Load the registry from a configuration document on disk
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` / `TenantDuplicate` / `CredentialMissing` on
    /// a bad document.
    pub fn load_path(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::load_str(&text)
    }

    /// Load the registry from a configuration document string
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` / `TenantDuplicate` / `CredentialMissing` on
    /// a bad document.
    pub fn load_str(text: &str) -> AppResult<Self> {
        let document = tenant_file::parse(text)?;
        let generation = Generation::build(1, document)?;
        info!(
            tenants = generation.len(),
            default = generation.default_tenant.as_deref().unwrap_or("-"),
            "tenant registry loaded"
        );
        Ok(Self {
            current: RwLock::new(Arc::new(generation)),
            drain_grace: Duration::from_secs(DRAIN_GRACE_SECS),
        })
    }

    /// Override the drain grace window (tests use a short one)
    #[must_use]
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Borrow the current generation. The returned `Arc` keeps that
    /// generation's view coherent for as long as the caller holds it.
    pub async fn snapshot(&self) -> Arc<Generation> {
        self.current.read().await.clone()
    }

    /// Resolve a hint against the current generation
    ///
    /// # Errors
    ///
    /// See [`Generation::resolve`].
    pub async fn resolve(&self, hint: &TenantHint) -> AppResult<Arc<TenantRuntime>> {
        self.snapshot().await.resolve(hint)
    }

    /// Atomically swap in a new configuration generation
    ///
    /// The old generation's pools are drained in the background: requests
    /// that captured the old snapshot keep working until the grace window
    /// elapses, then the pools close.
    ///
    /// # Errors
    ///
    /// Returns a configuration error and leaves the old generation active.
    pub async fn reload_str(&self, text: &str) -> AppResult<u64> {
        let document = tenant_file::parse(text)?;

        let mut slot = self.current.write().await;
        let next_number = slot.number + 1;
        let generation = Arc::new(Generation::build(next_number, document)?);
        let retired = std::mem::replace(&mut *slot, generation);
        drop(slot);

        info!(
            generation = next_number,
            retired = retired.number,
            "tenant registry reloaded"
        );

        let grace = self.drain_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            for runtime in retired.tenants() {
                runtime.close().await;
            }
            info!(generation = retired.number, "retired generation drained");
        });

        Ok(next_number)
    }

    /// Smoke-test every tenant database (`SELECT 1`). Used by strict
    /// startup; lazy deployments skip this and connect on first use.
    ///
    /// # Errors
    ///
    /// Returns the first tenant failure encountered.
    pub async fn smoke_test_all(&self) -> AppResult<()> {
        let generation = self.snapshot().await;
        for runtime in generation.tenants() {
            if let Err(e) = runtime.smoke_test().await {
                warn!(
                    tenant = %runtime.config.tenant_id,
                    "database smoke test failed: {e}"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for TenantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantRegistry").finish_non_exhaustive()
    }
}

impl TenantRegistry {
    /// Build a registry from already-parsed parts
    ///
    /// # Errors
    ///
    /// Returns a configuration error for duplicate ids or a dangling
    /// default tenant.
    pub fn from_parts(
        tenants: Vec<TenantConfig>,
        default_tenant: Option<String>,
        policy: GlobalPolicy,
        flags: FeatureFlags,
    ) -> AppResult<Self> {
        let document = tenant_file::ParsedDocument {
            tenants,
            default_tenant,
            policy,
            flags,
        };
        let generation = Generation::build(1, document)?;
        Ok(Self {
            current: RwLock::new(Arc::new(generation)),
            drain_grace: Duration::from_secs(DRAIN_GRACE_SECS),
        })
    }
}
