// ABOUTME: Tenant configuration document parsing and validation
// ABOUTME: Expands ${VAR} references before decoding and checks required fields
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! The tenant configuration document.
//!
//! A single YAML file declares every tenant (database credentials,
//! knowledge-base binding, settings, webhooks, contact info), the global
//! policy and the feature flags. `${NAME}` references in string values are
//! expanded from the process environment before validation so credentials
//! never live in the file itself.

use std::collections::BTreeMap;
use std::env;

use serde::Deserialize;
use serde_yaml::Value;

use crate::errors::{AppError, AppResult, ErrorCode};
use crate::tenant::{FeatureFlags, GlobalPolicy, TenantConfig};

/// Fully parsed and validated configuration document
#[derive(Debug)]
pub struct ParsedDocument {
    /// Tenant configurations with ids assigned
    pub tenants: Vec<TenantConfig>,
    /// Default tenant id, when declared
    pub default_tenant: Option<String>,
    /// Global policy
    pub policy: GlobalPolicy,
    /// Feature flags
    pub flags: FeatureFlags,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    default_tenant: Option<String>,
    #[serde(default)]
    tenants: BTreeMap<String, TenantConfig>,
    #[serde(default)]
    global_settings: GlobalPolicy,
    #[serde(default)]
    feature_flags: FeatureFlags,
}

/// Parse a configuration document
///
/// # Errors
///
/// `ConfigInvalid` for YAML or structural failures, `CredentialMissing` for
/// unresolvable `${VAR}` references, `TenantDuplicate` for colliding ids.
pub fn parse(text: &str) -> AppResult<ParsedDocument> {
    let mut value: Value = serde_yaml::from_str(text)
        .map_err(|e| AppError::config(format!("invalid YAML: {e}")))?;

    interpolate(&mut value)?;

    let raw: RawDocument = serde_yaml::from_value(value)
        .map_err(|e| AppError::config(format!("invalid configuration document: {e}")))?;

    if raw.tenants.is_empty() {
        return Err(AppError::config("no tenants configured"));
    }

    let mut tenants = Vec::with_capacity(raw.tenants.len());
    for (id, mut config) in raw.tenants {
        if id.trim().is_empty() {
            return Err(AppError::config("tenant id must not be empty"));
        }
        config.tenant_id = id;
        config.validate()?;
        tenants.push(config);
    }

    Ok(ParsedDocument {
        tenants,
        default_tenant: raw.default_tenant,
        policy: raw.global_settings,
        flags: raw.feature_flags,
    })
}

/// Expand `${NAME}` references in every string leaf
fn interpolate(value: &mut Value) -> AppResult<()> {
    match value {
        Value::String(s) => {
            if s.contains("${") {
                *s = expand(s)?;
            }
            Ok(())
        }
        Value::Sequence(items) => items.iter_mut().try_for_each(interpolate),
        Value::Mapping(map) => map.values_mut().try_for_each(interpolate),
        _ => Ok(()),
    }
}

fn expand(input: &str) -> AppResult<String> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(AppError::config(format!(
                "unterminated ${{..}} reference in '{input}'"
            )));
        };
        let name = &after[..end];
        let value = env::var(name).map_err(|_| {
            AppError::new(
                ErrorCode::CredentialMissing,
                format!("environment variable '{name}' referenced by configuration is not set"),
            )
        })?;
        output.push_str(&value);
        rest = &after[end + 1..];
    }
    output.push_str(rest);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r"
default_tenant: company-a
tenants:
  company-a:
    name: Company A
    database:
      host: db-a
      database: tenant_a
      user: gateway
      password: secret
";

    #[test]
    fn minimal_document_parses() {
        let doc = parse(MINIMAL).unwrap();
        assert_eq!(doc.tenants.len(), 1);
        assert_eq!(doc.tenants[0].tenant_id, "company-a");
        assert_eq!(doc.tenants[0].database.port, 5432);
        assert_eq!(doc.default_tenant.as_deref(), Some("company-a"));
        assert_eq!(doc.policy.retry_count, 3);
        assert!(doc.flags.enable_streaming_responses);
    }

    #[test]
    fn env_references_are_expanded() {
        env::set_var("TENANT_FILE_TEST_PW", "hunter2");
        let text = MINIMAL.replace("password: secret", "password: ${TENANT_FILE_TEST_PW}");
        let doc = parse(&text).unwrap();
        assert_eq!(doc.tenants[0].database.password, "hunter2");
    }

    #[test]
    fn missing_env_reference_is_credential_missing() {
        let text = MINIMAL.replace("password: secret", "password: ${TENANT_FILE_TEST_UNSET}");
        let err = parse(&text).unwrap_err();
        assert_eq!(err.code, ErrorCode::CredentialMissing);
    }

    #[test]
    fn empty_password_is_rejected() {
        let text = MINIMAL.replace("password: secret", "password: \"\"");
        let err = parse(&text).unwrap_err();
        assert_eq!(err.code, ErrorCode::CredentialMissing);
    }

    #[test]
    fn empty_document_is_rejected() {
        let err = parse("tenants: {}").unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalid);
    }

    #[test]
    fn settings_defaults_apply() {
        let doc = parse(MINIMAL).unwrap();
        let settings = &doc.tenants[0].settings;
        assert_eq!(settings.max_tokens, 1000);
        assert!(settings.enable_postgres_agent);
        assert!(settings.enable_knowledge_base_agent);
    }
}
