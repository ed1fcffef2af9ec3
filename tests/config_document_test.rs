// ABOUTME: Integration tests for the full tenant configuration document
// ABOUTME: Covers the complete shape, env interpolation and feature flags
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use siamgate::config::tenant_file;
use siamgate::errors::ErrorCode;
use siamgate::tenant::SearchType;

const FULL_DOCUMENT: &str = r"
default_tenant: company-a
tenants:
  company-a:
    name: Company A
    description: Bangkok head office
    model: llama3.1:8b
    database:
      host: postgres-company-a
      port: 5433
      database: tenant_a
      user: gateway
      password: ${CONFIG_DOC_TEST_PASSWORD}
      pool_size: 5
    knowledge_base:
      id: KB-A
      prefix: company-a
      bucket: kb-company-a
      region: ap-southeast-1
      search_type: HYBRID
      max_results: 8
    api_keys:
      llm: sk-internal-a
    settings:
      max_tokens: 1200
      temperature: 0.6
      default_agent_type: auto
      response_language: th
      enable_postgres_agent: true
      enable_knowledge_base_agent: true
    webhooks:
      orchestrator: http://n8n:5678/webhook/company-a-chat
      health_check: http://n8n:5678/webhook/company-a-health
    contact_info:
      email: info@company-a.example
      phone: 02-123-4567
global_settings:
  fallback_agent: fallback
  retry_count: 4
  timeout_seconds: 90
  security:
    require_tenant_header: true
    default_tenant_on_missing: false
    tenant_header_name: X-Org-ID
  logging:
    level: debug
    log_queries: true
  aws:
    region: ap-southeast-1
    bedrock_model: anthropic.claude-3
feature_flags:
  enable_hybrid_search: false
  enable_streaming_responses: true
  enable_conversation_history: true
";

#[test]
fn full_document_round_trips() {
    std::env::set_var("CONFIG_DOC_TEST_PASSWORD", "interpolated-pw");
    let doc = tenant_file::parse(FULL_DOCUMENT).unwrap();

    let tenant = &doc.tenants[0];
    assert_eq!(tenant.tenant_id, "company-a");
    assert_eq!(tenant.database.port, 5433);
    assert_eq!(tenant.database.password, "interpolated-pw");
    assert_eq!(tenant.database.pool_size, Some(5));

    let kb = tenant.knowledge_base.as_ref().unwrap();
    assert_eq!(kb.search_type, SearchType::Hybrid);
    assert_eq!(kb.max_results, 8);
    assert_eq!(kb.bucket.as_deref(), Some("kb-company-a"));

    assert_eq!(tenant.api_keys.get("llm").unwrap(), "sk-internal-a");
    assert_eq!(
        tenant.webhooks.get("orchestrator").unwrap(),
        "http://n8n:5678/webhook/company-a-chat"
    );
    assert_eq!(tenant.contact_info.get("phone").unwrap(), "02-123-4567");
    assert_eq!(tenant.settings.max_tokens, 1200);

    assert_eq!(doc.policy.retry_count, 4);
    assert_eq!(doc.policy.timeout_seconds, 90);
    assert!(doc.policy.security.require_tenant_header);
    assert_eq!(doc.policy.security.tenant_header_name, "X-Org-ID");
    assert!(doc.policy.logging.log_queries);
    assert_eq!(
        doc.policy.aws.bedrock_model.as_deref(),
        Some("anthropic.claude-3")
    );

    assert!(!doc.flags.enable_hybrid_search);
    assert!(doc.flags.enable_conversation_history);
}

#[test]
fn unterminated_reference_is_config_invalid() {
    let broken = FULL_DOCUMENT.replace("${CONFIG_DOC_TEST_PASSWORD}", "${UNCLOSED");
    let err = tenant_file::parse(&broken).unwrap_err();
    assert_eq!(err.code, ErrorCode::ConfigInvalid);
}

#[test]
fn invalid_search_type_is_rejected() {
    std::env::set_var("CONFIG_DOC_TEST_PASSWORD", "pw");
    let broken = FULL_DOCUMENT.replace("search_type: HYBRID", "search_type: FUZZY");
    let err = tenant_file::parse(&broken).unwrap_err();
    assert_eq!(err.code, ErrorCode::ConfigInvalid);
}
