// ABOUTME: Centralized error handling and error codes for the gateway
// ABOUTME: Maps the failure taxonomy onto stable wire codes and HTTP statuses
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! # Unified Error Handling
//!
//! Every failure in the gateway is expressed as an [`AppError`] carrying an
//! [`ErrorCode`]. The code determines the HTTP status and the stable
//! `error.code` string on the wire; the message is sanitized before it
//! reaches a client, while the full detail is logged internally.

use std::fmt;

use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error as ThisError;
use tracing::warn;

/// Standard error codes used throughout the gateway
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Configuration
    /// Configuration document failed validation
    ConfigInvalid,
    /// Two tenants share the same id
    TenantDuplicate,
    /// A referenced `${VAR}` credential is not set
    CredentialMissing,

    // Identity
    /// Policy requires a tenant and none was supplied
    TenantRequired,
    /// The supplied tenant id matches no configured tenant
    TenantUnknown,
    /// The tenant exists but is not allowed to use the gateway
    TenantDisabled,
    /// Header and body named different tenants
    TenantConflict,

    // Policy
    /// The selected agent is disabled for this tenant
    AgentDisabled,
    /// A request override exceeded the tenant's bounds
    OverrideRejected,

    // Safety
    /// Generated SQL was rejected by the safety gate
    SqlRejected,
    /// Generated SQL contained a write or DDL statement
    DisallowedStatement,
    /// Generated SQL referenced a schema outside the allow-list
    ForbiddenSchema,

    // Resources
    /// The request deadline elapsed
    Timeout,
    /// The query exceeded its execution budget even after reduction
    QueryTooExpensive,
    /// No connection could be borrowed from the tenant pool
    PoolExhausted,

    // Transient upstreams
    /// The LLM provider is unreachable or returned a server error
    ProviderUnavailable,
    /// The tenant database is unreachable
    DbUnavailable,
    /// The knowledge-base service is unreachable
    KbUnavailable,

    // Client input
    /// The request body is malformed or incomplete
    BadRequest,

    // Internal
    /// An internal invariant was violated
    Internal,
}

impl ErrorCode {
    /// Stable wire code carried in `error.code`
    #[must_use]
    pub const fn wire_code(self) -> &'static str {
        match self {
            Self::ConfigInvalid | Self::TenantDuplicate | Self::CredentialMissing => {
                "invalid_configuration"
            }
            Self::TenantRequired => "tenant_required",
            Self::TenantUnknown => "tenant_unknown",
            Self::TenantDisabled => "unauthorized_tenant",
            Self::TenantConflict => "tenant_conflict",
            Self::AgentDisabled | Self::ProviderUnavailable | Self::KbUnavailable => {
                "agent_unavailable"
            }
            Self::OverrideRejected => "override_rejected",
            Self::SqlRejected | Self::DisallowedStatement | Self::ForbiddenSchema => {
                "safety_rejected"
            }
            Self::Timeout => "timeout",
            Self::QueryTooExpensive => "query_too_expensive",
            Self::PoolExhausted | Self::DbUnavailable => "database_unavailable",
            Self::BadRequest => "bad_request",
            Self::Internal => "internal",
        }
    }

    /// HTTP status code for this error
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::BadRequest | Self::TenantConflict | Self::OverrideRejected => 400,
            Self::TenantRequired => 401,
            Self::TenantDisabled => 403,
            Self::TenantUnknown => 404,
            Self::SqlRejected | Self::DisallowedStatement | Self::ForbiddenSchema => 422,
            Self::ProviderUnavailable | Self::DbUnavailable | Self::KbUnavailable => 502,
            Self::AgentDisabled | Self::PoolExhausted => 503,
            Self::Timeout | Self::QueryTooExpensive => 504,
            Self::ConfigInvalid
            | Self::TenantDuplicate
            | Self::CredentialMissing
            | Self::Internal => 500,
        }
    }

    /// Generic description safe to show a client
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::ConfigInvalid => "Configuration document is invalid",
            Self::TenantDuplicate => "Duplicate tenant id in configuration",
            Self::CredentialMissing => "A required credential is not configured",
            Self::TenantRequired => "A tenant identity is required for this request",
            Self::TenantUnknown => "The requested tenant is not configured",
            Self::TenantDisabled => "The requested tenant is not permitted",
            Self::TenantConflict => "Conflicting tenant identities in the request",
            Self::AgentDisabled => "No agent is available for this request",
            Self::OverrideRejected => "A request setting exceeds the tenant's limits",
            Self::SqlRejected => "The generated query was rejected by the safety policy",
            Self::DisallowedStatement => "Only read-only SELECT queries are permitted",
            Self::ForbiddenSchema => "The query referenced a schema outside the tenant scope",
            Self::Timeout => "The request did not complete within its deadline",
            Self::QueryTooExpensive => "The query is too expensive to execute",
            Self::PoolExhausted => "No database connection is currently available",
            Self::ProviderUnavailable => "The language model service is unavailable",
            Self::DbUnavailable => "The tenant database is unavailable",
            Self::KbUnavailable => "The knowledge-base service is unavailable",
            Self::BadRequest => "The request is malformed",
            Self::Internal => "An internal error occurred",
        }
    }

    /// Whether a failure with this code may be retried against another agent
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable
                | Self::DbUnavailable
                | Self::KbUnavailable
                | Self::PoolExhausted
        )
    }
}

/// Application error type carrying a code and an internal message
#[derive(Debug, Clone, ThisError)]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Internal, possibly sensitive message
    pub message: String,
    /// Request id for tracing, when known
    pub request_id: Option<String>,
}

impl AppError {
    /// Create a new error with the given code and message
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: None,
        }
    }

    /// Attach a request id for tracing
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// HTTP status for this error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Message safe for client exposure
    ///
    /// Client-attributable failures keep their message (it names the rule
    /// or field at fault); everything else collapses to the generic
    /// description so that internals never leak.
    #[must_use]
    pub fn sanitized_message(&self) -> String {
        match self.code {
            ErrorCode::BadRequest
            | ErrorCode::TenantConflict
            | ErrorCode::TenantRequired
            | ErrorCode::TenantUnknown
            | ErrorCode::OverrideRejected
            | ErrorCode::SqlRejected
            | ErrorCode::DisallowedStatement
            | ErrorCode::ForbiddenSchema => self.message.clone(),
            _ => self.code.description().to_owned(),
        }
    }

    /// Full detail for internal logging; never send to a client
    #[must_use]
    pub fn internal_details(&self) -> String {
        format!("{:?}: {}", self.code, self.message)
    }

    /// Missing or malformed request input
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// Unknown tenant id
    #[must_use]
    pub fn tenant_unknown(tenant_id: &str) -> Self {
        Self::new(
            ErrorCode::TenantUnknown,
            format!("tenant '{tenant_id}' is not configured"),
        )
    }

    /// Invalid configuration document
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalid, message)
    }

    /// Internal invariant violation
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Deadline exceeded
    #[must_use]
    pub fn timeout(context: &str) -> Self {
        Self::new(ErrorCode::Timeout, format!("{context} deadline elapsed"))
    }

    /// LLM provider failure
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProviderUnavailable, message)
    }

    /// Tenant database failure
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DbUnavailable, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.wire_code(), self.message)
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// Wire shape of an error response: `{"error": {"code", "message"}}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error envelope
    pub error: ErrorBody,
}

/// Inner error object
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Stable machine-readable code
    pub code: &'static str,
    /// Sanitized human-readable message
    pub message: String,
    /// Request id for support correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        // Log full details internally before sanitizing
        warn!("gateway error: {}", error.internal_details());

        Self {
            error: ErrorBody {
                code: error.code.wire_code(),
                message: error.sanitized_message(),
                request_id: error.request_id.clone(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        use axum::http::StatusCode;
        use axum::Json;

        let status = StatusCode::from_u16(self.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse::from(self);

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::bad_request(format!("JSON error: {error}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::PoolTimedOut => Self::new(
                ErrorCode::PoolExhausted,
                "timed out waiting for a pooled connection",
            ),
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                Self::database(format!("connection failed: {error}"))
            }
            _ => Self::database(format!("database operation failed: {error}")),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        Self::provider(format!("request failed: {error}"))
    }
}
