// ABOUTME: Natural-language to SQL agent against the tenant database
// ABOUTME: Generates, gates, executes and renders queries with strict bounds
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! # PostgreSQL Agent
//!
//! The pipeline: acquire a schema snapshot, prompt the model for a
//! parameterized query, pass it through the safety gate, execute it inside
//! a read-only bounded transaction, and render the result in the tenant's
//! language. A gate rejection re-prompts the model once with the failing
//! reason; a second rejection is fatal. A statement timeout retries once
//! with a reduced row budget before surfacing `QueryTooExpensive`.

pub mod render;
pub mod safety;
pub mod schema;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};
use tracing::{debug, info, warn};

use self::render::{clarification_prompt, render_answer, QueryResult};
use self::safety::{GatedQuery, SafetyGate};
use super::{AgentAnswer, AgentContext, AgentKind, AgentOutcome, QueryAgent};
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::llm::{ChatMessage, CompletionRequest, TokenUsage};
use crate::tenant::TenantConfig;

/// Sub-deadline for a single query execution
const EXECUTION_BUDGET_SECS: u64 = 30;
/// Lock acquisition budget inside the transaction
const LOCK_TIMEOUT_SECS: u64 = 2;
/// Row budget used for the reduced retry after a statement timeout
const REDUCED_ROW_BUDGET: usize = 50;

/// Postgres error code for a cancelled statement (timeout)
const PG_QUERY_CANCELED: &str = "57014";
/// Postgres error codes that suggest the schema snapshot is stale
const PG_UNDEFINED_TABLE: &str = "42P01";
const PG_UNDEFINED_COLUMN: &str = "42703";

/// The structured output requested from the model
#[derive(Debug, Deserialize)]
struct GeneratedQuery {
    sql: String,
    #[serde(default)]
    params: Vec<Value>,
    #[serde(default)]
    #[allow(dead_code)]
    rationale: Option<String>,
}

/// Natural-language SQL agent
#[derive(Debug, Default)]
pub struct PostgresAgent;

impl PostgresAgent {
    /// Create the agent
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn run(&self, question: &str, ctx: &AgentContext<'_>) -> AppResult<AgentOutcome> {
        let pool = ctx.runtime.pool().await?.clone();

        let snapshot = ctx
            .runtime
            .schema_cache()
            .snapshot(&pool, Duration::from_secs(ctx.server.schema_ttl_secs))
            .await?;

        let summary = snapshot.summary(question, ctx.server.schema_budget_bytes);
        let gate = SafetyGate::new(snapshot.schema_names(), ctx.server.max_rows);

        let mut usage_total: Option<TokenUsage> = None;
        let mut rejection: Option<AppError> = None;

        // One generation plus one corrective re-prompt carrying the
        // rejection reason; a second rejection surfaces as fatal.
        for attempt in 0..2 {
            let (content, usage) = self
                .generate(question, &summary, ctx, rejection.as_ref())
                .await?;
            accumulate_usage(&mut usage_total, usage);

            let generated = match serde_json::from_str::<GeneratedQuery>(strip_code_fences(
                &content,
            )) {
                Ok(generated) => generated,
                Err(e) => {
                    ctx.metrics.record_safety_rejection();
                    rejection = Some(AppError::new(
                        ErrorCode::SqlRejected,
                        format!("model did not return a valid query object: {e}"),
                    ));
                    continue;
                }
            };

            let gated = match gate.check(&generated.sql, generated.params.len()) {
                Ok(gated) => gated,
                Err(error) => {
                    ctx.metrics.record_safety_rejection();
                    warn!(
                        tenant = %ctx.config().tenant_id,
                        attempt,
                        "safety gate rejected generated SQL: {}",
                        error.internal_details()
                    );
                    rejection = Some(error);
                    continue;
                }
            };

            if ctx.policy.logging.log_queries {
                info!(
                    tenant = %ctx.config().tenant_id,
                    sql = %gated.sql,
                    "executing generated query"
                );
            } else {
                debug!(tenant = %ctx.config().tenant_id, "executing generated query");
            }

            let result = self
                .execute(&pool, &gated, &generated.params, ctx)
                .await?;

            return Ok(self.render(question, result, &gated, &generated.params, usage_total, ctx));
        }

        // Both generations were rejected
        let cause = rejection
            .unwrap_or_else(|| AppError::new(ErrorCode::SqlRejected, "no query generated"));
        Ok(AgentOutcome::Fatal(cause))
    }

    /// Ask the model for a structured `{sql, params, rationale}` object,
    /// returning its raw reply for the caller to parse
    async fn generate(
        &self,
        question: &str,
        schema_summary: &str,
        ctx: &AgentContext<'_>,
        rejection: Option<&AppError>,
    ) -> AppResult<(String, Option<TokenUsage>)> {
        let language = match ctx.config().settings.response_language {
            crate::tenant::ResponseLanguage::Th => "Thai",
            crate::tenant::ResponseLanguage::En => "English",
        };

        let system = "You translate business questions into PostgreSQL queries. \
            Reply with a single JSON object {\"sql\": string, \"params\": array, \"rationale\": string} \
            and nothing else. Rules: exactly one SELECT statement (a read-only CTE ending in SELECT \
            is allowed); never INSERT, UPDATE, DELETE or any DDL; never embed string or numeric \
            literals in comparisons or IN lists, every such value must be a $1-style placeholder \
            with its value in params, in order; use only the tables and columns listed in the \
            schema."
            .to_owned();

        let mut user = format!(
            "Database schema:\n{schema_summary}\n\nQuestion ({language}): {question}"
        );
        if let Some(error) = rejection {
            user.push_str(&format!(
                "\n\nYour previous query was rejected: {}. Generate a corrected query.",
                error.sanitized_message()
            ));
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(system),
            ChatMessage::user(user),
        ])
        .with_temperature(0.0)
        .with_max_tokens(600);

        let response = ctx.complete(&request).await?;
        Ok((response.content, response.usage))
    }

    /// Execute inside a read-only transaction with statement and lock
    /// timeouts; retry once with a reduced row budget on timeout.
    async fn execute(
        &self,
        pool: &sqlx::PgPool,
        gated: &GatedQuery,
        params: &[Value],
        ctx: &AgentContext<'_>,
    ) -> AppResult<QueryResult> {
        match self.execute_once(pool, &gated.sql, params, ctx).await {
            Ok(result) => Ok(result),
            Err(error) if is_statement_timeout(&error) => {
                warn!(
                    tenant = %ctx.config().tenant_id,
                    "statement timed out, retrying with a reduced row budget"
                );
                let reduced = format!(
                    "SELECT * FROM ({}) AS reduced_rows LIMIT {REDUCED_ROW_BUDGET}",
                    gated.sql
                );
                self.execute_once(pool, &reduced, params, ctx)
                    .await
                    .map_err(|retry_error| {
                        if is_statement_timeout(&retry_error) {
                            AppError::new(
                                ErrorCode::QueryTooExpensive,
                                "query exceeded its execution budget even with a reduced row budget",
                            )
                        } else {
                            retry_error
                        }
                    })
            }
            Err(error) => Err(error),
        }
    }

    async fn execute_once(
        &self,
        pool: &sqlx::PgPool,
        sql: &str,
        params: &[Value],
        ctx: &AgentContext<'_>,
    ) -> AppResult<QueryResult> {
        let budget = ctx
            .remaining()
            .min(Duration::from_secs(EXECUTION_BUDGET_SECS));
        if budget.is_zero() {
            return Err(AppError::timeout("sql execution"));
        }

        let statement_ms = budget.as_millis().min(u128::from(EXECUTION_BUDGET_SECS * 1000));
        let max_rows = ctx.server.max_rows;
        let outcome = tokio::time::timeout(budget, async {
            let mut tx = pool.begin().await?;
            // Session defaults already force read-only; LOCAL settings pin
            // this transaction's budgets.
            sqlx::query(&format!("SET LOCAL statement_timeout = '{statement_ms}ms'"))
                .execute(&mut *tx)
                .await?;
            sqlx::query(&format!("SET LOCAL lock_timeout = '{LOCK_TIMEOUT_SECS}s'"))
                .execute(&mut *tx)
                .await?;

            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_value(query, param);
            }
            let rows = query.fetch_all(&mut *tx).await?;
            tx.commit().await?;
            Ok::<Vec<PgRow>, sqlx::Error>(rows)
        })
        .await
        .map_err(|_| AppError::timeout("sql execution"))?;

        let rows = match outcome {
            Ok(rows) => rows,
            Err(error) => return Err(self.classify_db_error(error, ctx).await),
        };

        ctx.metrics.record_sql_executed();
        Ok(decode_rows(&rows, max_rows))
    }

    /// Map database errors onto the taxonomy, invalidating the schema
    /// cache when the failure suggests DDL drift.
    async fn classify_db_error(&self, error: sqlx::Error, ctx: &AgentContext<'_>) -> AppError {
        if let sqlx::Error::Database(db_error) = &error {
            match db_error.code().as_deref() {
                Some(PG_QUERY_CANCELED) => {
                    return AppError::new(
                        ErrorCode::QueryTooExpensive,
                        "statement timeout elapsed",
                    );
                }
                Some(PG_UNDEFINED_TABLE | PG_UNDEFINED_COLUMN) => {
                    ctx.runtime.schema_cache().invalidate().await;
                    return AppError::database(format!(
                        "schema drift detected: {}",
                        db_error.message()
                    ));
                }
                _ => {}
            }
        }
        error.into()
    }

    /// Render the capped result, or a clarifying question when it is empty
    /// and the parameters hint at a misunderstood date range.
    fn render(
        &self,
        _question: &str,
        result: QueryResult,
        gated: &GatedQuery,
        params: &[Value],
        usage: Option<TokenUsage>,
        ctx: &AgentContext<'_>,
    ) -> AgentOutcome {
        let settings = &ctx.config().settings;

        if result.rows.is_empty() && params.iter().any(looks_like_date) {
            let reason = match settings.response_language {
                crate::tenant::ResponseLanguage::Th => "ไม่มีข้อมูลในช่วงเวลาที่ระบุ",
                crate::tenant::ResponseLanguage::En => "no data exists for the requested period",
            };
            let content = clarification_prompt(settings.response_language, reason);
            return AgentOutcome::Success(
                AgentAnswer::new(AgentKind::Postgres, content)
                    .with_usage(usage)
                    .as_clarification(),
            );
        }

        let content = render_answer(
            &result,
            &ctx.config().name,
            settings.response_language,
            &gated.referenced_tables,
            ctx.server.max_rows,
        );
        AgentOutcome::Success(AgentAnswer::new(AgentKind::Postgres, content).with_usage(usage))
    }
}

#[async_trait]
impl QueryAgent for PostgresAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Postgres
    }

    fn is_enabled(&self, tenant: &TenantConfig) -> bool {
        tenant.settings.enable_postgres_agent
    }

    async fn answer(&self, question: &str, ctx: &AgentContext<'_>) -> AgentOutcome {
        match self.run(question, ctx).await {
            Ok(outcome) => outcome,
            Err(error) => AgentOutcome::from_error(error),
        }
    }
}

/// Bind one JSON parameter value with its natural Postgres type
fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(other.to_string()),
    }
}

/// Decode rows to JSON values, applying the row cap
fn decode_rows(rows: &[PgRow], max_rows: usize) -> QueryResult {
    let columns: Vec<String> = rows.first().map_or_else(Vec::new, |row| {
        row.columns().iter().map(|c| c.name().to_owned()).collect()
    });

    let truncated = rows.len() > max_rows;
    let decoded = rows
        .iter()
        .take(max_rows)
        .map(|row| {
            (0..row.columns().len())
                .map(|index| decode_column(row, index))
                .collect()
        })
        .collect();

    QueryResult {
        columns,
        rows: decoded,
        truncated,
    }
}

/// Decode one column to a JSON value by its Postgres type name
fn decode_column(row: &PgRow, index: usize) -> Value {
    let type_name = row.columns()[index].type_info().name().to_uppercase();
    match type_name.as_str() {
        "BOOL" => opt(row.try_get::<Option<bool>, _>(index)),
        "INT2" => opt(row.try_get::<Option<i16>, _>(index).map(|v| v.map(i64::from))),
        "INT4" => opt(row.try_get::<Option<i32>, _>(index).map(|v| v.map(i64::from))),
        "INT8" => opt(row.try_get::<Option<i64>, _>(index)),
        "FLOAT4" => opt(row.try_get::<Option<f32>, _>(index).map(|v| v.map(f64::from))),
        "FLOAT8" => opt(row.try_get::<Option<f64>, _>(index)),
        "NUMERIC" => row
            .try_get::<Option<sqlx::types::BigDecimal>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |decimal| {
                let text = decimal.to_string();
                text.parse::<serde_json::Number>()
                    .map_or(Value::String(text), Value::Number)
            }),
        "DATE" => opt(row
            .try_get::<Option<chrono::NaiveDate>, _>(index)
            .map(|v| v.map(|d| d.to_string()))),
        "TIME" => opt(row
            .try_get::<Option<chrono::NaiveTime>, _>(index)
            .map(|v| v.map(|t| t.to_string()))),
        "TIMESTAMP" => opt(row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)
            .map(|v| v.map(|t| t.to_string()))),
        "TIMESTAMPTZ" => opt(row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .map(|v| v.map(|t| t.to_rfc3339()))),
        "UUID" => opt(row
            .try_get::<Option<uuid::Uuid>, _>(index)
            .map(|v| v.map(|u| u.to_string()))),
        "JSON" | "JSONB" => row
            .try_get::<Option<Value>, _>(index)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        _ => opt(row.try_get::<Option<String>, _>(index)),
    }
}

fn opt<T: Into<Value>>(result: Result<Option<T>, sqlx::Error>) -> Value {
    result.ok().flatten().map_or(Value::Null, Into::into)
}

fn accumulate_usage(total: &mut Option<TokenUsage>, usage: Option<TokenUsage>) {
    if let Some(usage) = usage {
        match total {
            Some(existing) => {
                existing.prompt_tokens += usage.prompt_tokens;
                existing.completion_tokens += usage.completion_tokens;
                existing.total_tokens += usage.total_tokens;
            }
            None => *total = Some(usage),
        }
    }
}

fn is_statement_timeout(error: &AppError) -> bool {
    error.code == ErrorCode::QueryTooExpensive
}

/// A parameter that looks like a year or ISO date, used to hint that an
/// empty result may stem from a misunderstood time range
fn looks_like_date(value: &Value) -> bool {
    let Value::String(s) = value else {
        return false;
    };
    let bytes = s.as_bytes();
    match bytes.len() {
        4 => bytes.iter().all(u8::is_ascii_digit),
        10 => {
            bytes[..4].iter().all(u8::is_ascii_digit)
                && bytes[4] == b'-'
                && bytes[5..7].iter().all(u8::is_ascii_digit)
                && bytes[7] == b'-'
                && bytes[8..].iter().all(u8::is_ascii_digit)
        }
        _ => false,
    }
}

/// Strip markdown code fences the model may wrap around its JSON
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}
