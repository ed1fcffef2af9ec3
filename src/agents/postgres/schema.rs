// ABOUTME: Tenant database schema introspection and snapshot caching
// ABOUTME: Builds relevance-ranked schema summaries under a byte budget
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! # Schema Snapshots
//!
//! SQL generation is grounded in a snapshot of the tenant database:
//! non-system schemas, tables, columns with types and nullability, primary
//! and foreign keys, and row-count estimates from the statistics views.
//!
//! Snapshots are cached per tenant with single-flight semantics (only one
//! introspection runs at a time, concurrent callers await its result) and
//! refreshed when the TTL elapses or an execution error invalidates them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::errors::AppResult;

/// One column of one table
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Postgres data type
    pub data_type: String,
    /// Whether NULL is permitted
    pub nullable: bool,
    /// Whether the column is part of the primary key
    pub primary_key: bool,
}

/// A foreign-key edge leaving a table
#[derive(Debug, Clone)]
pub struct ForeignKey {
    /// Referencing column
    pub column: String,
    /// Referenced table, schema-qualified
    pub foreign_table: String,
    /// Referenced column
    pub foreign_column: String,
}

/// One table of the tenant database
#[derive(Debug, Clone)]
pub struct TableInfo {
    /// Schema the table lives in
    pub schema: String,
    /// Table name
    pub name: String,
    /// Columns in ordinal order
    pub columns: Vec<ColumnInfo>,
    /// Outgoing foreign keys
    pub foreign_keys: Vec<ForeignKey>,
    /// Row-count estimate from the statistics views
    pub row_estimate: i64,
}

impl TableInfo {
    /// Schema-qualified name
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// A coherent snapshot of the tenant database structure
#[derive(Debug, Clone)]
pub struct SchemaSnapshot {
    /// Capture timestamp
    pub captured_at: DateTime<Utc>,
    /// Ordered non-system schema names
    pub schemas: Vec<String>,
    /// Tables, ordered by schema then name
    pub tables: Vec<TableInfo>,
}

impl SchemaSnapshot {
    /// Schema allow-list derived from the snapshot
    #[must_use]
    pub fn schema_names(&self) -> Vec<String> {
        self.schemas.clone()
    }

    /// Compact textual summary for the SQL-generation prompt
    ///
    /// Tables are ranked by name/column overlap with the question (stable
    /// tie-break by qualified name) and emitted until the byte budget is
    /// spent, so the most relevant structure always survives truncation.
    #[must_use]
    pub fn summary(&self, question: &str, budget_bytes: usize) -> String {
        let question_tokens = text_tokens(question);

        let mut ranked: Vec<(&TableInfo, usize)> = self
            .tables
            .iter()
            .map(|table| (table, relevance(table, &question_tokens)))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| a.0.qualified_name().cmp(&b.0.qualified_name()))
        });

        let mut summary = String::new();
        for (table, _score) in ranked {
            let line = describe_table(table);
            if !summary.is_empty() && summary.len() + line.len() + 1 > budget_bytes {
                break;
            }
            if !summary.is_empty() {
                summary.push('\n');
            }
            summary.push_str(&line);
        }
        summary
    }
}

fn describe_table(table: &TableInfo) -> String {
    let mut parts = Vec::with_capacity(table.columns.len());
    for column in &table.columns {
        let mut part = format!("{} {}", column.name, column.data_type);
        if column.primary_key {
            part.push_str(" pk");
        } else if !column.nullable {
            part.push_str(" not null");
        }
        parts.push(part);
    }

    let mut line = format!(
        "{} (~{} rows): {}",
        table.qualified_name(),
        table.row_estimate.max(0),
        parts.join(", ")
    );
    for fk in &table.foreign_keys {
        line.push_str(&format!(
            " [{} -> {}.{}]",
            fk.column, fk.foreign_table, fk.foreign_column
        ));
    }
    line
}

fn text_tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(ToOwned::to_owned)
        .collect()
}

fn relevance(table: &TableInfo, question_tokens: &HashSet<String>) -> usize {
    let mut score = 0;
    for part in table.name.to_lowercase().split('_') {
        if question_tokens.contains(part) {
            score += 3;
        }
    }
    for column in &table.columns {
        for part in column.name.to_lowercase().split('_') {
            if question_tokens.contains(part) {
                score += 1;
            }
        }
    }
    score
}

/// Introspect the tenant database into a fresh snapshot
///
/// # Errors
///
/// Returns `DbUnavailable` when any introspection query fails.
pub async fn introspect(pool: &PgPool) -> AppResult<SchemaSnapshot> {
    let table_rows = sqlx::query(
        "SELECT table_schema, table_name \
         FROM information_schema.tables \
         WHERE table_type = 'BASE TABLE' \
           AND table_schema NOT IN ('pg_catalog', 'information_schema') \
           AND table_schema NOT LIKE 'pg_toast%' \
           AND table_schema NOT LIKE 'pg_temp%' \
         ORDER BY table_schema, table_name",
    )
    .fetch_all(pool)
    .await?;

    let column_rows = sqlx::query(
        "SELECT table_schema, table_name, column_name, data_type, is_nullable \
         FROM information_schema.columns \
         WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
           AND table_schema NOT LIKE 'pg_toast%' \
           AND table_schema NOT LIKE 'pg_temp%' \
         ORDER BY table_schema, table_name, ordinal_position",
    )
    .fetch_all(pool)
    .await?;

    let pk_rows = sqlx::query(
        "SELECT tc.table_schema, tc.table_name, kcu.column_name \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
           ON tc.constraint_name = kcu.constraint_name \
          AND tc.table_schema = kcu.table_schema \
         WHERE tc.constraint_type = 'PRIMARY KEY'",
    )
    .fetch_all(pool)
    .await?;

    let fk_rows = sqlx::query(
        "SELECT tc.table_schema, tc.table_name, kcu.column_name, \
                ccu.table_schema AS foreign_schema, ccu.table_name AS foreign_table, \
                ccu.column_name AS foreign_column \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
           ON tc.constraint_name = kcu.constraint_name \
          AND tc.table_schema = kcu.table_schema \
         JOIN information_schema.constraint_column_usage ccu \
           ON ccu.constraint_name = tc.constraint_name \
          AND ccu.table_schema = tc.table_schema \
         WHERE tc.constraint_type = 'FOREIGN KEY'",
    )
    .fetch_all(pool)
    .await?;

    let estimate_rows = sqlx::query(
        "SELECT schemaname, relname, n_live_tup FROM pg_stat_user_tables",
    )
    .fetch_all(pool)
    .await?;

    let mut pk_index: HashSet<(String, String, String)> = HashSet::new();
    for row in pk_rows {
        pk_index.insert((
            row.get("table_schema"),
            row.get("table_name"),
            row.get("column_name"),
        ));
    }

    let mut fk_index: HashMap<(String, String), Vec<ForeignKey>> = HashMap::new();
    for row in fk_rows {
        let key = (row.get("table_schema"), row.get("table_name"));
        let foreign_schema: String = row.get("foreign_schema");
        let foreign_table: String = row.get("foreign_table");
        fk_index.entry(key).or_default().push(ForeignKey {
            column: row.get("column_name"),
            foreign_table: format!("{foreign_schema}.{foreign_table}"),
            foreign_column: row.get("foreign_column"),
        });
    }

    let mut estimates: HashMap<(String, String), i64> = HashMap::new();
    for row in estimate_rows {
        estimates.insert(
            (row.get("schemaname"), row.get("relname")),
            row.get("n_live_tup"),
        );
    }

    let mut columns_index: HashMap<(String, String), Vec<ColumnInfo>> = HashMap::new();
    for row in column_rows {
        let schema: String = row.get("table_schema");
        let table: String = row.get("table_name");
        let name: String = row.get("column_name");
        let nullable: String = row.get("is_nullable");
        let primary_key = pk_index.contains(&(schema.clone(), table.clone(), name.clone()));
        columns_index
            .entry((schema, table))
            .or_default()
            .push(ColumnInfo {
                name,
                data_type: row.get("data_type"),
                nullable: nullable == "YES",
                primary_key,
            });
    }

    let mut schemas = Vec::new();
    let mut tables = Vec::with_capacity(table_rows.len());
    for row in table_rows {
        let schema: String = row.get("table_schema");
        let name: String = row.get("table_name");
        if !schemas.contains(&schema) {
            schemas.push(schema.clone());
        }
        let key = (schema.clone(), name.clone());
        tables.push(TableInfo {
            columns: columns_index.remove(&key).unwrap_or_default(),
            foreign_keys: fk_index.remove(&key).unwrap_or_default(),
            row_estimate: estimates.get(&key).copied().unwrap_or(-1),
            schema,
            name,
        });
    }

    info!(
        schemas = schemas.len(),
        tables = tables.len(),
        "schema introspection complete"
    );

    Ok(SchemaSnapshot {
        captured_at: Utc::now(),
        schemas,
        tables,
    })
}

struct CacheEntry {
    snapshot: Arc<SchemaSnapshot>,
    captured: Instant,
}

/// Per-tenant snapshot cache with single-flight refresh
pub struct SchemaCache {
    entry: RwLock<Option<CacheEntry>>,
    flight: Mutex<()>,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaCache {
    /// Create an empty cache
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entry: RwLock::const_new(None),
            flight: Mutex::const_new(()),
        }
    }

    /// Get the cached snapshot, introspecting when stale or absent
    ///
    /// Only one introspection runs per tenant; concurrent callers block on
    /// the flight lock and then observe the fresh entry.
    ///
    /// # Errors
    ///
    /// Returns `DbUnavailable` when introspection fails.
    pub async fn snapshot(&self, pool: &PgPool, ttl: Duration) -> AppResult<Arc<SchemaSnapshot>> {
        if let Some(snapshot) = self.fresh(ttl).await {
            return Ok(snapshot);
        }

        let _guard = self.flight.lock().await;
        // A concurrent introspection may have refreshed the entry while we
        // waited for the flight lock.
        if let Some(snapshot) = self.fresh(ttl).await {
            return Ok(snapshot);
        }

        debug!("schema cache miss, introspecting");
        let snapshot = Arc::new(introspect(pool).await?);
        *self.entry.write().await = Some(CacheEntry {
            snapshot: Arc::clone(&snapshot),
            captured: Instant::now(),
        });
        Ok(snapshot)
    }

    /// Drop the cached snapshot (e.g. after an error suggesting DDL drift)
    pub async fn invalidate(&self) {
        *self.entry.write().await = None;
    }

    async fn fresh(&self, ttl: Duration) -> Option<Arc<SchemaSnapshot>> {
        let entry = self.entry.read().await;
        entry
            .as_ref()
            .filter(|e| e.captured.elapsed() < ttl)
            .map(|e| Arc::clone(&e.snapshot))
    }
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, columns: &[&str], rows: i64) -> TableInfo {
        TableInfo {
            schema: "public".to_owned(),
            name: name.to_owned(),
            columns: columns
                .iter()
                .map(|c| ColumnInfo {
                    name: (*c).to_owned(),
                    data_type: "text".to_owned(),
                    nullable: true,
                    primary_key: false,
                })
                .collect(),
            foreign_keys: Vec::new(),
            row_estimate: rows,
        }
    }

    fn snapshot(tables: Vec<TableInfo>) -> SchemaSnapshot {
        SchemaSnapshot {
            captured_at: Utc::now(),
            schemas: vec!["public".to_owned()],
            tables,
        }
    }

    #[test]
    fn relevant_tables_rank_first() {
        let snap = snapshot(vec![
            table("audit_log", &["id", "entry"], 100_000),
            table("employees", &["id", "name", "department", "salary"], 42),
        ]);
        let summary = snap.summary("how many employees per department", 4096);
        let employees_pos = summary.find("public.employees").unwrap();
        let audit_pos = summary.find("public.audit_log").unwrap();
        assert!(employees_pos < audit_pos);
    }

    #[test]
    fn summary_respects_budget() {
        let tables: Vec<TableInfo> = (0..50)
            .map(|i| table(&format!("table_{i}"), &["id", "value"], 10))
            .collect();
        let snap = snapshot(tables);
        let summary = snap.summary("unrelated question", 256);
        assert!(summary.len() <= 256);
        assert!(!summary.is_empty());
    }

    #[test]
    fn ties_break_by_name() {
        let snap = snapshot(vec![
            table("zebra", &["id"], 1),
            table("alpha", &["id"], 1),
        ]);
        let summary = snap.summary("nothing relevant", 4096);
        let alpha = summary.find("public.alpha").unwrap();
        let zebra = summary.find("public.zebra").unwrap();
        assert!(alpha < zebra);
    }

    #[test]
    fn primary_keys_marked() {
        let mut t = table("employees", &[], 1);
        t.columns.push(ColumnInfo {
            name: "id".to_owned(),
            data_type: "integer".to_owned(),
            nullable: false,
            primary_key: true,
        });
        let snap = snapshot(vec![t]);
        assert!(snap.summary("employees", 4096).contains("id integer pk"));
    }
}
