// ABOUTME: Per-tenant PostgreSQL connection pool construction
// ABOUTME: Applies read-only and timeout session settings to every connection
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! Bounded per-tenant pools.
//!
//! Every connection handed out by a tenant pool has already been pinned to
//! the safety posture the SQL agent relies on: a statement timeout, a
//! read-only default transaction mode, and an idle-in-transaction reaper.
//! A connection from tenant A's pool can only ever reach tenant A's host.

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, PgPool};
use tracing::info;

use super::TenantConfig;
use crate::errors::AppResult;

/// Default maximum connections per tenant pool
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
/// Seconds a borrow may wait for a free connection
const ACQUIRE_TIMEOUT_SECS: u64 = 5;
/// Idle connections are reaped after this long
const IDLE_TIMEOUT_SECS: u64 = 300;
/// Statement timeout applied to every session
pub const STATEMENT_TIMEOUT_SECS: u64 = 30;
/// Sessions stuck idle inside a transaction are killed after this long
const IDLE_IN_TRANSACTION_TIMEOUT_SECS: u64 = 60;

/// Build the bounded pool for one tenant
///
/// # Errors
///
/// Returns `DbUnavailable` if the pool cannot connect.
pub async fn build_pool(config: &TenantConfig) -> AppResult<PgPool> {
    let db = &config.database;
    let connect = PgConnectOptions::new()
        .host(&db.host)
        .port(db.port)
        .database(&db.database)
        .username(&db.user)
        .password(&db.password)
        .application_name(&format!("siamgate-{}", config.tenant_id));

    let max_connections = db.pool_size.unwrap_or(DEFAULT_MAX_CONNECTIONS);
    let session_setup = format!(
        "SET statement_timeout = '{STATEMENT_TIMEOUT_SECS}s'; \
         SET idle_in_transaction_session_timeout = '{IDLE_IN_TRANSACTION_TIMEOUT_SECS}s'; \
         SET default_transaction_read_only = on;"
    );

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
        .idle_timeout(Some(Duration::from_secs(IDLE_TIMEOUT_SECS)))
        .after_connect(move |conn, _meta| {
            let setup = session_setup.clone();
            Box::pin(async move {
                conn.execute(setup.as_str()).await?;
                Ok(())
            })
        })
        .connect_lazy_with(connect);

    info!(
        tenant = %config.tenant_id,
        host = %db.host,
        database = %db.database,
        max_connections,
        "tenant pool constructed"
    );

    Ok(pool)
}
