// ABOUTME: Logging initialization for structured gateway observability
// ABOUTME: Configures tracing-subscriber with env-driven filtering and formats
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! Production logging setup built on `tracing`.
//!
//! The filter is resolved in order: `RUST_LOG` if set, otherwise the level
//! from the tenant configuration document's `global_settings.logging.level`,
//! otherwise `info`. Output format is selected with `SIAMGATE_LOG_FORMAT`
//! (`json`, `compact`, or the default pretty-ish `full`).

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::{AppError, AppResult};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize the global subscriber. Idempotent: repeated calls (e.g. from
/// tests sharing a process) are no-ops.
///
/// # Errors
///
/// Returns an error if the subscriber cannot be installed.
pub fn init(default_level: &str) -> AppResult<()> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_owned()));

    let format = env::var("SIAMGATE_LOG_FORMAT").unwrap_or_default();
    let result = match format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .try_init(),
        "compact" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init(),
    };

    result.map_err(|e| AppError::internal(format!("failed to install tracing subscriber: {e}")))
}

/// Initialize with the conventional `info` default.
///
/// # Errors
///
/// Returns an error if the subscriber cannot be installed.
pub fn init_from_env() -> AppResult<()> {
    init("info")
}
