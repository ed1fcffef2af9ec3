// ABOUTME: Gateway server binary with strict-mode probes and exit codes
// ABOUTME: Loads configuration, builds the registry and serves the facade
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

#![deny(unsafe_code)]

//! # SiamGate Server Binary
//!
//! Exit codes: `0` clean shutdown, `64` bad configuration, `65` a tenant
//! database is unreachable in strict mode, `69` the LLM provider is
//! unreachable in strict mode.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use siamgate::config::ServerConfig;
use siamgate::dispatch::Dispatcher;
use siamgate::http::{router, AppState};
use siamgate::llm::{LlmProvider, OpenAiCompatibleProvider};
use siamgate::logging;
use siamgate::metrics::Metrics;
use siamgate::tenant::TenantRegistry;

const EXIT_BAD_CONFIG: u8 = 64;
const EXIT_DB_UNREACHABLE: u8 = 65;
const EXIT_LLM_UNREACHABLE: u8 = 69;

#[derive(Parser)]
#[command(name = "siamgate-server")]
#[command(about = "SiamGate - multi-tenant AI query gateway")]
struct Args {
    /// Tenant configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_BAD_CONFIG);
        }
    };
    if let Some(path) = args.config {
        config.tenant_config_path = path;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }

    let registry = match TenantRegistry::load_path(Path::new(&config.tenant_config_path)) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("tenant configuration error: {e}");
            return ExitCode::from(EXIT_BAD_CONFIG);
        }
    };

    let default_level = registry.snapshot().await.policy.logging.level.clone();
    if let Err(e) = logging::init(&default_level) {
        eprintln!("logging setup failed: {e}");
        return ExitCode::from(EXIT_BAD_CONFIG);
    }

    info!("starting SiamGate: {}", config.summary());

    if config.strict_startup {
        if let Err(e) = registry.smoke_test_all().await {
            error!("strict startup: tenant database unreachable: {e}");
            return ExitCode::from(EXIT_DB_UNREACHABLE);
        }
        match OpenAiCompatibleProvider::from_env() {
            Ok(provider) => match provider.health_check().await {
                Ok(true) => info!("LLM provider reachable"),
                Ok(false) | Err(_) => {
                    error!("strict startup: LLM provider unreachable");
                    return ExitCode::from(EXIT_LLM_UNREACHABLE);
                }
            },
            Err(e) => {
                error!("strict startup: LLM provider misconfigured: {e}");
                return ExitCode::from(EXIT_LLM_UNREACHABLE);
            }
        }
    }

    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new());
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&config), metrics));
    let state = Arc::new(AppState::new(
        Arc::new(registry),
        dispatcher,
        Arc::clone(&config),
    ));

    let app = router(state);
    let address = format!("{}:{}", config.host, config.http_port);
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("cannot bind {address}: {e}");
            return ExitCode::from(EXIT_BAD_CONFIG);
        }
    };

    info!("listening on {address}");
    info!("endpoints: POST /v1/chat/completions, GET /v1/models, GET /health, GET /tenants");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    match served {
        Ok(()) => {
            info!("clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("server error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        error!("failed to install shutdown handler");
    }
}
