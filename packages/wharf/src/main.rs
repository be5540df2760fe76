use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod agent;
mod config;
mod error;
mod files;
mod handlers;
mod scan;
mod session_manager;
mod state;
#[cfg(test)]
mod test_helpers;
mod watcher;
mod ws;

use crate::state::AppState;

/// Span maker that tags every request with a unique id.
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "wharf")]
#[command(about = "Multi-session CLI-agent terminal orchestrator")]
struct Cli {
    /// Host to bind to (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port for the server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to a wharf.toml config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "wharf=debug,tower_http=debug,info"
    } else {
        "wharf=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let file_config = config::load_config(cli.config.as_deref())?;
    let host = cli.host.unwrap_or_else(|| file_config.server.host.clone());
    let port = cli.port.unwrap_or(file_config.server.port);
    let drain = std::time::Duration::from_secs(file_config.shutdown.drain_secs);

    let state = AppState::new(&file_config);
    state.spawn_watch_reaper();

    let app = handlers::app_router(state.clone())
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive());

    let addr = format!("{host}:{port}")
        .parse::<SocketAddr>()
        .context("invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let actual_addr = listener.local_addr()?;

    info!("wharf listening on http://{}", actual_addr);
    info!("  WS     /ws                 - Multiplexed gateway");
    info!("  GET    /api/sessions       - List active sessions");
    info!("  POST   /api/sessions       - Create session");
    info!("  GET    /api/sessions/:id   - Session details");
    info!("  DELETE /api/sessions/:id   - Kill session");

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("shutdown signal received, draining");
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("server error");

    // Kill-all and unwatch-all, bounded by the configured drain window.
    let cleanup = async {
        state.sessions.shutdown().await;
        state.watches.shutdown().await;
    };
    if tokio::time::timeout(drain, cleanup).await.is_err() {
        warn!("drain window elapsed, forcing exit");
        std::process::exit(1);
    }

    info!("shutdown complete");
    server_result
}
