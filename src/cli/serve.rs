use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Args;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use waypoint_core_types::TaskId;

use crate::app_context::AppContext;
use crate::cli::context::CliContext;
use crate::metrics;
use crate::server::{build_router, ServeState};

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Interface to bind (defaults to server.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (defaults to server.port)
    #[arg(long)]
    pub port: Option<u16>,
}

pub async fn cmd_serve(args: ServeArgs, ctx: &CliContext) -> Result<()> {
    let config = ctx.config().clone();
    let host = args.host.unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;

    metrics::register_metrics();
    let app = AppContext::from_config(config)?;
    let state = ServeState::new(&app);
    state.mark_live();
    match run_startup_readiness_checks(&state).await {
        Ok(()) => {
            state.mark_ready();
            info!("Serve readiness checks passed");
        }
        Err(err) => {
            state.mark_unready(err.to_string());
            error!(?err, "Serve readiness checks failed");
        }
    }

    let router = build_router(state);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind decision service on {}", addr))?;
    if !addr.ip().is_loopback() {
        warn!("Serve has no authentication; do not expose this port publicly");
    }
    info!("Decision service listening on http://{}", addr);
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("decision service exited unexpectedly")?;
    info!("Decision service stopped");
    Ok(())
}

/// Round-trips the task store once so `/readyz` reflects a usable backend.
async fn run_startup_readiness_checks(state: &ServeState) -> Result<()> {
    state
        .store
        .get(&TaskId::from("readiness-probe"))
        .await
        .context("task store is not readable")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
