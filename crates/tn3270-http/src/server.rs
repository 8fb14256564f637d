//! Dashboard server lifecycle.
//!
//! The dashboard port is contended across coexisting processes and is
//! acquired by TCP bind: the first process to bind serves for everyone,
//! later processes downgrade to passive publishers that keep snapshotting
//! metrics but do not listen. The process that wins the bind garbage
//! collects metrics and log files left over from previous runs.

use crate::{console, dashboard};
use axum::routing::get;
use axum::Router;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Directories the read-side handlers consume.
#[derive(Debug, Clone)]
pub struct DashboardContext {
    /// Where `metrics_<pid>.json` snapshots live.
    pub dashboard_dir: PathBuf,
    /// Where `logs_<pid>.json` files live.
    pub logs_dir: PathBuf,
}

/// Whether this process serves the dashboard or only publishes metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardRole {
    Active,
    Passive,
}

/// Builds the dashboard router.
pub fn create_router(ctx: DashboardContext) -> Router {
    Router::new()
        .route("/dashboard", get(dashboard::dashboard_handler))
        .route("/console", get(console::console_handler))
        .route("/terminal-console", get(console::terminal_console_handler))
        .with_state(ctx)
}

/// Tries to become the dashboard server on `port`.
///
/// On a successful bind the server runs as a background task until the
/// process exits and `Active` is returned. A failed bind means another
/// process already serves; the caller continues as a passive publisher.
pub async fn start_dashboard(ctx: DashboardContext, port: u16) -> DashboardRole {
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            info!(
                port,
                error = %e,
                "Dashboard already running, continuing as passive publisher"
            );
            return DashboardRole::Passive;
        }
    };

    let removed_metrics = tn3270_metrics::snapshot::clean_stale(&ctx.dashboard_dir);
    let removed_logs = tn3270_metrics::logsink::clean_stale(&ctx.logs_dir);
    if removed_metrics + removed_logs > 0 {
        info!(removed_metrics, removed_logs, "Removed stale files from previous runs");
    }

    let router = create_router(ctx);
    info!("Dashboard available at http://localhost:{port}/dashboard");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "Dashboard server error");
        }
    });
    DashboardRole::Active
}
