use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use tn3270_emulator::{BinaryProvisioner, DirAssetSource};
use tn3270_http::{start_dashboard, ApiState, DashboardContext, DashboardRole};
use tn3270_metrics::{sampler, snapshot, LogSink, MetricsStore, SnapshotWriter};
use tn3270_workflow::{
    PortAllocator, RampUpOptions, RampUpScheduler, Workflow, WorkflowExecutor, WorkflowOutcome,
    WorkflowRunner,
};

const LOGS_DIR: &str = "logs";

/// Drives automated 3270 workflows against mainframe applications, at
/// scale when asked to.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the workflow configuration file
    #[arg(long, value_name = "FILE", default_value = "workflow.json")]
    config: PathBuf,

    /// Run as the synchronous workflow API
    #[arg(long)]
    api: bool,

    /// API port
    #[arg(long = "api-port", default_value_t = 8080)]
    api_port: u16,

    /// Number of concurrent workflows
    #[arg(long, default_value_t = 1)]
    concurrent: usize,

    /// Duration to run workflows in seconds (concurrent mode only)
    #[arg(long, default_value_t = 0)]
    runtime: u64,

    /// Starting port number for emulator control ports
    #[arg(long = "start-port", default_value_t = 5000)]
    start_port: u16,

    /// Port for the dashboard server
    #[arg(long = "dashboard-port", default_value_t = 9200)]
    dashboard_port: u16,

    /// Run the emulator in headless mode
    #[arg(long)]
    headless: bool,

    /// Enable debug logging
    #[arg(long)]
    verbose: bool,

    /// Directory holding the bundled emulator executables
    #[arg(long = "binaries-dir", value_name = "DIR", default_value = "binaries")]
    binaries_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    initialize_logging(args.verbose)?;
    info!("Starting tn3270-connect {}", env!("CARGO_PKG_VERSION"));

    let metrics = Arc::new(MetricsStore::new());
    let logs = Arc::new(LogSink::new(LOGS_DIR).context("Error creating logs directory")?);
    // The API always drives the headless emulator.
    let provisioner = Arc::new(BinaryProvisioner::new(
        Box::new(DirAssetSource::new(&args.binaries_dir)),
        args.headless || args.api,
    ));
    let ports = Arc::new(PortAllocator::new(args.start_port));
    let dashboard_dir = snapshot::default_dashboard_dir();

    // Concurrent runs get the full metrics plane; a single-shot run does
    // not need a dashboard.
    let observing = args.concurrent > 1 || args.runtime > 0;
    let mut dashboard_role = DashboardRole::Passive;
    if observing {
        // Bind (and clean stale files) before the first snapshot lands.
        dashboard_role = start_dashboard(
            DashboardContext {
                dashboard_dir: dashboard_dir.clone(),
                logs_dir: PathBuf::from(LOGS_DIR),
            },
            args.dashboard_port,
        )
        .await;
        sampler::spawn(Arc::clone(&metrics));
        SnapshotWriter::new(Arc::clone(&metrics), &dashboard_dir).spawn();
    }

    if args.api {
        let state = ApiState {
            metrics,
            provisioner,
            ports,
        };
        tn3270_http::serve_api(state, args.api_port)
            .await
            .context("Failed to start API server")?;
        return Ok(());
    }

    let workflow = Workflow::load(&args.config)
        .with_context(|| format!("Invalid configuration at {}", args.config.display()))?;

    if args.concurrent > 1 {
        let executor = Arc::new(
            WorkflowExecutor::new(Arc::clone(&metrics), provisioner)
                .with_log_sink(Arc::clone(&logs)),
        );
        let scheduler = RampUpScheduler::new(
            executor as Arc<dyn WorkflowRunner>,
            ports,
            Arc::clone(&metrics),
            Arc::clone(&logs),
        );
        scheduler
            .run(
                Arc::new(workflow),
                RampUpOptions {
                    concurrency: args.concurrent,
                    runtime: Duration::from_secs(args.runtime),
                },
            )
            .await;
    } else {
        let executor = WorkflowExecutor::new(Arc::clone(&metrics), provisioner)
            .with_log_sink(Arc::clone(&logs));
        let control_port = ports.next().context("No free control port")?;
        let report = executor.run(control_port, &workflow).await;
        match report.outcome {
            WorkflowOutcome::Completed => {
                if let Some(path) = report.output_path {
                    info!("Workflow output written to {}", path.display());
                }
            }
            WorkflowOutcome::Failed { step, reason } => {
                warn!(step, reason = %reason, "Workflow failed");
            }
        }
    }

    if dashboard_role == DashboardRole::Active {
        let line = format!(
            "All workflows completed but the dashboard is still running on port {}. Press Ctrl+C to exit.",
            args.dashboard_port
        );
        info!("{line}");
        logs.store(line);
        wait_for_shutdown_signal().await;
    }

    Ok(())
}

fn initialize_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();

    Ok(())
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM signal");
            }
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C signal");
            }
        }
    }

    #[cfg(windows)]
    {
        let _ = signal::ctrl_c().await;
        info!("Received Ctrl+C signal");
    }
}
