//! Workflow execution against one emulator instance.
//!
//! The executor owns an [`EmulatorDriver`] for the life of one workflow:
//! it stages an output file, walks the steps in order, and accounts the
//! run in the metrics store. A `CheckValue` mismatch is a workflow-level
//! failure, not a driver error; either way the first failing step
//! short-circuits the rest.

use crate::model::{Step, Workflow, CONNECT_SETTLE_TIMEOUT};
use crate::output::OutputSink;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tn3270_emulator::{BinaryProvisioner, DriverConfig, DriverState, EmulatorDriver};
use tn3270_metrics::{LogSink, MetricsStore};
use tracing::{debug, info, warn};

/// Terminal outcome of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    Completed,
    Failed { step: &'static str, reason: String },
}

impl WorkflowOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, WorkflowOutcome::Completed)
    }
}

/// What one run produced.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: WorkflowOutcome,
    pub duration: Duration,
    /// Where the screen dump landed: the configured path (possibly
    /// pid-suffixed) in file mode, a kept temp file in API mode.
    pub output_path: Option<PathBuf>,
}

/// Runs workflows, one emulator instance per call.
pub struct WorkflowExecutor {
    metrics: Arc<MetricsStore>,
    provisioner: Arc<BinaryProvisioner>,
    logs: Option<Arc<LogSink>>,
    api_mode: bool,
}

impl WorkflowExecutor {
    pub fn new(metrics: Arc<MetricsStore>, provisioner: Arc<BinaryProvisioner>) -> Self {
        Self {
            metrics,
            provisioner,
            logs: None,
            api_mode: false,
        }
    }

    /// An executor for the synchronous API: plain-text output, temp file
    /// kept for the response body.
    pub fn for_api(metrics: Arc<MetricsStore>, provisioner: Arc<BinaryProvisioner>) -> Self {
        Self {
            metrics,
            provisioner,
            logs: None,
            api_mode: true,
        }
    }

    /// Mirrors progress lines into the per-process log sink.
    pub fn with_log_sink(mut self, logs: Arc<LogSink>) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Runs `workflow` on a fresh emulator instance bound to
    /// `control_port`.
    pub async fn run(&self, control_port: u16, workflow: &Workflow) -> RunReport {
        let driver = EmulatorDriver::new(
            DriverConfig::new(&workflow.host, workflow.port, control_port),
            Arc::clone(&self.provisioner),
        );
        self.run_with_driver(&driver, workflow).await
    }

    /// Runs `workflow` against an existing driver. This is the same path
    /// `run` takes; it exists so callers owning the driver (and tests
    /// substituting its control channel) can reuse it.
    pub async fn run_with_driver(&self, driver: &EmulatorDriver, workflow: &Workflow) -> RunReport {
        let control_port = driver.control_port();
        self.metrics.workflow_started();
        self.log(format!("Starting workflow for control port {control_port}"));
        let start = Instant::now();

        let (outcome, sink) = self.execute_steps(driver, workflow).await;

        // The workflow may have disconnected explicitly; tearing down a
        // closed instance is a no-op.
        if driver.state() != DriverState::Closed {
            let _ = driver.disconnect().await;
        }

        let duration = start.elapsed();
        let output_path = self.place_output(&outcome, sink, workflow);

        match &outcome {
            WorkflowOutcome::Completed => {
                self.metrics.workflow_completed(duration.as_secs_f64());
                debug!(control_port, "Workflow completed successfully");
                self.log(format!(
                    "Workflow for control port {control_port} completed successfully"
                ));
            }
            WorkflowOutcome::Failed { step, reason } => {
                self.metrics.workflow_failed(duration.as_secs_f64());
                info!(control_port, step, reason = %reason, "Workflow failed");
                self.log(format!("Workflow for control port {control_port} failed"));
            }
        }

        RunReport {
            outcome,
            duration,
            output_path,
        }
    }

    /// Walks the step list, stopping at the first failure.
    async fn execute_steps(
        &self,
        driver: &EmulatorDriver,
        workflow: &Workflow,
    ) -> (WorkflowOutcome, Option<OutputSink>) {
        let mut sink = match OutputSink::create(self.api_mode) {
            Ok(sink) => sink,
            Err(e) => {
                return (
                    WorkflowOutcome::Failed {
                        step: "InitializeOutput",
                        reason: e.to_string(),
                    },
                    None,
                )
            }
        };
        if let Err(e) = sink.initialize() {
            return (
                WorkflowOutcome::Failed {
                    step: "InitializeOutput",
                    reason: e.to_string(),
                },
                Some(sink),
            );
        }

        for step in &workflow.steps {
            if let Err(reason) = self.execute_step(driver, step, &mut sink).await {
                return (
                    WorkflowOutcome::Failed {
                        step: step.kind(),
                        reason,
                    },
                    Some(sink),
                );
            }
        }
        (WorkflowOutcome::Completed, Some(sink))
    }

    async fn execute_step(
        &self,
        driver: &EmulatorDriver,
        step: &Step,
        sink: &mut OutputSink,
    ) -> Result<(), String> {
        match step {
            Step::Connect => {
                driver.connect().await.map_err(|e| e.to_string())?;
                // The login screen needs a moment to present an input
                // field; a slow host here is not a workflow failure.
                if let Err(e) = driver.wait_for_field(CONNECT_SETTLE_TIMEOUT).await {
                    warn!(error = %e, "Field not ready after connect");
                }
                Ok(())
            }
            Step::Disconnect => driver.disconnect().await.map_err(|e| e.to_string()),
            Step::WaitForField { timeout } => driver
                .wait_for_field(*timeout)
                .await
                .map_err(|e| e.to_string()),
            Step::MoveCursor { row, col } => driver
                .move_cursor(*row, *col)
                .await
                .map_err(|e| e.to_string()),
            Step::FillString { row, col, text } => driver
                .fill_string(*row, *col, text)
                .await
                .map_err(|e| e.to_string()),
            Step::SetString { text } => driver.set_string(text).await.map_err(|e| e.to_string()),
            Step::GetValue { row, col, length } => {
                let value = driver
                    .get_value(*row, *col, *length)
                    .await
                    .map_err(|e| e.to_string())?;
                debug!(row, col, length, value = value.trim_end(), "Read screen region");
                Ok(())
            }
            Step::CheckValue {
                row,
                col,
                length,
                expected,
            } => {
                let value = driver
                    .get_value(*row, *col, *length)
                    .await
                    .map_err(|e| e.to_string())?;
                let found = value.trim_end();
                if found != expected.as_str() {
                    // A mismatch fails the workflow without being a
                    // driver-level error.
                    return Err(format!(
                        "CheckValue failed. Expected: {expected}, Found: {found}"
                    ));
                }
                Ok(())
            }
            Step::Press(key) => driver.press_key(*key).await.map_err(|e| e.to_string()),
            Step::AsciiScreenGrab => {
                let screen = driver.grab_screen().await.map_err(|e| e.to_string())?;
                sink.append_screen(&screen).map_err(|e| e.to_string())
            }
            Step::InitializeOutput => sink.initialize().map_err(|e| e.to_string()),
        }
    }

    /// Decides where the staged output ends up after the run.
    fn place_output(
        &self,
        outcome: &WorkflowOutcome,
        sink: Option<OutputSink>,
        workflow: &Workflow,
    ) -> Option<PathBuf> {
        let sink = sink?;
        if !outcome.is_completed() {
            return None;
        }
        if self.api_mode {
            return match sink.keep() {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = %e, "Failed to keep API output file");
                    None
                }
            };
        }
        let configured = workflow.output_path.as_deref()?;
        match sink.persist(configured) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "Failed to place output file");
                None
            }
        }
    }

    fn log(&self, message: String) {
        if let Some(logs) = &self.logs {
            logs.store(message);
        }
    }
}
