//! Ramp-up scheduling.
//!
//! The scheduler keeps a bounded pool of in-flight workflow executions:
//! a semaphore caps concurrency, new executors launch in batches of at
//! most `batch_size` per tick, ticks are `delay` apart, and no new
//! executor starts once the wall-clock runtime budget is spent. In-flight
//! executors always run to completion.

use crate::executor::{WorkflowExecutor, WorkflowOutcome};
use crate::model::Workflow;
use crate::ports::PortAllocator;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tn3270_metrics::{LogSink, MetricsStore};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Runs one workflow on one control port. The scheduler only needs this
/// much of the executor; tests substitute stubs.
#[async_trait]
pub trait WorkflowRunner: Send + Sync + 'static {
    async fn run_workflow(&self, control_port: u16, workflow: Arc<Workflow>) -> WorkflowOutcome;
}

#[async_trait]
impl WorkflowRunner for WorkflowExecutor {
    async fn run_workflow(&self, control_port: u16, workflow: Arc<Workflow>) -> WorkflowOutcome {
        self.run(control_port, &workflow).await.outcome
    }
}

/// Scheduler tuning outside the workflow file.
#[derive(Debug, Clone, Copy)]
pub struct RampUpOptions {
    /// Hard cap on simultaneously running executors.
    pub concurrency: usize,
    /// Wall-clock budget; no executor is launched after it elapses.
    pub runtime: Duration,
}

/// Launches workflow executors in batches under a concurrency cap.
pub struct RampUpScheduler {
    runner: Arc<dyn WorkflowRunner>,
    ports: Arc<PortAllocator>,
    metrics: Arc<MetricsStore>,
    logs: Arc<LogSink>,
}

impl RampUpScheduler {
    pub fn new(
        runner: Arc<dyn WorkflowRunner>,
        ports: Arc<PortAllocator>,
        metrics: Arc<MetricsStore>,
        logs: Arc<LogSink>,
    ) -> Self {
        Self {
            runner,
            ports,
            metrics,
            logs,
        }
    }

    /// Runs the ramp-up loop until the runtime budget elapses, then waits
    /// for every in-flight executor to finish.
    pub async fn run(&self, workflow: Arc<Workflow>, options: RampUpOptions) {
        let semaphore = Arc::new(Semaphore::new(options.concurrency));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let start = Instant::now();

        while start.elapsed() < options.runtime {
            // Reap finished executors so the join set stays small.
            while tasks.try_join_next().is_some() {}

            let free = semaphore.available_permits();
            if free == 0 {
                tokio::time::sleep(workflow.delay).await;
                continue;
            }

            let batch = free.min(workflow.batch_size);
            let in_flight = options.concurrency - free;
            let line = format!(
                "Increasing batch by {batch}, current size is {in_flight}, new total target is {}",
                in_flight + batch
            );
            info!("{line}");
            self.logs.store(line);

            for _ in 0..batch {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    return;
                };
                let port = match self.ports.next() {
                    Ok(port) => port,
                    Err(e) => {
                        // Counted as a failed workflow; the scheduler
                        // itself keeps going.
                        error!(error = %e, "Control port allocation failed");
                        self.logs.store(format!("Control port allocation failed: {e}"));
                        self.metrics.workflow_started();
                        self.metrics.workflow_failed(0.0);
                        drop(permit);
                        continue;
                    }
                };

                let runner = Arc::clone(&self.runner);
                let workflow = Arc::clone(&workflow);
                tasks.spawn(async move {
                    let _permit = permit;
                    let _ = runner.run_workflow(port, workflow).await;
                });
            }

            self.emit_progress(options.concurrency, &semaphore);
            tokio::time::sleep(workflow.delay).await;
        }

        // Deadline passed: no new launches, drain what is running.
        while tasks.join_next().await.is_some() {}
        info!("All workflows completed after runtime deadline");
        self.logs
            .store("All workflows completed after runtime deadline");
    }

    fn emit_progress(&self, concurrency: usize, semaphore: &Semaphore) {
        let in_flight = concurrency - semaphore.available_permits();
        let cpu = self.metrics.latest_cpu().unwrap_or(0.0);
        let mem = self.metrics.latest_memory().unwrap_or(0.0);
        let line = format!(
            "Currently active workflows: {in_flight}, CPU usage: {cpu:.2}%, memory usage: {mem:.2}%"
        );
        info!("{line}");
        self.logs.store(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Step;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Runner stub that tracks in-flight and peak concurrency.
    struct TrackingRunner {
        work: Duration,
        current: AtomicUsize,
        peak: AtomicUsize,
        started: AtomicUsize,
    }

    impl TrackingRunner {
        fn new(work: Duration) -> Self {
            Self {
                work,
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                started: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl WorkflowRunner for TrackingRunner {
        async fn run_workflow(
            &self,
            _control_port: u16,
            _workflow: Arc<Workflow>,
        ) -> WorkflowOutcome {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            WorkflowOutcome::Completed
        }
    }

    fn test_workflow(batch_size: usize, delay: Duration) -> Arc<Workflow> {
        Arc::new(Workflow {
            host: "mainframe.example".to_string(),
            port: 3270,
            output_path: None,
            steps: vec![Step::Connect, Step::Disconnect],
            batch_size,
            delay,
        })
    }

    fn free_base() -> u16 {
        TcpListener::bind(("127.0.0.1", 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn scheduler(
        runner: Arc<dyn WorkflowRunner>,
    ) -> (RampUpScheduler, Arc<MetricsStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(MetricsStore::with_identity(1, "test"));
        let logs = Arc::new(LogSink::with_identity(dir.path(), 1, "test").unwrap());
        (
            RampUpScheduler::new(
                runner,
                Arc::new(PortAllocator::new(free_base())),
                Arc::clone(&metrics),
                logs,
            ),
            metrics,
            dir,
        )
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let runner = Arc::new(TrackingRunner::new(Duration::from_millis(120)));
        let (scheduler, _metrics, _logs_dir) =
            scheduler(Arc::clone(&runner) as Arc<dyn WorkflowRunner>);

        scheduler
            .run(
                test_workflow(10, Duration::from_millis(20)),
                RampUpOptions {
                    concurrency: 4,
                    runtime: Duration::from_millis(500),
                },
            )
            .await;

        assert_eq!(
            runner.peak.load(Ordering::SeqCst),
            4,
            "the cap should be reached and never exceeded"
        );
        assert!(runner.started.load(Ordering::SeqCst) >= 8);
    }

    #[tokio::test]
    async fn test_batch_size_limits_launches_per_tick() {
        let runner = Arc::new(TrackingRunner::new(Duration::from_millis(400)));
        let (scheduler, _metrics, _logs_dir) =
            scheduler(Arc::clone(&runner) as Arc<dyn WorkflowRunner>);

        // One tick fits in the runtime; only one batch of 2 launches even
        // though 8 slots are free.
        scheduler
            .run(
                test_workflow(2, Duration::from_millis(150)),
                RampUpOptions {
                    concurrency: 8,
                    runtime: Duration::from_millis(100),
                },
            )
            .await;

        assert_eq!(runner.started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_in_flight_executors_drain_after_deadline() {
        let runner = Arc::new(TrackingRunner::new(Duration::from_millis(200)));
        let (scheduler, _metrics, _logs_dir) =
            scheduler(Arc::clone(&runner) as Arc<dyn WorkflowRunner>);

        let begun = Instant::now();
        scheduler
            .run(
                test_workflow(4, Duration::from_millis(30)),
                RampUpOptions {
                    concurrency: 4,
                    runtime: Duration::from_millis(60),
                },
            )
            .await;

        // run() returned only after the 200ms workflows finished.
        assert!(begun.elapsed() >= Duration::from_millis(200));
        assert_eq!(
            runner.current.load(Ordering::SeqCst),
            0,
            "nothing may be in flight after run() returns"
        );
    }
}
