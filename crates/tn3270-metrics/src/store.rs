//! Per-process metrics state.
//!
//! Counters are atomic; the duration list and the CPU/memory histories sit
//! behind their own locks. The four counters are individually consistent
//! but a pair of reads is not a snapshot; [`MetricsStore::snapshot`] is as
//! close as external observers get.
//!
//! Invariants maintained here:
//! - `started == completed + failed + active`
//! - `durations.len() == completed + failed`

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Capacity of the sliding CPU and memory histories.
pub const HISTORY_CAPACITY: usize = 100;

/// Live per-process metrics record.
pub struct MetricsStore {
    pid: u32,
    params: String,
    started: AtomicI64,
    completed: AtomicI64,
    failed: AtomicI64,
    active: AtomicI64,
    durations: Mutex<Vec<f64>>,
    cpu_history: Mutex<Vec<f64>>,
    mem_history: Mutex<Vec<f64>>,
}

impl MetricsStore {
    /// Creates a store keyed by this process's pid and invocation
    /// parameters.
    pub fn new() -> Self {
        let params = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
        Self::with_identity(std::process::id(), params)
    }

    /// Creates a store with an explicit identity. The pid is also what the
    /// aggregator uses as tiebreak, so tests pick their own.
    pub fn with_identity(pid: u32, params: impl Into<String>) -> Self {
        Self {
            pid,
            params: params.into(),
            started: AtomicI64::new(0),
            completed: AtomicI64::new(0),
            failed: AtomicI64::new(0),
            active: AtomicI64::new(0),
            durations: Mutex::new(Vec::new()),
            cpu_history: Mutex::new(Vec::new()),
            mem_history: Mutex::new(Vec::new()),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Records a workflow entering execution.
    pub fn workflow_started(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a clean workflow exit with its duration in seconds.
    pub fn workflow_completed(&self, duration_secs: f64) {
        self.durations.lock().push(duration_secs);
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a failed workflow exit with its duration in seconds.
    pub fn workflow_failed(&self, duration_secs: f64) {
        self.durations.lock().push(duration_secs);
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    /// Appends a host CPU sample (0-100), trimming the history from the
    /// head at capacity.
    pub fn record_cpu(&self, percent: f64) {
        push_bounded(&mut self.cpu_history.lock(), percent);
    }

    /// Appends a host memory-used sample (0-100).
    pub fn record_memory(&self, percent: f64) {
        push_bounded(&mut self.mem_history.lock(), percent);
    }

    /// Most recent CPU sample, if any.
    pub fn latest_cpu(&self) -> Option<f64> {
        self.cpu_history.lock().last().copied()
    }

    /// Most recent memory sample, if any.
    pub fn latest_memory(&self) -> Option<f64> {
        self.mem_history.lock().last().copied()
    }

    pub fn started(&self) -> i64 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> i64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> i64 {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Copies the current state into a serializable record.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pid: self.pid,
            active_workflows: self.active(),
            total_workflows_started: self.started(),
            total_workflows_completed: self.completed(),
            total_workflows_failed: self.failed(),
            durations: self.durations.lock().clone(),
            cpu_usage: self.cpu_history.lock().clone(),
            memory_usage: self.mem_history.lock().clone(),
            params: self.params.clone(),
        }
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded(history: &mut Vec<f64>, value: f64) {
    history.push(value);
    if history.len() > HISTORY_CAPACITY {
        history.remove(0);
    }
}

/// One process's metrics as persisted to `metrics_<pid>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub pid: u32,
    #[serde(rename = "activeWorkflows")]
    pub active_workflows: i64,
    #[serde(rename = "totalWorkflowsStarted")]
    pub total_workflows_started: i64,
    #[serde(rename = "totalWorkflowsCompleted")]
    pub total_workflows_completed: i64,
    #[serde(rename = "totalWorkflowsFailed")]
    pub total_workflows_failed: i64,
    pub durations: Vec<f64>,
    #[serde(rename = "cpuUsage")]
    pub cpu_usage: Vec<f64>,
    #[serde(rename = "memoryUsage")]
    pub memory_usage: Vec<f64>,
    pub params: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariants(store: &MetricsStore) {
        let snap = store.snapshot();
        assert_eq!(
            snap.total_workflows_started,
            snap.total_workflows_completed + snap.total_workflows_failed + snap.active_workflows
        );
        assert_eq!(
            snap.durations.len() as i64,
            snap.total_workflows_completed + snap.total_workflows_failed
        );
    }

    #[test]
    fn test_counter_invariants_through_lifecycle() {
        let store = MetricsStore::with_identity(42, "-concurrent 4");
        assert_invariants(&store);

        store.workflow_started();
        store.workflow_started();
        store.workflow_started();
        assert_eq!(store.active(), 3);
        assert_invariants(&store);

        store.workflow_completed(0.5);
        assert_invariants(&store);

        store.workflow_failed(1.2);
        assert_invariants(&store);

        store.workflow_completed(0.9);
        assert_eq!(store.active(), 0);
        assert_eq!(store.started(), 3);
        assert_eq!(store.completed(), 2);
        assert_eq!(store.failed(), 1);
        assert_invariants(&store);
    }

    #[test]
    fn test_histories_trim_from_head() {
        let store = MetricsStore::with_identity(1, "");
        for i in 0..(HISTORY_CAPACITY + 10) {
            store.record_cpu(i as f64);
        }
        let snap = store.snapshot();
        assert_eq!(snap.cpu_usage.len(), HISTORY_CAPACITY);
        assert_eq!(snap.cpu_usage[0], 10.0);
        assert_eq!(*snap.cpu_usage.last().unwrap(), (HISTORY_CAPACITY + 9) as f64);
    }

    #[test]
    fn test_snapshot_json_field_names() {
        let store = MetricsStore::with_identity(7, "-verbose");
        store.workflow_started();
        store.workflow_completed(2.0);

        let json = serde_json::to_value(store.snapshot()).unwrap();
        assert_eq!(json["pid"], 7);
        assert_eq!(json["totalWorkflowsStarted"], 1);
        assert_eq!(json["totalWorkflowsCompleted"], 1);
        assert_eq!(json["totalWorkflowsFailed"], 0);
        assert_eq!(json["activeWorkflows"], 0);
        assert_eq!(json["params"], "-verbose");
        assert!(json["durations"].is_array());
        assert!(json["cpuUsage"].is_array());
        assert!(json["memoryUsage"].is_array());
    }
}
