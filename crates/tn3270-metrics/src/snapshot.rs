//! Metrics persistence and cross-process aggregation.
//!
//! Every process snapshots its metrics record to
//! `<configDir>/3270Connect/dashboard/metrics_<pid>.json` every two
//! seconds as a whole-file write. Readers list `metrics_*.json`, skip
//! anything partial or malformed, sum the counters, and concatenate the
//! series. The host CPU/memory display series comes from the file with the
//! smallest pid so coexisting processes do not double-count host-wide
//! measurements.

use crate::store::{MetricsSnapshot, MetricsStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Interval between snapshot writes.
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(2);

/// Shared directory for metrics snapshots, under the user config dir.
pub fn default_dashboard_dir() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join("3270Connect").join("dashboard"),
        None => Path::new(".").join("dashboard"),
    }
}

/// Periodically writes one process's metrics record to the shared
/// directory.
pub struct SnapshotWriter {
    store: Arc<MetricsStore>,
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(store: Arc<MetricsStore>, dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            dir: dir.into(),
        }
    }

    /// The file this writer owns.
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("metrics_{}.json", self.store.pid()))
    }

    /// Writes the current record as a whole-file replacement.
    pub fn write_once(&self) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path();
        let data = serde_json::to_vec(&self.store.snapshot())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, data)?;
        Ok(path)
    }

    /// Spawns the 2-second snapshot loop. Runs until the process exits;
    /// write failures are logged and the loop keeps going.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(e) = self.write_once() {
                    warn!(pid = self.store.pid(), error = %e, "Failed to write metrics snapshot");
                }
                tokio::time::sleep(SNAPSHOT_INTERVAL).await;
            }
        })
    }
}

/// Reads every parseable `metrics_*.json` in `dir`. Partial or malformed
/// files are skipped.
pub fn read_snapshots(dir: &Path) -> Vec<MetricsSnapshot> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut snapshots = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("metrics_") || !name.ends_with(".json") {
            continue;
        }
        let data = match std::fs::read(entry.path()) {
            Ok(data) => data,
            Err(e) => {
                debug!(file = %name, error = %e, "Skipping unreadable metrics file");
                continue;
            }
        };
        match serde_json::from_slice::<MetricsSnapshot>(&data) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => debug!(file = %name, error = %e, "Skipping malformed metrics file"),
        }
    }
    snapshots.sort_by_key(|s| s.pid);
    snapshots
}

/// Counters summed and series concatenated across processes.
#[derive(Debug, Clone, Default)]
pub struct Aggregated {
    pub active_workflows: i64,
    pub total_workflows_started: i64,
    pub total_workflows_completed: i64,
    pub total_workflows_failed: i64,
    pub durations: Vec<f64>,
    pub cpu_usage: Vec<f64>,
    pub memory_usage: Vec<f64>,
}

/// Aggregates a set of per-process snapshots.
pub fn aggregate(snapshots: &[MetricsSnapshot]) -> Aggregated {
    let mut agg = Aggregated::default();
    for snapshot in snapshots {
        agg.active_workflows += snapshot.active_workflows;
        agg.total_workflows_started += snapshot.total_workflows_started;
        agg.total_workflows_completed += snapshot.total_workflows_completed;
        agg.total_workflows_failed += snapshot.total_workflows_failed;
        agg.durations.extend_from_slice(&snapshot.durations);
        agg.cpu_usage.extend_from_slice(&snapshot.cpu_usage);
        agg.memory_usage.extend_from_slice(&snapshot.memory_usage);
    }
    agg
}

/// Picks the snapshot carrying the host CPU/memory series for display:
/// the one with the smallest pid.
pub fn host_series(snapshots: &[MetricsSnapshot]) -> Option<&MetricsSnapshot> {
    snapshots.iter().min_by_key(|s| s.pid)
}

/// Removes metrics files left by previous runs. Returns how many were
/// deleted.
pub fn clean_stale(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("metrics_") && name.ends_with(".json") {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(file = %name, error = %e, "Failed to remove stale metrics file"),
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(pid: u32, completed: usize, failed: usize) -> Arc<MetricsStore> {
        let store = Arc::new(MetricsStore::with_identity(pid, format!("-pid {pid}")));
        for _ in 0..completed {
            store.workflow_started();
            store.workflow_completed(0.5);
        }
        for _ in 0..failed {
            store.workflow_started();
            store.workflow_failed(1.0);
        }
        store
    }

    #[test]
    fn test_write_then_aggregate_two_processes() {
        let dir = tempfile::tempdir().unwrap();

        let a = SnapshotWriter::new(store_with(100, 3, 1), dir.path());
        let b = SnapshotWriter::new(store_with(200, 2, 0), dir.path());
        a.write_once().unwrap();
        b.write_once().unwrap();

        let snapshots = read_snapshots(dir.path());
        assert_eq!(snapshots.len(), 2);

        let agg = aggregate(&snapshots);
        assert_eq!(agg.total_workflows_started, 6);
        assert_eq!(agg.total_workflows_completed, 5);
        assert_eq!(agg.total_workflows_failed, 1);
        assert_eq!(agg.active_workflows, 0);
        assert_eq!(agg.durations.len(), 6);
    }

    #[test]
    fn test_malformed_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(store_with(10, 1, 0), dir.path());
        writer.write_once().unwrap();

        std::fs::write(dir.path().join("metrics_99.json"), b"{ truncated").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), b"ignore me").unwrap();

        let snapshots = read_snapshots(dir.path());
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].pid, 10);
    }

    #[test]
    fn test_host_series_prefers_smallest_pid() {
        let dir = tempfile::tempdir().unwrap();

        let young = store_with(5000, 0, 0);
        young.record_cpu(80.0);
        let old = store_with(37, 0, 0);
        old.record_cpu(12.0);

        SnapshotWriter::new(young, dir.path()).write_once().unwrap();
        SnapshotWriter::new(old, dir.path()).write_once().unwrap();

        let snapshots = read_snapshots(dir.path());
        let host = host_series(&snapshots).unwrap();
        assert_eq!(host.pid, 37);
        assert_eq!(host.cpu_usage, vec![12.0]);
    }

    #[test]
    fn test_write_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(1, 0, 0);
        let writer = SnapshotWriter::new(Arc::clone(&store), dir.path());

        writer.write_once().unwrap();
        store.workflow_started();
        store.workflow_completed(0.2);
        writer.write_once().unwrap();

        let snapshots = read_snapshots(dir.path());
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].total_workflows_completed, 1);
    }

    #[test]
    fn test_clean_stale_removes_only_metrics_files() {
        let dir = tempfile::tempdir().unwrap();
        SnapshotWriter::new(store_with(1, 0, 0), dir.path())
            .write_once()
            .unwrap();
        std::fs::write(dir.path().join("keep.json"), b"{}").unwrap();

        assert_eq!(clean_stale(dir.path()), 1);
        assert!(dir.path().join("keep.json").exists());
        assert!(read_snapshots(dir.path()).is_empty());
    }
}
