//! Per-process log sink.
//!
//! Every user-visible scheduler/executor progress line is mirrored as one
//! JSON document per line in `logs/logs_<pid>.json`, tagged with the pid
//! and the process invocation parameters. The dashboard reads these files
//! back, newest-first. There is no rotation; the next active dashboard
//! cleans files from prior runs.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One persisted log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub pid: String,
    pub parameters: String,
    #[serde(rename = "log")]
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only writer for this process's log file.
pub struct LogSink {
    path: PathBuf,
    pid: String,
    parameters: String,
    write_lock: Mutex<()>,
}

impl LogSink {
    /// Creates the sink for this process under `dir` (created if absent).
    pub fn new(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let params = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
        Self::with_identity(dir, std::process::id(), params)
    }

    /// Creates a sink with an explicit identity, for coexisting-process
    /// tests.
    pub fn with_identity(
        dir: impl AsRef<Path>,
        pid: u32,
        parameters: impl Into<String>,
    ) -> std::io::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(format!("logs_{pid}.json")),
            pid: pid.to_string(),
            parameters: parameters.into(),
            write_lock: Mutex::new(()),
        })
    }

    /// Appends one entry. Failures are logged and swallowed; losing a
    /// progress line must not fail a workflow.
    pub fn store(&self, message: impl Into<String>) {
        let entry = LogEntry {
            pid: self.pid.clone(),
            parameters: self.parameters.clone(),
            message: message.into(),
            timestamp: Utc::now(),
        };

        let _guard = self.write_lock.lock();
        let result = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .and_then(|mut file| {
                let mut line = serde_json::to_vec(&entry)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                line.push(b'\n');
                file.write_all(&line)
            });
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "Failed to append log entry");
        }
    }
}

/// Reads log entries from `dir`, newest-first. With a pid filter only that
/// process's file is consulted; otherwise all `logs_*.json` files are
/// merged. Unparseable lines are skipped.
pub fn read_entries(dir: &Path, pid: Option<&str>) -> Vec<LogEntry> {
    let mut entries = Vec::new();

    let paths: Vec<PathBuf> = match pid {
        Some(pid) => vec![dir.join(format!("logs_{pid}.json"))],
        None => match std::fs::read_dir(dir) {
            Ok(read) => read
                .flatten()
                .filter(|e| {
                    let name = e.file_name();
                    let name = name.to_string_lossy();
                    name.starts_with("logs_") && name.ends_with(".json")
                })
                .map(|e| e.path())
                .collect(),
            Err(_) => Vec::new(),
        },
    };

    for path in paths {
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => continue,
        };
        for line in content.lines() {
            if let Ok(entry) = serde_json::from_str::<LogEntry>(line) {
                entries.push(entry);
            }
        }
    }

    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries
}

/// Removes log files left by previous runs. Returns how many were deleted.
pub fn clean_stale(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("logs_") && name.ends_with(".json") {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(file = %name, error = %e, "Failed to remove stale log file"),
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::with_identity(dir.path(), 42, "-concurrent 2").unwrap();

        sink.store("first");
        sink.store("second");
        sink.store("third");

        let entries = read_entries(dir.path(), None);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "third");
        assert_eq!(entries[2].message, "first");
        assert!(entries.iter().all(|e| e.pid == "42"));
        assert!(entries.iter().all(|e| e.parameters == "-concurrent 2"));
    }

    #[test]
    fn test_pid_filter_selects_one_file() {
        let dir = tempfile::tempdir().unwrap();
        LogSink::with_identity(dir.path(), 1, "").unwrap().store("from one");
        LogSink::with_identity(dir.path(), 2, "").unwrap().store("from two");

        let entries = read_entries(dir.path(), Some("2"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "from two");

        let entries = read_entries(dir.path(), Some("999"));
        assert!(entries.is_empty());
    }

    #[test]
    fn test_entries_serialize_with_log_field() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::with_identity(dir.path(), 7, "").unwrap();
        sink.store("hello");

        let raw = std::fs::read_to_string(dir.path().join("logs_7.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(value["log"], "hello");
        assert_eq!(value["pid"], "7");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_clean_stale_removes_log_files() {
        let dir = tempfile::tempdir().unwrap();
        LogSink::with_identity(dir.path(), 1, "").unwrap().store("x");
        LogSink::with_identity(dir.path(), 2, "").unwrap().store("y");

        assert_eq!(clean_stale(dir.path()), 2);
        assert!(read_entries(dir.path(), None).is_empty());
    }
}
