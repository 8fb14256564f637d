//! # tn3270-metrics
//!
//! The metrics plane: per-process counters and duration history, a host
//! CPU/memory sampler, periodic JSON snapshots to a shared directory,
//! cross-process aggregation on read, and the per-process log sink the
//! dashboard consumes.

pub mod logsink;
pub mod sampler;
pub mod snapshot;
pub mod store;

pub use logsink::{LogEntry, LogSink};
pub use snapshot::{Aggregated, SnapshotWriter};
pub use store::{MetricsSnapshot, MetricsStore, HISTORY_CAPACITY};
