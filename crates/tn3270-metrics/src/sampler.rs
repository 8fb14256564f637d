//! Host CPU and memory sampling.
//!
//! One sample per second: the CPU measurement spans the full second
//! (refresh, wait, refresh) and is averaged across cores, so the
//! measurement window itself is the cadence. Memory is read as percent of
//! total at the end of each window.

use crate::store::MetricsStore;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::task::JoinHandle;

const SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Spawns the background sampler feeding `store`'s CPU and memory
/// histories. Runs until the process exits.
pub fn spawn(store: Arc<MetricsStore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );

        loop {
            system.refresh_cpu_all();
            tokio::time::sleep(SAMPLE_WINDOW).await;
            system.refresh_cpu_all();

            let cpus = system.cpus();
            if !cpus.is_empty() {
                let overall =
                    cpus.iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / cpus.len() as f64;
                store.record_cpu(overall);
            }

            system.refresh_memory();
            let total = system.total_memory();
            if total > 0 {
                store.record_memory(system.used_memory() as f64 / total as f64 * 100.0);
            }
        }
    })
}
