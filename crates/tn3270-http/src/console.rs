//! Console log endpoints.
//!
//! `/console` returns log entries as JSON, `/terminal-console` as plain
//! text, both newest-first. A `pid` query parameter narrows the view to
//! one process; without it every process's file is merged.

use crate::server::DashboardContext;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use tn3270_metrics::logsink::{read_entries, LogEntry};

#[derive(Debug, Deserialize)]
pub struct ConsoleQuery {
    pub pid: Option<String>,
}

/// `GET /console?pid=<pid?>` — JSON array of log entries, newest-first.
pub async fn console_handler(
    State(ctx): State<DashboardContext>,
    Query(query): Query<ConsoleQuery>,
) -> Json<Vec<LogEntry>> {
    Json(read_entries(&ctx.logs_dir, query.pid.as_deref()))
}

/// `GET /terminal-console?pid=<pid?>` — the same content as plain text.
pub async fn terminal_console_handler(
    State(ctx): State<DashboardContext>,
    Query(query): Query<ConsoleQuery>,
) -> String {
    let entries = read_entries(&ctx.logs_dir, query.pid.as_deref());
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!(
            "{} | PID: {} | Params: {} | Log: {}\n",
            entry.timestamp.to_rfc3339(),
            entry.pid,
            entry.parameters,
            entry.message
        ));
    }
    out
}
