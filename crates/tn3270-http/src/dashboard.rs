//! The dashboard page.
//!
//! One HTML page showing the aggregated counters across every publishing
//! process, a per-pid workflow-duration chart, and the host CPU/memory
//! chart taken from the smallest-pid metrics file. The auto-refresh
//! control reloads the page with its settings carried in the query string.

use crate::server::DashboardContext;
use axum::extract::{Query, State};
use axum::response::Html;
use serde::Deserialize;
use tn3270_metrics::snapshot::{aggregate, host_series, read_snapshots};

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    #[serde(rename = "autoRefresh")]
    pub auto_refresh: Option<String>,
    #[serde(rename = "refreshPeriod")]
    pub refresh_period: Option<String>,
}

const REFRESH_CHOICES: [&str; 5] = ["1", "5", "10", "15", "30"];

/// `GET /dashboard`
pub async fn dashboard_handler(
    State(ctx): State<DashboardContext>,
    Query(query): Query<DashboardQuery>,
) -> Html<String> {
    let snapshots = read_snapshots(&ctx.dashboard_dir);
    let agg = aggregate(&snapshots);
    let host = host_series(&snapshots);

    let auto_refresh = query.auto_refresh.as_deref() == Some("true");
    let refresh_period = query
        .refresh_period
        .filter(|p| REFRESH_CHOICES.contains(&p.as_str()))
        .unwrap_or_else(|| "5".to_string());

    let metrics_json = serde_json::to_string(&snapshots).unwrap_or_else(|_| "[]".to_string());
    let host_json = host
        .and_then(|h| serde_json::to_string(h).ok())
        .unwrap_or_else(|| "null".to_string());

    let options = REFRESH_CHOICES
        .iter()
        .map(|choice| {
            let selected = if *choice == refresh_period { " selected" } else { "" };
            format!("<option value=\"{choice}\"{selected}>{choice}s</option>")
        })
        .collect::<String>();
    let checked = if auto_refresh { " checked" } else { "" };

    let page = format!(
        "<!DOCTYPE html>\n\
         <html><head><title>3270 Workflow Dashboard</title>\n\
         <style>{style}</style></head>\n\
         <body>\n\
         <h1>3270 Workflow Dashboard</h1>\n\
         <div class=\"counters\">\n\
           <div class=\"counter\"><span>Active</span><strong>{active}</strong></div>\n\
           <div class=\"counter\"><span>Started</span><strong>{started}</strong></div>\n\
           <div class=\"counter\"><span>Completed</span><strong>{completed}</strong></div>\n\
           <div class=\"counter\"><span>Failed</span><strong>{failed}</strong></div>\n\
         </div>\n\
         <form class=\"refresh\" method=\"get\" action=\"/dashboard\">\n\
           <label><input type=\"checkbox\" name=\"autoRefresh\" value=\"true\"{checked}\
           onchange=\"this.form.submit()\"> Auto refresh</label>\n\
           <select name=\"refreshPeriod\" onchange=\"this.form.submit()\">{options}</select>\n\
         </form>\n\
         <h2>Workflow durations per process</h2>\n\
         <canvas id=\"durationChart\" width=\"900\" height=\"260\"></canvas>\n\
         <h2>Host CPU and memory</h2>\n\
         <canvas id=\"cpuMemChart\" width=\"900\" height=\"260\"></canvas>\n\
         <script>\n\
         const METRICS = {metrics_json};\n\
         const HOST = {host_json};\n\
         const AUTO_REFRESH = {auto_refresh};\n\
         const REFRESH_PERIOD = {refresh_period};\n\
         </script>\n\
         <script>{script}</script>\n\
         </body></html>",
        style = PAGE_STYLE,
        active = agg.active_workflows,
        started = agg.total_workflows_started,
        completed = agg.total_workflows_completed,
        failed = agg.total_workflows_failed,
        checked = checked,
        options = options,
        metrics_json = metrics_json,
        host_json = host_json,
        auto_refresh = auto_refresh,
        refresh_period = refresh_period,
        script = PAGE_SCRIPT,
    );
    Html(page)
}

const PAGE_STYLE: &str = "\
body{font-family:sans-serif;margin:2em;color:#222}\
.counters{display:flex;gap:1.5em}\
.counter{border:1px solid #ccc;border-radius:6px;padding:0.8em 1.4em;text-align:center}\
.counter span{display:block;font-size:0.8em;color:#666}\
.counter strong{font-size:1.6em}\
.refresh{margin:1em 0}\
canvas{border:1px solid #eee}";

const PAGE_SCRIPT: &str = r#"
function drawSeries(canvas, seriesList, maxY) {
  const ctx = canvas.getContext('2d');
  ctx.clearRect(0, 0, canvas.width, canvas.height);
  const colors = ['#2b6cb0', '#c05621', '#2f855a', '#6b46c1', '#b83280'];
  const pad = 30;
  const w = canvas.width - 2 * pad;
  const h = canvas.height - 2 * pad;
  ctx.strokeStyle = '#999';
  ctx.strokeRect(pad, pad, w, h);
  seriesList.forEach(function (series, idx) {
    const points = series.points;
    if (!points || points.length === 0) { return; }
    ctx.strokeStyle = colors[idx % colors.length];
    ctx.beginPath();
    points.forEach(function (value, i) {
      const x = pad + (points.length === 1 ? 0 : (i / (points.length - 1)) * w);
      const y = pad + h - Math.min(value / maxY, 1) * h;
      if (i === 0) { ctx.moveTo(x, y); } else { ctx.lineTo(x, y); }
    });
    ctx.stroke();
    ctx.fillStyle = ctx.strokeStyle;
    ctx.fillText(series.label, pad + 6, pad + 14 + idx * 14);
  });
}

const durationSeries = METRICS.map(function (m) {
  return { label: 'pid ' + m.pid, points: m.durations };
});
const maxDuration = Math.max(1, ...durationSeries.flatMap(function (s) { return s.points; }));
drawSeries(document.getElementById('durationChart'), durationSeries, maxDuration);

const hostSeries = HOST === null ? [] : [
  { label: 'CPU %', points: HOST.cpuUsage },
  { label: 'Memory %', points: HOST.memoryUsage }
];
drawSeries(document.getElementById('cpuMemChart'), hostSeries, 100);

if (AUTO_REFRESH) {
  setTimeout(function () {
    window.location = '/dashboard?autoRefresh=true&refreshPeriod=' + REFRESH_PERIOD;
  }, REFRESH_PERIOD * 1000);
}
"#;

#[cfg(test)]
mod tests {
    use crate::server::{create_router, DashboardContext};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tn3270_metrics::{MetricsStore, SnapshotWriter};
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn test_dashboard_aggregates_all_processes() {
        let dir = tempfile::tempdir().unwrap();
        let dashboard_dir = dir.path().join("dashboard");

        let a = Arc::new(MetricsStore::with_identity(100, ""));
        a.workflow_started();
        a.workflow_completed(0.4);
        let b = Arc::new(MetricsStore::with_identity(200, ""));
        b.workflow_started();
        b.workflow_failed(0.9);
        SnapshotWriter::new(a, &dashboard_dir).write_once().unwrap();
        SnapshotWriter::new(b, &dashboard_dir).write_once().unwrap();

        let app = create_router(DashboardContext {
            dashboard_dir,
            logs_dir: dir.path().join("logs"),
        });
        let response = app
            .oneshot(Request::builder().uri("/dashboard").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8_lossy(&body);
        assert!(html.contains("<span>Started</span><strong>2</strong>"));
        assert!(html.contains("<span>Completed</span><strong>1</strong>"));
        assert!(html.contains("<span>Failed</span><strong>1</strong>"));
        assert!(html.contains("\"pid\":100"));
        assert!(html.contains("\"pid\":200"));
    }

    #[tokio::test]
    async fn test_dashboard_renders_with_no_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(DashboardContext {
            dashboard_dir: dir.path().join("dashboard"),
            logs_dir: dir.path().join("logs"),
        });

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/dashboard?autoRefresh=true&refreshPeriod=10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8_lossy(&body);
        assert!(html.contains("const HOST = null"));
        assert!(html.contains("const AUTO_REFRESH = true"));
        assert!(html.contains("value=\"10\" selected"));
    }
}
