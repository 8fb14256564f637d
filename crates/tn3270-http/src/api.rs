//! The synchronous workflow API.
//!
//! `POST /api/execute` runs one workflow and answers with the captured
//! screen-dump content. Every response, success or failure, carries the
//! same envelope: `{returnCode, status, message, output|error}`. A failing
//! workflow produces an error envelope; it never kills the process.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tn3270_emulator::BinaryProvisioner;
use tn3270_metrics::MetricsStore;
use tn3270_workflow::{
    PortAllocator, Workflow, WorkflowConfig, WorkflowExecutor, WorkflowOutcome,
};
use tokio::net::TcpListener;
use tracing::{error, info};

/// Services the API endpoint needs.
#[derive(Clone)]
pub struct ApiState {
    pub metrics: Arc<MetricsStore>,
    pub provisioner: Arc<BinaryProvisioner>,
    pub ports: Arc<PortAllocator>,
}

/// Builds the API router.
pub fn create_api_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/execute", post(execute_handler))
        .with_state(state)
}

/// Binds the API port and serves until the process exits.
pub async fn serve_api(state: ApiState, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("API server is running on :{port}");
    axum::serve(listener, create_api_router(state)).await
}

/// `POST /api/execute`
async fn execute_handler(
    State(state): State<ApiState>,
    Json(config): Json<WorkflowConfig>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let workflow = Workflow::from_config(&config)
        .map_err(|e| ApiError::BadRequest("Invalid request payload".to_string(), e.to_string()))?;

    let control_port = state
        .ports
        .next()
        .map_err(|e| ApiError::Internal("No control port available".to_string(), e.to_string()))?;

    let executor = WorkflowExecutor::for_api(
        Arc::clone(&state.metrics),
        Arc::clone(&state.provisioner),
    );
    let report = executor.run(control_port, &workflow).await;

    match report.outcome {
        WorkflowOutcome::Failed { step, reason } => Err(ApiError::WorkflowFailed {
            step: step.to_string(),
            reason,
        }),
        WorkflowOutcome::Completed => {
            let output = match report.output_path {
                Some(path) => {
                    let contents = std::fs::read_to_string(&path).map_err(|e| {
                        ApiError::Internal("Failed to read output file".to_string(), e.to_string())
                    })?;
                    let _ = std::fs::remove_file(&path);
                    contents
                }
                None => String::new(),
            };
            Ok(Json(json!({
                "returnCode": 200,
                "status": "okay",
                "message": "Workflow executed successfully",
                "output": output,
            })))
        }
    }
}

/// API failures, rendered as the error envelope.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String, String),
    Internal(String, String),
    WorkflowFailed { step: String, reason: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, detail) = match self {
            ApiError::BadRequest(message, detail) => (StatusCode::BAD_REQUEST, message, detail),
            ApiError::Internal(message, detail) => {
                (StatusCode::INTERNAL_SERVER_ERROR, message, detail)
            }
            ApiError::WorkflowFailed { step, reason } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Workflow step '{step}' failed"),
                reason,
            ),
        };

        error!("API error: {} - {}: {}", status, message, detail);

        let body = Json(json!({
            "returnCode": status.as_u16(),
            "status": "error",
            "message": message,
            "error": detail,
        }));
        (status, body).into_response()
    }
}
