//! # tn3270-http
//!
//! The HTTP surface:
//! - The dashboard server with its first-process-wins listener and
//!   passive-publisher fallback
//! - `/dashboard`, `/console`, `/terminal-console`
//! - `POST /api/execute`, the synchronous single-workflow endpoint

pub mod api;
pub mod console;
pub mod dashboard;
pub mod server;

pub use api::{create_api_router, serve_api, ApiState};
pub use server::{create_router, start_dashboard, DashboardContext, DashboardRole};
