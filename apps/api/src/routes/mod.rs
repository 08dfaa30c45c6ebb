pub mod health;
pub mod layout;
pub mod pipeline;

use axum::{
    http::Uri,
    routing::{get, post},
    Router,
};

use crate::errors::AppError;
use crate::state::AppState;

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {uri}"))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Pipeline API: every request goes through the bus to the agent
        .route("/api/v1/process", post(pipeline::handle_process))
        .route("/api/v1/distill", post(pipeline::handle_distill))
        .route("/api/v1/optimize", post(pipeline::handle_optimize))
        .route("/api/v1/agent/status", get(pipeline::handle_agent_status))
        .route("/api/v1/agent/health", get(pipeline::handle_agent_health))
        // Layout preview on the metric engine
        .route("/api/v1/layout/fit", post(layout::handle_fit))
        .fallback(not_found)
        .with_state(state)
}
