use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns a simple status object with service version and the hosted agent.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "onepage-api",
        "agent": state.agent.agent_name(),
        "active_requests": state.agent.active_request_count(),
        "generative_service": state.config.anthropic_api_key.is_some()
    }))
}
