use axum::{extract::State, Json};

use crate::errors::AppError;
use crate::pipeline::client::StageReply;
use crate::pipeline::messages::{DistillRequest, HealthSnapshot, OptimizeRequest, StatusSnapshot};
use crate::pipeline::models::{DistillOutput, OptimizeOutput, ProcessingRequest, ProcessingResult};
use crate::state::AppState;

/// POST /api/v1/process
pub async fn handle_process(
    State(state): State<AppState>,
    Json(req): Json<ProcessingRequest>,
) -> Result<Json<ProcessingResult>, AppError> {
    Ok(Json(state.client.process(req).await?))
}

/// POST /api/v1/distill
pub async fn handle_distill(
    State(state): State<AppState>,
    Json(req): Json<DistillRequest>,
) -> Result<Json<StageReply<DistillOutput>>, AppError> {
    Ok(Json(state.client.distill(req).await?))
}

/// POST /api/v1/optimize
pub async fn handle_optimize(
    State(state): State<AppState>,
    Json(req): Json<OptimizeRequest>,
) -> Result<Json<StageReply<OptimizeOutput>>, AppError> {
    Ok(Json(state.client.optimize(req).await?))
}

/// GET /api/v1/agent/status
pub async fn handle_agent_status(
    State(state): State<AppState>,
) -> Result<Json<StatusSnapshot>, AppError> {
    Ok(Json(state.client.status()?))
}

/// GET /api/v1/agent/health
pub async fn handle_agent_health(
    State(state): State<AppState>,
) -> Result<Json<HealthSnapshot>, AppError> {
    Ok(Json(state.client.health()?))
}
