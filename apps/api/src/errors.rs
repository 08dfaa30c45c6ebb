use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::layout::{FitError, RenderError};
use crate::pipeline::client::ClientError;
use crate::pipeline::PipelineError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ClientError> for AppError {
    fn from(err: ClientError) -> Self {
        if err.is_timeout() {
            return AppError::Timeout(err.to_string());
        }
        match &err {
            ClientError::Failed { message, .. } if PipelineError::is_malformed_message(message) => {
                AppError::Validation(message.clone())
            }
            ClientError::NoAgent(_) => AppError::Unavailable(err.to_string()),
            _ => AppError::Pipeline(err.to_string()),
        }
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        match err {
            FitError::InvalidOptions(msg) => AppError::Validation(msg),
            FitError::Render(e) => e.into(),
        }
    }
}

impl From<RenderError> for AppError {
    fn from(err: RenderError) -> Self {
        AppError::Render(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Timeout(msg) => {
                tracing::warn!("Timeout: {msg}");
                (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", msg.clone())
            }
            AppError::Pipeline(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "PIPELINE_ERROR",
                msg.clone(),
            ),
            AppError::Render(msg) => {
                tracing::error!("Render error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "RENDER_ERROR",
                    "A rendering error occurred".to_string(),
                )
            }
            AppError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "UNAVAILABLE",
                msg.clone(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
