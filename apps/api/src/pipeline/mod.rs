// Single-page content pipeline: distill a CV record, then fit it to a line budget.
// The agent drives both stages from bus requests; the client awaits bus replies.
// All generative calls go through the TextService seam, never an HTTP client directly.

pub mod classifier;
pub mod client;
pub mod distiller;
pub mod messages;
pub mod models;
pub mod optimizer;
pub mod orchestrator;
pub mod prompts;
pub mod text_service;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

/// Failure of a single pipeline request. Published on the bus as a plain string.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Stage aborted: {0}")]
    Aborted(String),
}

const TIMEOUT_PREFIX: &str = "Request timed out";
const MALFORMED_PREFIX: &str = "Malformed request";

impl PipelineError {
    /// Error events carry plain strings; this recognizes the agent's timeout message.
    pub fn is_timeout_message(message: &str) -> bool {
        message.starts_with(TIMEOUT_PREFIX)
    }

    pub fn is_malformed_message(message: &str) -> bool {
        message.starts_with(MALFORMED_PREFIX)
    }
}

/// Identifier for requests that arrive without one: `llm-<millis>-<9 random chars>`.
pub fn generate_request_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("llm-{}-{}", Utc::now().timestamp_millis(), &suffix[..9])
}
