//! LLM client: the single point of entry for all Claude API calls in onepage.
//!
//! No other module calls the Anthropic API directly; the pipeline reaches it
//! through the `TextService` trait.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model requested for every completion.
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 4096;
const MAX_ATTEMPTS: u32 = 3;
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);
const BASE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("LLM service unavailable: {0}")]
    Unavailable(String),
}

/// Fenced-stripped reply text and the model id the API reported.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [UserTurn<'a>; 1],
}

#[derive(Debug, Serialize)]
struct UserTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl MessagesResponse {
    fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Other => None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Outcome of a single HTTP attempt that did not produce a response.
enum AttemptError {
    Retry(LlmError),
    Fatal(LlmError),
}

/// Wraps the Anthropic Messages API with retry on rate limits and server errors.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        let http = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { http, api_key })
    }

    /// Sends one user turn under `system` and returns the first text block.
    pub async fn complete(&self, system: &str, prompt: &str) -> Result<Completion, LlmError> {
        let request = MessagesRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system,
            messages: [UserTurn {
                role: "user",
                content: prompt,
            }],
        };

        let response = self.send_with_retry(&request).await?;
        let text = strip_code_fences(response.first_text().ok_or(LlmError::EmptyContent)?);
        if text.is_empty() {
            return Err(LlmError::EmptyContent);
        }
        Ok(Completion {
            text: text.to_string(),
            model: response.model.unwrap_or_else(|| MODEL.to_string()),
        })
    }

    async fn send_with_retry(
        &self,
        request: &MessagesRequest<'_>,
    ) -> Result<MessagesResponse, LlmError> {
        let mut last_error = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = backoff(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "Retrying LLM call");
                tokio::time::sleep(delay).await;
            }
            match self.send_once(request).await {
                Ok(response) => {
                    debug!(attempt, "LLM call succeeded");
                    return Ok(response);
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Retry(err)) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or(LlmError::Exhausted {
            attempts: MAX_ATTEMPTS,
        }))
    }

    async fn send_once(
        &self,
        request: &MessagesRequest<'_>,
    ) -> Result<MessagesResponse, AttemptError> {
        let response = self
            .http
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|e| AttemptError::Retry(e.into()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| AttemptError::Fatal(e.into()));
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "LLM API returned an error");
        let err = LlmError::Api {
            status: status.as_u16(),
            message: error_message(body),
        };
        if is_retryable(status) {
            Err(AttemptError::Retry(err))
        } else {
            Err(AttemptError::Fatal(err))
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// 1s, 2s, 4s, ...
fn backoff(attempt: u32) -> Duration {
    BASE_BACKOFF * (1 << attempt.saturating_sub(1))
}

/// The API's `error.message` when the body carries one, else the raw body.
fn error_message(body: String) -> String {
    serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|envelope| envelope.error.message)
        .unwrap_or(body)
}

/// Strips ```lang ... ``` or ``` ... ``` fences the model sometimes wraps text in.
fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(stripped) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an info string such as `markdown` on the opening fence line.
    let body = match stripped.find('\n') {
        Some(idx) if !stripped[..idx].contains(' ') => &stripped[idx + 1..],
        _ => stripped,
    };
    body.trim_end()
        .strip_suffix("```")
        .map(str::trim)
        .unwrap_or_else(|| body.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences_with_language_tag() {
        let input = "```markdown\n# Ada Lovelace\nAnalyst\n```";
        assert_eq!(strip_code_fences(input), "# Ada Lovelace\nAnalyst");
    }

    #[test]
    fn test_strip_fences_without_tag() {
        let input = "```\nplain text\n```";
        assert_eq!(strip_code_fences(input), "plain text");
    }

    #[test]
    fn test_strip_fences_no_fences() {
        assert_eq!(strip_code_fences("  just text \n"), "just text");
    }

    #[test]
    fn test_first_text_skips_other_blocks() {
        let response: MessagesResponse = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "tool_use", "id": "t1", "name": "lookup", "input": {}},
                {"type": "text", "text": "hello"}
            ],
            "usage": {"input_tokens": 3, "output_tokens": 1}
        }))
        .unwrap();
        assert_eq!(response.first_text(), Some("hello"));
        assert_eq!(response.model, None);
    }

    #[test]
    fn test_error_message_prefers_api_envelope() {
        let body = r#"{"type":"error","error":{"type":"invalid_request_error","message":"bad prompt"}}"#;
        assert_eq!(error_message(body.to_string()), "bad prompt");
        assert_eq!(error_message("gateway down".to_string()), "gateway down");
    }

    #[test]
    fn test_retry_policy() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(4));
    }
}
