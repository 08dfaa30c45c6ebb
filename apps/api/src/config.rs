use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::layout::fitter::DEFAULT_REQUESTED_SCALE;
use crate::pipeline::distiller::DEFAULT_MAX_LENGTH;
use crate::pipeline::orchestrator::DEFAULT_AGENT_NAME;

/// Application configuration loaded from environment variables.
/// Every variable has a default; a missing API key disables the generative service.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub agent_name: String,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub distill_max_length: usize,
    pub fit_max_passes: u32,
    pub fit_requested_scale: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            port: 8080,
            rust_log: "info".to_string(),
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            distill_max_length: DEFAULT_MAX_LENGTH,
            fit_max_passes: 1,
            fit_requested_scale: DEFAULT_REQUESTED_SCALE,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = Config::default();
        Ok(Config {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            port: parse_env("PORT", defaults.port)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or(defaults.rust_log),
            agent_name: std::env::var("AGENT_NAME").unwrap_or(defaults.agent_name),
            request_timeout: Duration::from_secs(parse_env(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            shutdown_timeout: Duration::from_secs(parse_env(
                "SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout.as_secs(),
            )?),
            distill_max_length: parse_env("DISTILL_MAX_LENGTH", defaults.distill_max_length)?,
            fit_max_passes: parse_env("FIT_MAX_PASSES", defaults.fit_max_passes)?,
            fit_requested_scale: parse_env("FIT_REQUESTED_SCALE", defaults.fit_requested_scale)?,
        })
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_falls_back_to_default() {
        let value: u64 = parse_env("ONEPAGE_TEST_UNSET_VARIABLE", 30).unwrap();
        assert_eq!(value, 30);
    }

    #[test]
    fn test_parse_env_rejects_garbage() {
        std::env::set_var("ONEPAGE_TEST_BAD_PORT", "eighty");
        let err = parse_env::<u16>("ONEPAGE_TEST_BAD_PORT", 8080).unwrap_err();
        assert!(err.to_string().contains("ONEPAGE_TEST_BAD_PORT"));
        std::env::remove_var("ONEPAGE_TEST_BAD_PORT");
    }

    #[test]
    fn test_defaults_match_agent_defaults() {
        let config = Config::default();
        assert_eq!(config.agent_name, "LLMServiceAgent");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.distill_max_length, 2000);
        assert_eq!(config.fit_max_passes, 1);
    }
}
