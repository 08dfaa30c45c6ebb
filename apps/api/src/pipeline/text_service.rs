//! Generative text seam used by the distiller and the optimizer.
//!
//! `LlmClient` is the production backend; `DisabledTextService` stands in when no
//! API key is configured so every call lands on the local fallback paths.

use async_trait::async_trait;

use crate::llm_client::{LlmClient, LlmError};

/// Text produced by a generative backend, with the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub content: String,
    pub model: String,
}

#[async_trait]
pub trait TextService: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> Result<Generated, LlmError>;
}

#[async_trait]
impl TextService for LlmClient {
    async fn generate(&self, system: &str, prompt: &str) -> Result<Generated, LlmError> {
        let completion = self.complete(system, prompt).await?;
        Ok(Generated {
            content: completion.text,
            model: completion.model,
        })
    }
}

/// Always unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTextService;

#[async_trait]
impl TextService for DisabledTextService {
    async fn generate(&self, _system: &str, _prompt: &str) -> Result<Generated, LlmError> {
        Err(LlmError::Unavailable(
            "ANTHROPIC_API_KEY is not configured".to_string(),
        ))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_service_is_unavailable() {
        let err = DisabledTextService.generate("sys", "prompt").await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_scripted_sequence_then_fails() {
        use testing::{Script, ScriptedTextService};

        let service = ScriptedTextService::new(Script::Sequence(vec!["one".to_string()]));
        assert_eq!(service.generate("s", "p").await.unwrap().content, "one");
        assert!(service.generate("s", "p").await.is_err());
        assert_eq!(service.calls(), 2);
        assert_eq!(service.prompts()[0], ("s".to_string(), "p".to_string()));
    }
}
