//! Completion-service boundary.
//!
//! The orchestrator only needs [`CompletionService::get_response`] and
//! [`CompletionService::check_connection`]. [`OpenAICompatibleCompletion`]
//! talks to any OpenAI-compatible chat-completions endpoint, and
//! [`RetryingCompletion`] adds the caller-side retries so that by the time an
//! error reaches the orchestrator, retrying is no longer worthwhile.

use crate::error::ModelError;
use crate::retry::RetryPolicy;
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use tracing::{debug, info};

/// A generic client for a remote language model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Generates a reply to `text` using the configured persona.
    async fn get_response(&self, text: &str) -> Result<String, ModelError>;

    /// Verifies the service is reachable and the credentials are accepted.
    async fn check_connection(&self) -> Result<(), ModelError>;
}

/// Generation parameters sent with every request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 300,
        }
    }
}

/// An implementation of `CompletionService` for any OpenAI-compatible API.
pub struct OpenAICompatibleCompletion {
    client: Client<OpenAIConfig>,
    persona_prompt: String,
    params: GenerationParams,
}

impl OpenAICompatibleCompletion {
    /// Creates a new client.
    ///
    /// # Arguments
    ///
    /// * `config` - API key and base URL of the service.
    /// * `persona_prompt` - The system prompt describing the agent's persona.
    /// * `params` - Model name and generation parameters.
    pub fn new(config: OpenAIConfig, persona_prompt: String, params: GenerationParams) -> Self {
        Self {
            client: Client::with_config(config),
            persona_prompt,
            params,
        }
    }
}

#[async_trait]
impl CompletionService for OpenAICompatibleCompletion {
    #[allow(deprecated)]
    async fn get_response(&self, text: &str) -> Result<String, ModelError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.params.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(self.persona_prompt.as_str())
                    .build()
                    .map_err(map_openai_error)?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(text)
                    .build()
                    .map_err(map_openai_error)?
                    .into(),
            ])
            .temperature(self.params.temperature)
            .max_tokens(self.params.max_tokens)
            .build()
            .map_err(map_openai_error)?;

        debug!(model = %self.params.model, chars = text.len(), "requesting completion");
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        let reply = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .map(str::trim)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| ModelError::InvalidResponse("response had no text content".into()))?;

        Ok(reply.to_string())
    }

    async fn check_connection(&self) -> Result<(), ModelError> {
        let models = self
            .client
            .models()
            .list()
            .await
            .map_err(map_openai_error)?;
        info!(available = models.data.len(), "completion service reachable");
        Ok(())
    }
}

fn map_openai_error(err: OpenAIError) -> ModelError {
    match err {
        OpenAIError::Reqwest(e) => ModelError::NetworkFailure(e.to_string()),
        OpenAIError::ApiError(e) => ModelError::ServerError(e.message),
        other => ModelError::InvalidResponse(other.to_string()),
    }
}

/// Retries transient failures of the wrapped service before reporting them.
pub struct RetryingCompletion<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: CompletionService> RetryingCompletion<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<S: CompletionService> CompletionService for RetryingCompletion<S> {
    async fn get_response(&self, text: &str) -> Result<String, ModelError> {
        self.policy
            .execute_while(|_| self.inner.get_response(text), ModelError::is_retryable)
            .await
            .map_err(|e| e.last)
    }

    async fn check_connection(&self) -> Result<(), ModelError> {
        self.policy
            .execute_while(|_| self.inner.check_connection(), ModelError::is_retryable)
            .await
            .map_err(|e| e.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy::linear(3, Duration::from_millis(500))
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let mut mock = MockCompletionService::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_get_response()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(ModelError::NetworkFailure("connection reset".into())));
        mock.expect_get_response()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|text| Ok(format!("echo: {text}")));

        let service = RetryingCompletion::new(mock, policy());
        let reply = service.get_response("hola").await;
        assert_eq!(reply, Ok("echo: hola".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let mut mock = MockCompletionService::new();
        mock.expect_get_response()
            .times(3)
            .returning(|_| Err(ModelError::ServerError("503".into())));

        let service = RetryingCompletion::new(mock, policy());
        let err = service.get_response("hola").await.unwrap_err();
        assert_eq!(err, ModelError::ServerError("503".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_response_is_not_retried() {
        let mut mock = MockCompletionService::new();
        mock.expect_get_response()
            .times(1)
            .returning(|_| Err(ModelError::InvalidResponse("empty".into())));

        let service = RetryingCompletion::new(mock, policy());
        let err = service.get_response("hola").await.unwrap_err();
        assert!(matches!(err, ModelError::InvalidResponse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_connection_is_retried() {
        let mut mock = MockCompletionService::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_check_connection()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(ModelError::NetworkFailure("dns".into())));
        mock.expect_check_connection()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let service = RetryingCompletion::new(mock, policy());
        assert_eq!(service.check_connection().await, Ok(()));
    }
}
