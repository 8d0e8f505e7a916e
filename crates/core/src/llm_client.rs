//! Model Client Adapter
//!
//! The boundary to the language-model provider. An adapter holds no
//! conversation state: every call receives the full prior history of the
//! call and the new user utterance, and returns the agent's reply.

use crate::error::ModelError;
use crate::session::{Speaker, Turn};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// A stateless client producing the agent's next reply.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Produces a reply to `user_text` given everything said so far on the call.
    async fn reply(&self, history: &[Turn], user_text: &str) -> Result<String, ModelError>;
}

/// An implementation of `ModelClient` for any OpenAI-compatible chat API
/// (OpenAI itself, or Gemini through its OpenAI-compatible endpoint).
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
    system_prompt: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - API key and base URL of the provider.
    /// * `model` - The chat model identifier (e.g., "gpt-4o").
    /// * `system_prompt` - Instructions prepended to every request.
    pub fn new(config: OpenAIConfig, model: String, system_prompt: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            system_prompt,
        }
    }

    fn build_messages(
        &self,
        history: &[Turn],
        user_text: &str,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(history.len() + 2);
        if !self.system_prompt.is_empty() {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(self.system_prompt.clone())
                    .build()?
                    .into(),
            );
        }
        for turn in history {
            match turn.speaker {
                Speaker::User => messages.push(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(turn.text.clone())
                        .build()?
                        .into(),
                ),
                Speaker::Agent => messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(turn.text.clone())
                        .build()?
                        .into(),
                ),
                // System turns are call-log annotations, not model context.
                Speaker::System => {}
            }
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_text.to_string())
                .build()?
                .into(),
        );
        Ok(messages)
    }
}

#[async_trait]
impl ModelClient for OpenAICompatibleClient {
    async fn reply(&self, history: &[Turn], user_text: &str) -> Result<String, ModelError> {
        let messages = self.build_messages(history, user_text).map_err(map_openai_error)?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(map_openai_error)?;

        debug!(model = %self.model, turns = history.len(), "Sending chat completion request");
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or_else(|| ModelError::MalformedResponse("no content in response".to_string()))?;

        let text = content.trim();
        if text.is_empty() {
            return Err(ModelError::MalformedResponse("empty reply".to_string()));
        }
        Ok(text.to_string())
    }
}

fn map_openai_error(err: OpenAIError) -> ModelError {
    match err {
        OpenAIError::ApiError(api) => {
            let rate_limited = api.code.as_deref() == Some("rate_limit_exceeded")
                || api.r#type.as_deref() == Some("rate_limit_exceeded")
                || api.r#type.as_deref() == Some("insufficient_quota");
            if rate_limited {
                ModelError::RateLimited
            } else {
                ModelError::Provider(api.message)
            }
        }
        OpenAIError::JSONDeserialize(e) => ModelError::MalformedResponse(e.to_string()),
        other => ModelError::Provider(other.to_string()),
    }
}
