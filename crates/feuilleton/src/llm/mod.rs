//! LLM client interface.
//!
//! Providers implement [`ChatClient`]; the rest of the workspace only sees
//! this trait. Retry and circuit-breaking live here so every provider gets
//! the same failure semantics.

mod circuit;
mod retry;
mod scripted;

pub use circuit::CircuitBreaker;
pub use retry::{with_retry, RetryPolicy};
pub use scripted::ScriptedChatClient;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One chat-completion call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Override of the client's default model (e.g. the reasoning variant).
    pub model: Option<String>,
    /// Ask the provider for `response_format = json_object`. Callers must
    /// still parse defensively.
    pub json_mode: bool,
}

impl ChatRequest {
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: 0.7,
            max_tokens: 2000,
            model: None,
            json_mode: false,
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    /// Reasoning-model scratchpad, when the provider returns one.
    pub reasoning: Option<String>,
    pub model: String,
}

/// Token stream of a streaming completion.
pub type ChatStream = BoxStream<'static, Result<String>>;

/// Uniform async chat interface over a completion provider.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream>;
}

/// Call the model expecting a JSON object; on a malformed reply, retry once
/// with a reinforced prompt before giving up with [`Error::LlmBadFormat`].
///
/// [`Error::LlmBadFormat`]: crate::error::Error::LlmBadFormat
pub async fn chat_json(
    client: &dyn ChatClient,
    request: ChatRequest,
) -> Result<serde_json::Value> {
    let first = client.chat(request.clone().json()).await?;
    if let Some(value) = crate::text::extract_json_object(&first.content) {
        return Ok(value);
    }
    tracing::debug!("malformed JSON payload, retrying with reinforced prompt");
    let mut reinforced = request.clone();
    reinforced.messages.push(ChatMessage::user(
        "Reponds UNIQUEMENT avec un objet JSON valide, sans texte autour.",
    ));
    let second = client.chat(reinforced.json()).await?;
    crate::text::extract_json_object(&second.content).ok_or_else(|| {
        crate::error::Error::LlmBadFormat(format!(
            "expected a JSON object, got: {}",
            crate::text::truncate_chars(&second.content, 200)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_json_recovers_on_second_attempt() {
        let client = ScriptedChatClient::new(vec![
            "pas du json".to_string(),
            "{\"ok\": true}".to_string(),
        ]);
        let value = chat_json(&client, ChatRequest::new(vec![ChatMessage::user("x")]))
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn chat_json_fails_after_two_bad_payloads() {
        let client =
            ScriptedChatClient::new(vec!["rien".to_string(), "toujours rien".to_string()]);
        let err = chat_json(&client, ChatRequest::new(vec![ChatMessage::user("x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::LlmBadFormat(_)));
    }
}
