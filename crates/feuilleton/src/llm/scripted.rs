//! Scripted chat client for tests.
//!
//! Returns queued responses in order and records every request, so pipeline
//! tests can assert on prompt contents and call counts without a provider.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::{ChatClient, ChatRequest, ChatResponse, ChatStream};
use crate::error::{Error, Result};

#[derive(Default)]
pub struct ScriptedChatClient {
    responses: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<ChatRequest>>,
    /// Response replayed when the queue runs dry; `None` makes exhaustion an
    /// error so tests catch unexpected calls.
    fallback: Option<String>,
}

impl ScriptedChatClient {
    #[must_use]
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
            fallback: None,
        }
    }

    /// Client that always answers with the same content.
    #[must_use]
    pub fn repeating(content: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            fallback: Some(content.into()),
        }
    }

    /// Replay `content` once the scripted queue is exhausted.
    #[must_use]
    pub fn with_fallback(mut self, content: impl Into<String>) -> Self {
        self.fallback = Some(content.into());
        self
    }

    /// Queue an error response (e.g. to exercise retry paths).
    pub fn push_error(&self, error: Error) {
        self.responses.lock().push_back(Err(error));
    }

    pub fn push_response(&self, content: impl Into<String>) {
        self.responses.lock().push_back(Ok(content.into()));
    }

    /// Number of chat calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Copy of the recorded requests.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    fn next_response(&self) -> Result<String> {
        let queued = self.responses.lock().pop_front();
        match queued {
            Some(result) => result,
            None => match &self.fallback {
                Some(content) => Ok(content.clone()),
                None => Err(Error::LlmUnavailable(
                    "scripted client exhausted".to_string(),
                )),
            },
        }
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().push(request.clone());
        let content = self.next_response()?;
        Ok(ChatResponse {
            content,
            reasoning: None,
            model: request.model.unwrap_or_else(|| "scripted".to_string()),
        })
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream> {
        let response = self.chat(request).await?;
        let chunks: Vec<Result<String>> = response
            .content
            .split_inclusive(' ')
            .map(|chunk| Ok(chunk.to_string()))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_then_errors() {
        let client = ScriptedChatClient::new(vec!["un".to_string(), "deux".to_string()]);
        let first = client
            .chat(ChatRequest::new(vec![super::super::ChatMessage::user("a")]))
            .await
            .unwrap();
        assert_eq!(first.content, "un");
        let second = client
            .chat(ChatRequest::new(vec![super::super::ChatMessage::user("b")]))
            .await
            .unwrap();
        assert_eq!(second.content, "deux");
        let third = client
            .chat(ChatRequest::new(vec![super::super::ChatMessage::user("c")]))
            .await;
        assert!(third.is_err());
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn stream_concatenates_back_to_content() {
        let client = ScriptedChatClient::repeating("la nuit tombe");
        let stream = client
            .chat_stream(ChatRequest::new(vec![super::super::ChatMessage::user("x")]))
            .await
            .unwrap();
        let parts: Vec<String> = stream.map(|part| part.unwrap()).collect().await;
        assert_eq!(parts.concat(), "la nuit tombe");
    }
}
