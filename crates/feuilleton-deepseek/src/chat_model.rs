//! The DeepSeek chat client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;

use feuilleton::config::Settings;
use feuilleton::error::{Error, Result};
use feuilleton::llm::{
    with_retry, ChatClient, ChatRequest, ChatResponse, ChatStream, CircuitBreaker, RetryPolicy,
};

use crate::wire::{CompletionPayload, CompletionResponse, StreamChunk};

const CHAT_ENDPOINT: &str = "chat";

/// Async client for the DeepSeek chat-completions API.
///
/// Safe for concurrent callers; clone freely, the underlying HTTP pool and
/// circuit breaker are shared.
#[derive(Clone)]
pub struct ChatDeepSeek {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    retry_policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl ChatDeepSeek {
    #[must_use]
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: crate::DEEPSEEK_DEFAULT_API_BASE.to_string(),
            api_key: api_key.into(),
            model: "deepseek-chat".to_string(),
            retry_policy: RetryPolicy::exponential(3),
            breaker: Arc::new(CircuitBreaker::default()),
        }
    }

    /// Client configured from process settings, sharing the given breaker.
    pub fn from_settings(settings: &Settings, breaker: Arc<CircuitBreaker>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.llm_timeout)
            .build()
            .map_err(|err| Error::InvalidInput(format!("http client: {err}")))?;
        Ok(Self {
            http,
            api_base: settings.llm_api_base.trim_end_matches('/').to_string(),
            api_key: settings.llm_api_key.clone(),
            model: settings.llm_model.clone(),
            retry_policy: RetryPolicy::exponential(settings.llm_max_retries)
                .with_base_delay(settings.llm_retry_backoff),
            breaker,
        })
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let Ok(http) = reqwest::Client::builder().timeout(timeout).build() {
            self.http = http;
        }
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    fn model_for(&self, request: &ChatRequest) -> String {
        request.model.clone().unwrap_or_else(|| self.model.clone())
    }

    async fn post_completion(&self, request: &ChatRequest, model: &str) -> Result<reqwest::Response> {
        let payload = CompletionPayload::new(request, model, false);
        self.send(&payload).await
    }

    async fn send(&self, payload: &CompletionPayload<'_>) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|err| Error::LlmTransient(format!("transport: {err}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = format!(
            "status {status}: {}",
            feuilleton::text::truncate_chars(&body, 300)
        );
        if status.is_server_error() || status.as_u16() == 429 {
            Err(Error::LlmTransient(detail))
        } else {
            Err(Error::LlmUnavailable(detail))
        }
    }
}

#[async_trait]
impl ChatClient for ChatDeepSeek {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.breaker.check(CHAT_ENDPOINT)?;
        let model = self.model_for(&request);

        let result = with_retry(&self.retry_policy, || async {
            let response = self.post_completion(&request, &model).await?;
            response
                .json::<CompletionResponse>()
                .await
                .map_err(|err| Error::LlmBadFormat(format!("response body: {err}")))
        })
        .await;

        match result {
            Ok(parsed) => {
                self.breaker.record_success(CHAT_ENDPOINT);
                let choice = parsed.choices.into_iter().next().ok_or_else(|| {
                    Error::LlmBadFormat("completion had no choices".to_string())
                })?;
                Ok(ChatResponse {
                    content: choice.message.content.unwrap_or_default(),
                    reasoning: choice.message.reasoning_content,
                    model: parsed.model.unwrap_or(model),
                })
            }
            Err(err) => {
                if matches!(err, Error::LlmUnavailable(_) | Error::LlmTransient(_)) {
                    self.breaker.record_failure(CHAT_ENDPOINT);
                }
                Err(err)
            }
        }
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream> {
        self.breaker.check(CHAT_ENDPOINT)?;
        let model = self.model_for(&request);
        let payload = CompletionPayload::new(&request, &model, true);
        let response = self.send(&payload).await.inspect_err(|err| {
            if matches!(err, Error::LlmUnavailable(_) | Error::LlmTransient(_)) {
                self.breaker.record_failure(CHAT_ENDPOINT);
            }
        })?;
        self.breaker.record_success(CHAT_ENDPOINT);

        let stream = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                let done = matches!(event, Ok(event) if event.data == "[DONE]");
                futures::future::ready(!done)
            })
            .filter_map(|event| {
                let item = match event {
                    Ok(event) => match serde_json::from_str::<StreamChunk>(&event.data) {
                        Ok(chunk) => chunk
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|choice| choice.delta.content)
                            .filter(|content| !content.is_empty())
                            .map(Ok),
                        // Skip malformed keep-alive frames instead of failing
                        // the whole stream.
                        Err(_) => None,
                    },
                    Err(err) => Some(Err(Error::LlmTransient(format!("stream: {err}")))),
                };
                futures::future::ready(item)
            })
            .boxed();
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feuilleton::llm::ChatMessage;

    #[test]
    fn url_and_model_resolution() {
        let client = ChatDeepSeek::with_api_key("k").with_api_base("https://api.example.com/v1/");
        assert_eq!(
            client.completions_url(),
            "https://api.example.com/v1/chat/completions"
        );

        let request = ChatRequest::new(vec![ChatMessage::user("x")]);
        assert_eq!(client.model_for(&request), "deepseek-chat");
        let reasoning = request.with_model("deepseek-reasoner");
        assert_eq!(client.model_for(&reasoning), "deepseek-reasoner");
    }

    #[tokio::test]
    async fn open_circuit_fails_fast() {
        let client = ChatDeepSeek::with_api_key("k");
        for _ in 0..5 {
            client.breaker.record_failure(CHAT_ENDPOINT);
        }
        let err = client
            .chat(ChatRequest::new(vec![ChatMessage::user("x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { .. }));
    }
}
