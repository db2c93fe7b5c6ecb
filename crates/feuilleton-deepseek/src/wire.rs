//! Wire types for the chat-completions endpoint.

use serde::{Deserialize, Serialize};

use feuilleton::llm::{ChatMessage, ChatRequest};

#[derive(Debug, Serialize)]
pub(crate) struct CompletionPayload<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl<'a> CompletionPayload<'a> {
    pub fn new(request: &'a ChatRequest, model: &'a str, stream: bool) -> Self {
        Self {
            model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request
                .json_mode
                .then_some(ResponseFormat { kind: "json_object" }),
            stream,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionChoice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    /// Reasoning-model scratchpad (`deepseek-reasoner`).
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamChoice {
    #[serde(default)]
    pub delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StreamDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use feuilleton::llm::ChatMessage;

    #[test]
    fn payload_serialization_matches_the_api() {
        let request = ChatRequest::new(vec![ChatMessage::user("bonjour")])
            .with_temperature(0.4)
            .with_max_tokens(900)
            .json();
        let payload = CompletionPayload::new(&request, "deepseek-chat", false);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["model"], "deepseek-chat");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["response_format"]["type"], "json_object");
        assert!(value.get("stream").is_none());
    }

    #[test]
    fn response_parsing_reads_reasoning_content() {
        let raw = r#"{
            "model": "deepseek-reasoner",
            "choices": [{"message": {"content": "ok", "reasoning_content": "je reflechis"}}]
        }"#;
        let response: CompletionResponse = serde_json::from_str(raw).unwrap();
        let message = &response.choices[0].message;
        assert_eq!(message.content.as_deref(), Some("ok"));
        assert_eq!(message.reasoning_content.as_deref(), Some("je reflechis"));
    }

    #[test]
    fn stream_chunk_tolerates_empty_delta() {
        let chunk: StreamChunk = serde_json::from_str(r#"{"choices":[{"delta":{}}]}"#).unwrap();
        assert!(chunk.choices[0].delta.content.is_none());
    }
}
