//! DeepSeek integration for Feuilleton.
//!
//! DeepSeek exposes an OpenAI-compatible chat-completions API, so this crate
//! is a thin reqwest client with DeepSeek defaults. Transient failures (HTTP
//! 5xx, 429, transport errors) are retried with exponential backoff; a
//! process-wide per-endpoint circuit breaker fails fast when the provider is
//! hard-down. The reasoning model variant (`deepseek-reasoner`) returns its
//! scratchpad in `reasoning_content`, surfaced on the response.

mod chat_model;
mod wire;

pub use chat_model::ChatDeepSeek;

/// Default API base when `LLM_API_BASE` is not configured.
pub const DEEPSEEK_DEFAULT_API_BASE: &str = "https://api.deepseek.com/v1";
