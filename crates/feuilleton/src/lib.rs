//! Feuilleton core.
//!
//! Domain model, configuration, error taxonomy, the LLM client interface
//! with retry and circuit breaking, the KV cache, repository seams, context
//! assembly (smart truncation + recursive memory), and chapter export.
//!
//! The generation pipeline itself lives in `feuilleton-pipeline`; memory,
//! retrieval and coherence services in their sibling crates. This crate has
//! no dependency on any of them, so every integration crate can depend on
//! the core alone.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod llm;
pub mod stores;
pub mod text;
pub mod types;

pub use config::Settings;
pub use error::{Error, Result};
