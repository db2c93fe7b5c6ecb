//! Retrieval for Feuilleton.
//!
//! Chapter prose is chunked into fixed-size overlapping windows, embedded,
//! and stored in a single vector collection partitioned by `project_id`.
//! The [`VectorStore`] trait keeps the engine agnostic of the backing
//! store; `feuilleton-qdrant` provides the served implementation and
//! [`InMemoryVectorStore`] the in-process one.

mod embeddings;
mod service;
mod splitter;
mod store;

pub use embeddings::{cosine_similarity, Embeddings, HashEmbeddings};
pub use service::RagService;
pub use splitter::ChunkConfig;
pub use store::{InMemoryVectorStore, ScoredText, VectorRecord, VectorStore, KIND_CHAPTER, KIND_STYLE};
