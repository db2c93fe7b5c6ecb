//! Error taxonomy shared across the workspace.
//!
//! Errors are classified by kind, not by transport type: transient LLM
//! failures are retried locally, degraded stores downgrade to empty results,
//! and only contract-level errors reach callers.

use uuid::Uuid;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The project's plan is not in the `accepted` state; generation aborts.
    #[error("plan for project {project_id} is not accepted")]
    PlanNotAccepted { project_id: Uuid },

    /// The project has no plan at all.
    #[error("project {project_id} has no plan")]
    PlanMissing { project_id: Uuid },

    #[error("project {project_id} not found")]
    ProjectNotFound { project_id: Uuid },

    #[error("chapter {chapter_id} not found")]
    ChapterNotFound { chapter_id: Uuid },

    /// The document exists but does not belong to the requesting user.
    #[error("resource is not owned by the requesting user")]
    NotOwned,

    /// Transient provider failure (HTTP 5xx, transport error). Retried with
    /// backoff before surfacing as [`Error::LlmUnavailable`].
    #[error("transient LLM failure: {0}")]
    LlmTransient(String),

    /// Retries exhausted or the provider is hard-down.
    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    /// The provider answered but the payload did not parse against the
    /// expected schema, even after one reinforced retry.
    #[error("malformed LLM payload: {0}")]
    LlmBadFormat(String),

    /// The per-endpoint circuit breaker is open.
    #[error("circuit open for endpoint {endpoint}")]
    CircuitOpen { endpoint: String },

    #[error("continuity graph unavailable: {0}")]
    GraphUnavailable(String),

    #[error("vector store unavailable: {0}")]
    VectorUnavailable(String),

    /// Recorded in the approval response; never rolls back an approval.
    #[error("RAG update failed: {0}")]
    RagUpdateFailed(String),

    /// Optimistic metadata write lost the race too many times.
    #[error("project metadata conflict after {attempts} attempts")]
    MetadataConflict { attempts: u32 },

    /// A beat job exceeded its soft limit; the assembler proceeds without it.
    #[error("beat {index} timed out")]
    BeatTimeout { index: usize },

    /// Absolute deadline exceeded; the draft is not persisted.
    #[error("deadline exceeded during {phase}")]
    Cancelled { phase: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a retry can reasonably succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::LlmTransient(_))
    }

    /// Whether this error means "treat the subsystem as absent" rather than
    /// "fail the pipeline".
    #[must_use]
    pub fn is_degraded_store(&self) -> bool {
        matches!(
            self,
            Error::GraphUnavailable(_) | Error::VectorUnavailable(_)
        )
    }

    /// Annotate with pipeline observability fields and emit a structured
    /// warning. Returns `self` so call sites can keep propagating.
    pub fn trace(self, project_id: Uuid, chapter_index: Option<u32>, phase: &str) -> Self {
        tracing::warn!(
            %project_id,
            chapter_index,
            phase,
            error = %self,
            "pipeline error"
        );
        self
    }
}
