//! Pipeline request, state, and response types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use feuilleton::context::ProjectContext;
use feuilleton::types::{ChapterPlan, ContinuityValidation};

/// One chapter generation request.
#[derive(Debug, Clone)]
pub struct GenerateChapterRequest {
    pub project_id: Uuid,
    pub user_id: Uuid,
    /// Regenerate an existing draft in place.
    pub chapter_id: Option<Uuid>,
    /// 1-based target chapter; next in order when absent.
    pub chapter_index: Option<u32>,
    pub chapter_instruction: Option<String>,
    pub target_word_count: Option<u32>,
    pub use_rag: bool,
    pub reindex_documents: bool,
    pub create_document: bool,
    pub auto_approve: bool,
    pub max_revisions: Option<u32>,
}

impl GenerateChapterRequest {
    #[must_use]
    pub fn new(project_id: Uuid, user_id: Uuid) -> Self {
        Self {
            project_id,
            user_id,
            chapter_id: None,
            chapter_index: None,
            chapter_instruction: None,
            target_word_count: None,
            use_rag: true,
            reindex_documents: false,
            create_document: true,
            auto_approve: false,
            max_revisions: None,
        }
    }

    #[must_use]
    pub fn with_chapter_index(mut self, index: u32) -> Self {
        self.chapter_index = Some(index);
        self
    }

    #[must_use]
    pub fn with_target_words(mut self, target: u32) -> Self {
        self.target_word_count = Some(target);
        self
    }

    #[must_use]
    pub fn without_rag(mut self) -> Self {
        self.use_rag = false;
        self
    }
}

/// LLM critique of a draft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub cliffhanger_ok: bool,
    #[serde(default)]
    pub pacing_ok: bool,
    #[serde(default)]
    pub continuity_risks: Vec<String>,
}

/// Mutable state threaded through the pipeline nodes.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub chapter_id: Option<Uuid>,
    pub chapter_index: u32,
    pub chapter_instruction: Option<String>,
    pub use_rag: bool,
    pub reindex_documents: bool,

    pub project_context: ProjectContext,
    pub chapter_title: String,
    pub chapter_summary: String,
    pub chapter_emotional_stake: String,

    pub target_word_count: u32,
    pub min_word_count: u32,
    pub max_word_count: u32,

    pub memory_context: String,
    pub retrieved_chunks: Vec<String>,
    pub style_chunks: Vec<String>,

    pub current_plan: Option<ChapterPlan>,
    pub chapter_text: String,
    pub beat_texts: Vec<String>,
    pub failed_beats: u32,

    pub continuity_validation: ContinuityValidation,
    pub continuity_alerts: Vec<String>,

    pub critique_payload: Critique,
    pub critique_feedback: Vec<String>,
    pub revision_count: u32,
    pub max_revisions: u32,
}

impl PipelineState {
    #[must_use]
    pub fn critique_score(&self) -> f64 {
        self.critique_payload.score
    }
}

/// What `generate_chapter` returns to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateChapterResponse {
    pub chapter_title: String,
    pub content: String,
    pub word_count: u32,
    pub document_id: Option<Uuid>,
    pub plan: Option<ChapterPlan>,
    pub critique: Critique,
    pub continuity_validation: ContinuityValidation,
    pub continuity_alerts: Vec<String>,
    pub retrieved_chunks: Vec<String>,
    pub failed_beats: u32,
}

/// What `approve_chapter` returns. Idempotent; RAG failures are recorded,
/// never fatal.
#[derive(Debug, Clone, Serialize)]
pub struct ApproveChapterResponse {
    pub document_id: Uuid,
    pub status: String,
    pub summary: Option<String>,
    pub rag_updated: bool,
    pub rag_update_error: Option<String>,
}
