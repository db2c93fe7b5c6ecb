//! The writing pipeline orchestrator.
//!
//! A directed node sequence with one conditional loop:
//! `collect_context → retrieve_context → plan_chapter → write_chapter →
//! validate_continuity → critic → {revise → write_chapter | done}`.
//! Nodes are plain methods executed by an explicit loop, so transition
//! order is visible in one place and beat results can never be reassembled
//! out of order.

use std::sync::Arc;

use uuid::Uuid;

use feuilleton::cache::CacheService;
use feuilleton::config::Settings;
use feuilleton::context::{ContextBuilder, ProjectContext, RecursiveMemory, SmartContextTruncator};
use feuilleton::error::{Error, Result};
use feuilleton::llm::{chat_json, ChatClient, ChatMessage, ChatRequest};
use feuilleton::stores::{ChapterPatch, ChapterRepository, ProjectRepository};
use feuilleton::text::{clean_chapter_markdown, truncate_chars, word_count};
use feuilleton::types::{Chapter, ChapterMetadata, ChapterStatus, ContinuityValidation};
use feuilleton_coherence::ConsistencyAnalyst;
use feuilleton_memory::MemoryService;
use feuilleton_rag::RagService;
use feuilleton_tasks::TaskQueue;

use crate::gate::{quality_gate, GateDecision};
use crate::state::{Critique, GenerateChapterRequest, GenerateChapterResponse, PipelineState};

pub struct WritingPipeline {
    pub(crate) settings: Arc<Settings>,
    pub(crate) llm: Arc<dyn ChatClient>,
    pub(crate) projects: Arc<dyn ProjectRepository>,
    pub(crate) chapters: Arc<dyn ChapterRepository>,
    pub(crate) context_builder: ContextBuilder,
    pub(crate) rag: Arc<RagService>,
    pub(crate) memory: Arc<MemoryService>,
    pub(crate) cache: Arc<CacheService>,
    pub(crate) analyst: ConsistencyAnalyst,
    pub(crate) recursive_memory: Arc<RecursiveMemory>,
    pub(crate) queue: Option<Arc<TaskQueue>>,
    pub(crate) coherence_gates: Option<crate::specialists::CoherenceGates>,
}

impl WritingPipeline {
    #[must_use]
    pub fn new(
        settings: Arc<Settings>,
        llm: Arc<dyn ChatClient>,
        projects: Arc<dyn ProjectRepository>,
        chapters: Arc<dyn ChapterRepository>,
        rag: Arc<RagService>,
        memory: Arc<MemoryService>,
        cache: Arc<CacheService>,
    ) -> Self {
        let context_builder = ContextBuilder::new(projects.clone());
        let analyst = ConsistencyAnalyst::new(llm.clone());
        let recursive_memory = Arc::new(RecursiveMemory::new(
            llm.clone(),
            projects.clone(),
            chapters.clone(),
            settings.clone(),
        ));
        Self {
            settings,
            llm,
            projects,
            chapters,
            context_builder,
            rag,
            memory,
            cache,
            analyst,
            recursive_memory,
            queue: None,
            coherence_gates: None,
        }
    }

    /// Enable the distributed beat strategy on this queue.
    #[must_use]
    pub fn with_queue(mut self, queue: Arc<TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Attach the optional coherence specialists.
    #[must_use]
    pub fn with_coherence_gates(mut self, gates: crate::specialists::CoherenceGates) -> Self {
        self.coherence_gates = Some(gates);
        self
    }

    /// Run the full pipeline for one chapter.
    pub async fn generate_chapter(
        &self,
        request: GenerateChapterRequest,
    ) -> Result<GenerateChapterResponse> {
        let context = self
            .context_builder
            .build(request.project_id, request.user_id)
            .await?;
        // Gate before any LLM work: a draft plan aborts with no side
        // effects at all.
        context.project.accepted_plan()?;

        let mut state = self.collect_context(&request, context).await?;
        self.retrieve_context(&mut state).await?;
        self.plan_chapter(&mut state).await?;

        loop {
            self.write_chapter(&mut state).await?;
            self.validate_continuity(&mut state).await?;
            self.critic(&mut state).await?;
            let decision = quality_gate(
                state.critique_score(),
                &state.continuity_validation,
                state.revision_count,
                state.max_revisions,
                self.settings.quality_gate_score_threshold,
                self.settings.quality_gate_coherence_threshold,
            );
            tracing::info!(
                project_id = %state.project_id,
                chapter_index = state.chapter_index,
                revision = state.revision_count,
                score = state.critique_score(),
                blocking = state.continuity_validation.blocking,
                ?decision,
                "quality gate"
            );
            if decision == GateDecision::Done {
                break;
            }
        }

        let content = clean_chapter_markdown(&state.chapter_text);
        let words = word_count(&content);
        let document_id = if request.create_document {
            Some(self.persist_draft(&state, &content, words).await?)
        } else {
            None
        };

        if request.auto_approve {
            if let Some(document_id) = document_id {
                self.approve_chapter(document_id, request.user_id).await?;
            }
        }

        Ok(GenerateChapterResponse {
            chapter_title: state.chapter_title,
            content,
            word_count: words,
            document_id,
            plan: state.current_plan,
            critique: state.critique_payload,
            continuity_validation: state.continuity_validation,
            continuity_alerts: state.continuity_alerts,
            retrieved_chunks: state.retrieved_chunks,
            failed_beats: state.failed_beats,
        })
    }

    /// Resolve the context pack, word range, and target chapter identity.
    pub(crate) async fn collect_context(
        &self,
        request: &GenerateChapterRequest,
        context: ProjectContext,
    ) -> Result<PipelineState> {
        let (min_words, max_words) = context.word_range(
            self.settings.chapter_min_words,
            self.settings.chapter_max_words,
        );
        let target = request
            .target_word_count
            .unwrap_or((min_words + max_words) / 2)
            .clamp(min_words, max_words);

        let (chapter_id, chapter_index) = self.resolve_chapter(request).await?;

        // Title/summary/stake come from the plan entry when it exists.
        let plan_entry = context
            .project
            .metadata
            .plan
            .as_ref()
            .and_then(|plan| plan.data.chapter(chapter_index).cloned());
        let (title, summary, stake) = match &plan_entry {
            Some(entry) => (
                if entry.title.is_empty() {
                    format!("Chapitre {chapter_index}")
                } else {
                    entry.title.clone()
                },
                entry.summary.clone(),
                entry.emotional_stake.clone(),
            ),
            None => (format!("Chapitre {chapter_index}"), String::new(), String::new()),
        };

        Ok(PipelineState {
            project_id: request.project_id,
            user_id: request.user_id,
            chapter_id,
            chapter_index,
            chapter_instruction: request.chapter_instruction.clone(),
            use_rag: request.use_rag,
            reindex_documents: request.reindex_documents,
            project_context: context,
            chapter_title: title,
            chapter_summary: summary,
            chapter_emotional_stake: stake,
            target_word_count: target,
            min_word_count: min_words,
            max_word_count: max_words,
            memory_context: String::new(),
            retrieved_chunks: Vec::new(),
            style_chunks: Vec::new(),
            current_plan: None,
            chapter_text: String::new(),
            beat_texts: Vec::new(),
            failed_beats: 0,
            continuity_validation: ContinuityValidation::default(),
            continuity_alerts: Vec::new(),
            critique_payload: Critique::default(),
            critique_feedback: Vec::new(),
            revision_count: 0,
            max_revisions: request.max_revisions.unwrap_or(self.settings.max_revisions),
        })
    }

    async fn resolve_chapter(
        &self,
        request: &GenerateChapterRequest,
    ) -> Result<(Option<Uuid>, u32)> {
        if let Some(chapter_id) = request.chapter_id {
            let chapter = self.chapters.get(chapter_id).await?;
            if chapter.project_id != request.project_id {
                return Err(Error::ChapterNotFound { chapter_id });
            }
            return Ok((Some(chapter_id), chapter.chapter_index()));
        }
        if let Some(index) = request.chapter_index {
            let existing = self
                .chapters
                .chapter_by_index(request.project_id, index)
                .await?;
            return Ok((existing.map(|chapter| chapter.id), index));
        }
        let next = self
            .chapters
            .max_order_index(request.project_id)
            .await?
            .map_or(0, |max| max + 1);
        Ok((None, next + 1))
    }

    /// Memory context (cached, smart-truncated) plus RAG and style chunks.
    pub(crate) async fn retrieve_context(&self, state: &mut PipelineState) -> Result<()> {
        let metadata = &state.project_context.project.metadata;
        let cache_identity = format!(
            "{}:{}",
            serde_json::to_string(&metadata.continuity)?,
            state.chapter_index
        );

        let memory_context = match self
            .cache
            .get_memory_context(state.project_id, &cache_identity)
            .await
        {
            Some(cached) => cached,
            None => {
                let block = SmartContextTruncator::truncate_memory_context(
                    &metadata.continuity,
                    self.settings.memory_context_max_chars,
                    state.chapter_index,
                    None,
                );
                self.cache
                    .set_memory_context(state.project_id, &cache_identity, block.clone())
                    .await;
                block
            }
        };
        state.memory_context = memory_context;

        if !state.use_rag {
            return Ok(());
        }

        if state.reindex_documents {
            let documents = self.chapters.list_by_project(state.project_id).await?;
            self.rag
                .index_documents(state.project_id, &documents, true)
                .await?;
        }

        let query = format!("{}\n{}", state.chapter_title, state.chapter_summary)
            .trim()
            .to_string();
        let chunks = match self.cache.get_rag_results(state.project_id, &query).await {
            Some(cached) => cached,
            None => {
                let retrieved = self
                    .rag
                    .retrieve(state.project_id, &query, self.settings.rag_top_k)
                    .await?;
                self.cache
                    .set_rag_results(state.project_id, &query, &retrieved)
                    .await;
                retrieved
            }
        };
        state.retrieved_chunks = chunks;
        state.style_chunks = self
            .memory
            .retrieve_style_memory(state.project_id, &query, 3)
            .await
            .unwrap_or_default();
        Ok(())
    }

    /// Score pacing, cliffhanger and coherence; always increments the
    /// revision counter so the gate's loop is bounded.
    pub(crate) async fn critic(&self, state: &mut PipelineState) -> Result<()> {
        state.revision_count += 1;
        if state.chapter_text.is_empty() {
            state.critique_payload = Critique::default();
            state.critique_feedback = vec!["Aucun contenu genere.".to_string()];
            return Ok(());
        }

        let memory_block = truncate_chars(&state.memory_context, self.settings.memory_context_max_chars);
        let rag_block: String = state
            .retrieved_chunks
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n\n");
        let rag_block = truncate_chars(&rag_block, self.settings.rag_context_max_chars);
        let text = feuilleton::text::tail_chars(&state.chapter_text, self.settings.critic_max_chars);

        let prompt = format!(
            "Evalue le chapitre pour le rythme, le cliffhanger et la coherence. \
             Retourne un JSON avec les cles: score (0-10), issues (liste), \
             suggestions (liste), cliffhanger_ok (bool), pacing_ok (bool), \
             continuity_risks (liste).\n\
             Contexte memoire:\n{memory_block}\n\
             Extraits pertinents:\n{rag_block}\n\
             Texte du chapitre:\n{text}"
        );
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)])
            .with_temperature(0.3)
            .with_max_tokens(600);
        let critique: Critique = match chat_json(self.llm.as_ref(), request).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(Error::LlmBadFormat(message)) => {
                tracing::warn!(%message, "critic payload unusable");
                Critique::default()
            }
            Err(err) => {
                return Err(err.trace(state.project_id, Some(state.chapter_index), "critic"))
            }
        };

        state
            .continuity_alerts
            .extend(critique.continuity_risks.iter().cloned());
        state.critique_feedback = critique
            .issues
            .iter()
            .chain(critique.suggestions.iter())
            .cloned()
            .collect();
        state.critique_payload = critique;
        Ok(())
    }

    /// Create or update the draft document.
    pub(crate) async fn persist_draft(
        &self,
        state: &PipelineState,
        content: &str,
        words: u32,
    ) -> Result<Uuid> {
        let mut validations = Vec::new();
        validations.push(state.continuity_validation.clone());

        match state.chapter_id {
            Some(chapter_id) => {
                let existing = self.chapters.get(chapter_id).await?;
                let mut metadata = existing.metadata.clone();
                metadata.chapter_index = Some(state.chapter_index);
                metadata.plan = state.current_plan.clone();
                metadata.word_count = words;
                metadata.emotional_stake = state.chapter_emotional_stake.clone();
                metadata.continuity_validations.push(state.continuity_validation.clone());
                self.chapters
                    .update(
                        chapter_id,
                        ChapterPatch {
                            title: Some(state.chapter_title.clone()),
                            content: Some(content.to_string()),
                            metadata: Some(metadata),
                            order_index: None,
                        },
                    )
                    .await?;
                Ok(chapter_id)
            }
            None => {
                let order_index = self
                    .chapters
                    .max_order_index(state.project_id)
                    .await?
                    .map_or(0, |max| max + 1);
                let metadata = ChapterMetadata {
                    chapter_index: Some(state.chapter_index),
                    status: ChapterStatus::Draft,
                    summary: None,
                    emotional_stake: state.chapter_emotional_stake.clone(),
                    plan: state.current_plan.clone(),
                    continuity_validations: validations,
                    word_count: words,
                };
                let chapter = Chapter::draft(
                    state.project_id,
                    state.chapter_title.clone(),
                    content.to_string(),
                    order_index,
                    metadata,
                );
                let chapter_id = chapter.id;
                self.chapters.create(chapter).await?;
                Ok(chapter_id)
            }
        }
    }
}
