//! Chapter approval: the only path that commits facts to memory.

use uuid::Uuid;

use feuilleton::error::{Error, Result};
use feuilleton::stores::{update_project_metadata, ChapterPatch};
use feuilleton::types::{ChapterStatus, PlanChapterStatus};

use crate::pipeline::WritingPipeline;
use crate::state::ApproveChapterResponse;

impl WritingPipeline {
    /// Approve a draft: extract facts, merge them into the project
    /// continuity, update the structured graph and style memory, mark the
    /// plan entry approved, and refresh the RAG index. Idempotent; a RAG
    /// failure is recorded in the response but never rolls back the
    /// approval.
    pub async fn approve_chapter(
        &self,
        document_id: Uuid,
        user_id: Uuid,
    ) -> Result<ApproveChapterResponse> {
        let chapter = self.chapters.get(document_id).await?;
        // Ownership check through the project.
        let project = self.projects.get(chapter.project_id, user_id).await?;

        let chapter_index = chapter.chapter_index();
        let facts = self.memory.extract_facts(&chapter.content).await?;
        let summary = if facts.summary.is_empty() {
            chapter.metadata.summary.clone()
        } else {
            Some(facts.summary.clone())
        };

        // 1–5: continuity merge, recent summaries, plan entry status.
        let memory = &self.memory;
        let merge_facts = facts.clone();
        let summary_for_metadata = summary.clone();
        update_project_metadata(self.projects.as_ref(), project.id, user_id, |metadata| {
            memory.merge_facts(&mut metadata.continuity, &merge_facts);
            if let Some(summary) = &summary_for_metadata {
                metadata.push_recent_summary(summary.clone());
            }
            if let Some(plan) = &mut metadata.plan {
                if let Some(entry) = plan.data.chapter_mut(chapter_index) {
                    entry.status = PlanChapterStatus::Approved;
                }
            }
        })
        .await?;

        // 6: chapter metadata.
        let mut chapter_metadata = chapter.metadata.clone();
        chapter_metadata.status = ChapterStatus::Approved;
        if let Some(summary) = &summary {
            chapter_metadata.summary = Some(summary.clone());
        }
        let chapter = self
            .chapters
            .update(
                document_id,
                ChapterPatch {
                    metadata: Some(chapter_metadata),
                    ..Default::default()
                },
            )
            .await?;

        // 7: structured graph (idempotent upserts).
        self.memory
            .update_graph(project.id, &facts, Some(chapter_index))
            .await?;

        // 8: style memory.
        if let Err(err) = self
            .memory
            .store_style_memory(project.id, document_id, &chapter.content, summary.as_deref())
            .await
        {
            tracing::warn!(error = %err, "style memory update failed");
        }

        // Narrative promises: extract and match Chekhov's guns (non-fatal).
        if let Err(err) = self
            .track_chekhov_guns(project.id, user_id, &chapter.content, chapter_index)
            .await
        {
            tracing::warn!(error = %err, "chekhov tracking failed");
        }

        // Summary pyramid refresh is non-fatal.
        if let Err(err) = self
            .recursive_memory
            .update_after_chapter(project.id, user_id, chapter_index)
            .await
        {
            tracing::warn!(error = %err, "recursive memory update failed");
        }

        // Continuity changed: cached context blocks and RAG results for the
        // project are stale.
        self.cache.invalidate_project(project.id).await;

        // 9: RAG refresh, recorded but never fatal.
        let (rag_updated, rag_update_error) =
            match self.rag.update_document(project.id, &chapter).await {
                Ok(_) => (true, None),
                Err(err) => {
                    tracing::error!(error = %err, document_id = %document_id, "RAG update failed");
                    (false, Some(Error::RagUpdateFailed(err.to_string()).to_string()))
                }
            };

        Ok(ApproveChapterResponse {
            document_id,
            status: "approved".to_string(),
            summary,
            rag_updated,
            rag_update_error,
        })
    }
}
