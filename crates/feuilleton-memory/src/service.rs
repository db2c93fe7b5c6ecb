//! Memory service facade.

use std::sync::Arc;

use uuid::Uuid;

use feuilleton::error::Result;
use feuilleton::llm::ChatClient;
use feuilleton::types::{Continuity, ContinuityFacts};

use crate::graph::ContinuityGraph;
use crate::style::StyleMemory;

/// Extraction, merge, graph maintenance and style memory behind one handle.
pub struct MemoryService {
    llm: Arc<dyn ChatClient>,
    graph: Arc<dyn ContinuityGraph>,
    style: StyleMemory,
}

impl MemoryService {
    #[must_use]
    pub fn new(llm: Arc<dyn ChatClient>, graph: Arc<dyn ContinuityGraph>, style: StyleMemory) -> Self {
        Self { llm, graph, style }
    }

    #[must_use]
    pub fn graph(&self) -> &Arc<dyn ContinuityGraph> {
        &self.graph
    }

    /// Extract continuity facts from chapter text (§ head+tail chunking for
    /// long chapters).
    pub async fn extract_facts(&self, chapter_text: &str) -> Result<ContinuityFacts> {
        crate::extraction::extract_facts(self.llm.as_ref(), chapter_text).await
    }

    /// Merge facts into the project continuity in place.
    pub fn merge_facts(&self, continuity: &mut Continuity, facts: &ContinuityFacts) {
        crate::merge::merge_facts(continuity, facts);
    }

    /// Push one chapter's facts into the structured graph.
    pub async fn update_graph(
        &self,
        project_id: Uuid,
        facts: &ContinuityFacts,
        chapter_index: Option<u32>,
    ) -> Result<()> {
        match self.graph.apply_facts(project_id, facts, chapter_index).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_degraded_store() => {
                tracing::warn!(%project_id, error = %err, "graph update skipped (degraded)");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Plain-text continuity block for prompts.
    #[must_use]
    pub fn build_context_block(&self, continuity: &Continuity) -> String {
        crate::context_block::build_context_block(continuity)
    }

    pub async fn store_style_memory(
        &self,
        project_id: Uuid,
        document_id: Uuid,
        chapter_text: &str,
        summary: Option<&str>,
    ) -> Result<()> {
        self.style
            .store_chapter(project_id, document_id, chapter_text, summary)
            .await
    }

    pub async fn retrieve_style_memory(
        &self,
        project_id: Uuid,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<String>> {
        self.style.retrieve(project_id, query, top_k).await
    }
}
