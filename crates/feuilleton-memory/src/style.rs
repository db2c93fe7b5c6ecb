//! Style memory: approved chapter prose kept in a per-project collection so
//! the writer can be prompted with the project's own voice.

use std::sync::Arc;

use uuid::Uuid;

use feuilleton::error::Result;
use feuilleton_rag::{Embeddings, VectorRecord, VectorStore, KIND_STYLE};

pub struct StyleMemory {
    store: Option<Arc<dyn VectorStore>>,
    embeddings: Arc<dyn Embeddings>,
}

impl StyleMemory {
    #[must_use]
    pub fn new(store: Option<Arc<dyn VectorStore>>, embeddings: Arc<dyn Embeddings>) -> Self {
        Self { store, embeddings }
    }

    /// Store the chapter text (one entry per chapter, keyed by document id).
    pub async fn store_chapter(
        &self,
        project_id: Uuid,
        document_id: Uuid,
        chapter_text: &str,
        summary: Option<&str>,
    ) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        // Embed on the summary when present; it carries the voice with far
        // fewer tokens.
        let embed_source = summary.filter(|s| !s.is_empty()).unwrap_or(chapter_text);
        let vector = self.embeddings.embed_one(embed_source).await?;
        let excerpt = feuilleton::text::truncate_chars(chapter_text, 1500).to_string();
        store
            .upsert(vec![VectorRecord {
                // Stable id per document keeps the upsert idempotent.
                id: Uuid::new_v5(&Uuid::NAMESPACE_OID, document_id.as_bytes()),
                project_id,
                document_id,
                kind: KIND_STYLE.to_string(),
                text: excerpt,
                vector,
            }])
            .await
    }

    /// Up to `top_k` style excerpts relevant to the query; empty when the
    /// store is absent.
    pub async fn retrieve(&self, project_id: Uuid, query: &str, top_k: usize) -> Result<Vec<String>> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embeddings.embed_one(query).await?;
        let hits = store.search(project_id, KIND_STYLE, &vector, top_k).await?;
        Ok(hits.into_iter().map(|hit| hit.text).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feuilleton_rag::{HashEmbeddings, InMemoryVectorStore};

    #[tokio::test]
    async fn storing_twice_keeps_one_entry_per_document() {
        let store = Arc::new(InMemoryVectorStore::new());
        let memory = StyleMemory::new(
            Some(store.clone() as Arc<dyn VectorStore>),
            Arc::new(HashEmbeddings::new(32)),
        );
        let project = Uuid::new_v4();
        let document = Uuid::new_v4();
        memory
            .store_chapter(project, document, "La pluie tombait sur les toits.", None)
            .await
            .unwrap();
        memory
            .store_chapter(project, document, "La pluie tombait sur les toits.", None)
            .await
            .unwrap();
        assert_eq!(store.count(project).await.unwrap(), 1);

        let hits = memory.retrieve(project, "la pluie", 3).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn absent_store_degrades_to_empty() {
        let memory = StyleMemory::new(None, Arc::new(HashEmbeddings::new(16)));
        let project = Uuid::new_v4();
        memory
            .store_chapter(project, Uuid::new_v4(), "texte", None)
            .await
            .unwrap();
        assert!(memory.retrieve(project, "texte", 3).await.unwrap().is_empty());
    }
}
