//! RAG service: chunk, index, retrieve.
//!
//! When the vector store is unavailable the service degrades to empty
//! results and logs one warning per process; the pipeline keeps going.

use std::sync::{Arc, Once};

use uuid::Uuid;

use feuilleton::error::{Error, Result};
use feuilleton::types::Chapter;

use crate::embeddings::Embeddings;
use crate::splitter::ChunkConfig;
use crate::store::{VectorRecord, VectorStore, KIND_CHAPTER};

static DEGRADED_WARNING: Once = Once::new();

fn warn_degraded(reason: &str) {
    DEGRADED_WARNING.call_once(|| {
        tracing::warn!(reason, "vector store unavailable, RAG degraded to empty results");
    });
}

pub struct RagService {
    store: Option<Arc<dyn VectorStore>>,
    embeddings: Arc<dyn Embeddings>,
    chunking: ChunkConfig,
}

impl RagService {
    #[must_use]
    pub fn new(
        store: Option<Arc<dyn VectorStore>>,
        embeddings: Arc<dyn Embeddings>,
        chunking: ChunkConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            chunking,
        }
    }

    /// Disabled service: every operation degrades.
    #[must_use]
    pub fn disabled(embeddings: Arc<dyn Embeddings>) -> Self {
        Self::new(None, embeddings, ChunkConfig::default())
    }

    fn store(&self) -> Result<&Arc<dyn VectorStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| Error::VectorUnavailable("no vector store configured".to_string()))
    }

    /// Embed a known-good prompt so model weights are loaded before the
    /// first chapter request.
    pub async fn warmup(&self) -> Result<()> {
        let _ = self.embeddings.embed_one("chargement du modele").await?;
        Ok(())
    }

    /// Index documents under the project partition. Returns the number of
    /// chunks written.
    pub async fn index_documents(
        &self,
        project_id: Uuid,
        documents: &[Chapter],
        clear_existing: bool,
    ) -> Result<usize> {
        let store = match self.store() {
            Ok(store) => store,
            Err(err) => {
                warn_degraded(&err.to_string());
                return Ok(0);
            }
        };
        if clear_existing {
            store
                .delete_by_project(project_id, Some(KIND_CHAPTER))
                .await?;
        }
        let mut written = 0;
        for document in documents {
            written += self.index_one(store, project_id, document).await?;
        }
        tracing::info!(%project_id, chunks = written, "indexed documents");
        Ok(written)
    }

    /// Re-index a single document: its previous vectors are replaced.
    pub async fn update_document(&self, project_id: Uuid, document: &Chapter) -> Result<usize> {
        let store = self.store()?;
        store.delete_by_document(project_id, document.id).await?;
        self.index_one(store, project_id, document).await
    }

    async fn index_one(
        &self,
        store: &Arc<dyn VectorStore>,
        project_id: Uuid,
        document: &Chapter,
    ) -> Result<usize> {
        let chunks = self.chunking.split(&document.content)?;
        if chunks.is_empty() {
            return Ok(0);
        }
        let vectors = self.embeddings.embed(&chunks).await?;
        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(text, vector)| VectorRecord {
                id: Uuid::new_v4(),
                project_id,
                document_id: document.id,
                kind: KIND_CHAPTER.to_string(),
                text,
                vector,
            })
            .collect();
        let count = records.len();
        store.upsert(records).await?;
        Ok(count)
    }

    /// Top-k semantically relevant chunks for a query, or empty in degraded
    /// mode.
    pub async fn retrieve(&self, project_id: Uuid, query: &str, top_k: usize) -> Result<Vec<String>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let store = match self.store() {
            Ok(store) => store,
            Err(err) => {
                warn_degraded(&err.to_string());
                return Ok(Vec::new());
            }
        };
        let vector = self.embeddings.embed_one(query).await?;
        match store.search(project_id, KIND_CHAPTER, &vector, top_k).await {
            Ok(hits) => Ok(hits.into_iter().map(|hit| hit.text).collect()),
            Err(err) if err.is_degraded_store() => {
                warn_degraded(&err.to_string());
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn count_project_vectors(&self, project_id: Uuid) -> Result<usize> {
        match self.store() {
            Ok(store) => store.count(project_id).await,
            Err(_) => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbeddings;
    use crate::store::InMemoryVectorStore;
    use feuilleton::types::ChapterMetadata;

    fn service_with_store() -> (RagService, Arc<InMemoryVectorStore>) {
        let store = Arc::new(InMemoryVectorStore::new());
        let service = RagService::new(
            Some(store.clone() as Arc<dyn VectorStore>),
            Arc::new(HashEmbeddings::new(64)),
            ChunkConfig {
                chunk_size: 40,
                chunk_overlap: 10,
            },
        );
        (service, store)
    }

    fn chapter(content: &str) -> Chapter {
        Chapter::draft(
            Uuid::new_v4(),
            "t",
            content,
            0,
            ChapterMetadata::default(),
        )
    }

    #[tokio::test]
    async fn index_then_retrieve_round_trip() {
        let (service, _store) = service_with_store();
        let project = Uuid::new_v4();
        let doc = chapter("Marie retrouva la lettre volee dans le tiroir du bureau de son oncle.");
        let written = service.index_documents(project, &[doc], true).await.unwrap();
        assert!(written > 0);

        let hits = service.retrieve(project, "la lettre volee", 3).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].contains("lettre"));
    }

    #[tokio::test]
    async fn update_document_keeps_chunk_count_stable() {
        let (service, _store) = service_with_store();
        let project = Uuid::new_v4();
        let doc = chapter(&"Il marchait sous la pluie battante. ".repeat(8));
        let first = service.update_document(project, &doc).await.unwrap();
        let second = service.update_document(project, &doc).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            service.count_project_vectors(project).await.unwrap(),
            second
        );
    }

    #[tokio::test]
    async fn degraded_mode_returns_empty() {
        let service = RagService::disabled(Arc::new(HashEmbeddings::new(16)));
        let project = Uuid::new_v4();
        assert_eq!(
            service.retrieve(project, "question", 5).await.unwrap(),
            Vec::<String>::new()
        );
        assert_eq!(
            service
                .index_documents(project, &[chapter("texte")], false)
                .await
                .unwrap(),
            0
        );
        assert_eq!(service.count_project_vectors(project).await.unwrap(), 0);
    }
}
