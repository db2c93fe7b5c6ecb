//! Vector store seam and the in-process implementation.
//!
//! Vectors live in a single collection partitioned by `project_id`; the
//! `kind` payload field separates chapter chunks from style-memory entries.

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use feuilleton::error::Result;

use crate::embeddings::cosine_similarity;

/// Payload kind for chapter content chunks.
pub const KIND_CHAPTER: &str = "chapter";
/// Payload kind for style-memory entries.
pub const KIND_STYLE: &str = "style";

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub document_id: Uuid,
    pub kind: String,
    pub text: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct ScoredText {
    pub text: String,
    pub score: f32,
    pub document_id: Uuid,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Delete every vector of the project, optionally restricted to a kind.
    async fn delete_by_project(&self, project_id: Uuid, kind: Option<&str>) -> Result<()>;

    /// Delete the vectors of one document.
    async fn delete_by_document(&self, project_id: Uuid, document_id: Uuid) -> Result<()>;

    /// Top-k cosine search within the project partition.
    async fn search(
        &self,
        project_id: Uuid,
        kind: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredText>>;

    /// Number of vectors stored for the project (all kinds).
    async fn count(&self, project_id: Uuid) -> Result<usize>;
}

/// Exhaustive-scan in-memory store. Fine for tests and single-process
/// deployments; the qdrant crate provides the served variant.
#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        let mut stored = self.records.write();
        for record in records {
            if let Some(existing) = stored.iter_mut().find(|r| r.id == record.id) {
                *existing = record;
            } else {
                stored.push(record);
            }
        }
        Ok(())
    }

    async fn delete_by_project(&self, project_id: Uuid, kind: Option<&str>) -> Result<()> {
        self.records.write().retain(|record| {
            record.project_id != project_id || kind.is_some_and(|k| record.kind != k)
        });
        Ok(())
    }

    async fn delete_by_document(&self, project_id: Uuid, document_id: Uuid) -> Result<()> {
        self.records
            .write()
            .retain(|record| record.project_id != project_id || record.document_id != document_id);
        Ok(())
    }

    async fn search(
        &self,
        project_id: Uuid,
        kind: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredText>> {
        let records = self.records.read();
        let mut scored: Vec<ScoredText> = records
            .iter()
            .filter(|record| record.project_id == project_id && record.kind == kind)
            .map(|record| ScoredText {
                text: record.text.clone(),
                score: cosine_similarity(&record.vector, query),
                document_id: record.document_id,
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self, project_id: Uuid) -> Result<usize> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|record| record.project_id == project_id)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(project_id: Uuid, kind: &str, text: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: Uuid::new_v4(),
            project_id,
            document_id: Uuid::new_v4(),
            kind: kind.to_string(),
            text: text.to_string(),
            vector,
        }
    }

    #[tokio::test]
    async fn search_is_partitioned_by_project_and_kind() {
        let store = InMemoryVectorStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store
            .upsert(vec![
                record(a, KIND_CHAPTER, "chez a", vec![1.0, 0.0]),
                record(a, KIND_STYLE, "style a", vec![1.0, 0.0]),
                record(b, KIND_CHAPTER, "chez b", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.search(a, KIND_CHAPTER, &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "chez a");
        assert_eq!(store.count(a).await.unwrap(), 2);
        assert_eq!(store.count(b).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn results_are_ordered_by_similarity() {
        let store = InMemoryVectorStore::new();
        let project = Uuid::new_v4();
        store
            .upsert(vec![
                record(project, KIND_CHAPTER, "loin", vec![0.0, 1.0]),
                record(project, KIND_CHAPTER, "proche", vec![1.0, 0.1]),
            ])
            .await
            .unwrap();
        let hits = store
            .search(project, KIND_CHAPTER, &[1.0, 0.0], 2)
            .await
            .unwrap();
        assert_eq!(hits[0].text, "proche");
    }

    #[tokio::test]
    async fn document_deletion_is_scoped() {
        let store = InMemoryVectorStore::new();
        let project = Uuid::new_v4();
        let doc = Uuid::new_v4();
        let mut keep = record(project, KIND_CHAPTER, "garde", vec![1.0]);
        keep.document_id = Uuid::new_v4();
        let mut gone = record(project, KIND_CHAPTER, "efface", vec![1.0]);
        gone.document_id = doc;
        store.upsert(vec![keep, gone]).await.unwrap();

        store.delete_by_document(project, doc).await.unwrap();
        assert_eq!(store.count(project).await.unwrap(), 1);
    }
}
