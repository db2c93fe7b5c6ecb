//! Qdrant-backed [`VectorStore`] for Feuilleton.
//!
//! One collection holds every project's vectors; points carry a
//! `project_id` payload field and all reads/writes filter on it. The
//! `kind` payload field separates chapter chunks from style-memory entries.
//!
//! [`VectorStore`]: feuilleton_rag::VectorStore

use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, value::Kind, Condition, CountPointsBuilder,
    CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointStruct,
    QueryPointsBuilder, ScoredPoint, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use uuid::Uuid;

use feuilleton::error::{Error, Result};
use feuilleton_rag::{ScoredText, VectorRecord, VectorStore};

const FIELD_PROJECT: &str = "project_id";
const FIELD_DOCUMENT: &str = "document_id";
const FIELD_KIND: &str = "kind";
const FIELD_TEXT: &str = "text";

fn store_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::VectorUnavailable(format!("{context}: {err}"))
}

/// Vector store over a served Qdrant instance.
pub struct QdrantVectorStore {
    client: Qdrant,
    collection_name: String,
}

impl QdrantVectorStore {
    /// Connect and ensure the collection exists with the given dimension.
    pub async fn connect(
        url: &str,
        collection_name: impl Into<String>,
        vector_size: u64,
    ) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|err| store_error("failed to create Qdrant client", err))?;
        let store = Self {
            client,
            collection_name: collection_name.into(),
        };
        store.ensure_collection(vector_size).await?;
        Ok(store)
    }

    /// Wrap an already-configured client (API keys, timeouts).
    pub async fn from_client(
        client: Qdrant,
        collection_name: impl Into<String>,
        vector_size: u64,
    ) -> Result<Self> {
        let store = Self {
            client,
            collection_name: collection_name.into(),
        };
        store.ensure_collection(vector_size).await?;
        Ok(store)
    }

    async fn ensure_collection(&self, vector_size: u64) -> Result<()> {
        let exists = self
            .client
            .collection_exists(&self.collection_name)
            .await
            .map_err(|err| store_error("failed to check collection", err))?;
        if exists {
            return Ok(());
        }
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection_name)
                    .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine)),
            )
            .await
            .map_err(|err| store_error("failed to create collection", err))?;
        tracing::info!(collection = %self.collection_name, vector_size, "created collection");
        Ok(())
    }

    fn project_filter(project_id: Uuid, kind: Option<&str>) -> Filter {
        let mut conditions = vec![Condition::matches(FIELD_PROJECT, project_id.to_string())];
        if let Some(kind) = kind {
            conditions.push(Condition::matches(FIELD_KIND, kind.to_string()));
        }
        Filter::must(conditions)
    }

    fn point_from_record(record: VectorRecord) -> Result<PointStruct> {
        let payload: Payload = Payload::try_from(serde_json::json!({
            FIELD_PROJECT: record.project_id.to_string(),
            FIELD_DOCUMENT: record.document_id.to_string(),
            FIELD_KIND: record.kind,
            FIELD_TEXT: record.text,
        }))
        .map_err(|err| Error::InvalidInput(format!("payload: {err}")))?;
        Ok(PointStruct::new(
            record.id.to_string(),
            record.vector,
            payload,
        ))
    }

    fn scored_text(point: ScoredPoint) -> ScoredText {
        let text = point
            .payload
            .get(FIELD_TEXT)
            .and_then(|value| match &value.kind {
                Some(Kind::StringValue(text)) => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default();
        let document_id = point
            .payload
            .get(FIELD_DOCUMENT)
            .and_then(|value| match &value.kind {
                Some(Kind::StringValue(raw)) => Uuid::parse_str(raw).ok(),
                _ => None,
            })
            .unwrap_or_else(|| {
                // Fall back to the point id when the payload is missing it.
                match point.id.as_ref().and_then(|id| id.point_id_options.as_ref()) {
                    Some(PointIdOptions::Uuid(raw)) => Uuid::parse_str(raw).unwrap_or_default(),
                    _ => Uuid::nil(),
                }
            });
        ScoredText {
            text,
            score: point.score,
            document_id,
        }
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let points: Vec<PointStruct> = records
            .into_iter()
            .map(Self::point_from_record)
            .collect::<Result<_>>()?;
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points))
            .await
            .map_err(|err| store_error("upsert failed", err))?;
        Ok(())
    }

    async fn delete_by_project(&self, project_id: Uuid, kind: Option<&str>) -> Result<()> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection_name)
                    .points(Self::project_filter(project_id, kind)),
            )
            .await
            .map_err(|err| store_error("filtered delete failed", err))?;
        Ok(())
    }

    async fn delete_by_document(&self, project_id: Uuid, document_id: Uuid) -> Result<()> {
        let filter = Filter::must([
            Condition::matches(FIELD_PROJECT, project_id.to_string()),
            Condition::matches(FIELD_DOCUMENT, document_id.to_string()),
        ]);
        self.client
            .delete_points(DeletePointsBuilder::new(&self.collection_name).points(filter))
            .await
            .map_err(|err| store_error("document delete failed", err))?;
        Ok(())
    }

    async fn search(
        &self,
        project_id: Uuid,
        kind: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredText>> {
        let response = self
            .client
            .query(
                QueryPointsBuilder::new(&self.collection_name)
                    .query(query.to_vec())
                    .limit(k as u64)
                    .filter(Self::project_filter(project_id, Some(kind)))
                    .with_payload(true),
            )
            .await
            .map_err(|err| store_error("search failed", err))?;
        Ok(response.result.into_iter().map(Self::scored_text).collect())
    }

    async fn count(&self, project_id: Uuid) -> Result<usize> {
        let response = self
            .client
            .count(
                CountPointsBuilder::new(&self.collection_name)
                    .filter(Self::project_filter(project_id, None))
                    .exact(true),
            )
            .await
            .map_err(|err| store_error("count failed", err))?;
        Ok(response.result.map_or(0, |result| result.count as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_filter_includes_kind_when_given() {
        let project = Uuid::new_v4();
        let bare = QdrantVectorStore::project_filter(project, None);
        assert_eq!(bare.must.len(), 1);
        let kinded = QdrantVectorStore::project_filter(project, Some("style"));
        assert_eq!(kinded.must.len(), 2);
    }

    #[test]
    fn record_converts_to_point_with_payload() {
        let record = VectorRecord {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            kind: "chapter".to_string(),
            text: "la pluie".to_string(),
            vector: vec![0.1, 0.2],
        };
        let point = QdrantVectorStore::point_from_record(record).unwrap();
        assert!(point.payload.contains_key(FIELD_TEXT));
        assert!(point.payload.contains_key(FIELD_PROJECT));
    }
}
