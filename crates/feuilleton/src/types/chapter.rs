//! Chapter documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::plan::ChapterPlan;
use super::validation::ContinuityValidation;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterStatus {
    #[default]
    Draft,
    Approved,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChapterMetadata {
    /// 1-based serial position; `order_index` on the document is 0-based.
    #[serde(default)]
    pub chapter_index: Option<u32>,
    #[serde(default)]
    pub status: ChapterStatus,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub emotional_stake: String,
    /// Plan snapshot frozen when the draft was persisted.
    #[serde(default)]
    pub plan: Option<ChapterPlan>,
    #[serde(default)]
    pub continuity_validations: Vec<ContinuityValidation>,
    #[serde(default)]
    pub word_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub content: String,
    /// 0-based ordering among the project's documents.
    pub order_index: u32,
    pub metadata: ChapterMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chapter {
    #[must_use]
    pub fn draft(
        project_id: Uuid,
        title: impl Into<String>,
        content: impl Into<String>,
        order_index: u32,
        metadata: ChapterMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            title: title.into(),
            content: content.into(),
            order_index,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.metadata.status == ChapterStatus::Approved
    }

    /// 1-based index, falling back to `order_index + 1` when the metadata
    /// does not carry one.
    #[must_use]
    pub fn chapter_index(&self) -> u32 {
        self.metadata.chapter_index.unwrap_or(self.order_index + 1)
    }
}
