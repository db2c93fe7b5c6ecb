//! Project aggregate: the root entity owning the plan, story bible,
//! continuity, and generation caches.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bible::StoryBible;
use super::chekhov::ChekhovGun;
use super::continuity::Continuity;
use super::contradiction::TrackedContradiction;
use super::plan::{ChapterPlan, Plan};

/// Premise, tone and tropes as captured from the user during project setup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    #[serde(default)]
    pub premise: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub tropes: Vec<String>,
    #[serde(default)]
    pub emotional_orientation: String,
}

/// Per-project chapter word range override; invalid ranges fall back to the
/// process defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordRange {
    pub min: u32,
    pub max: u32,
}

/// The three-level summary pyramid state persisted on the project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecursiveMemoryState {
    #[serde(default)]
    pub global_synopsis: String,
    /// Last approved chapter count at which the synopsis was rebuilt.
    #[serde(default)]
    pub synopsis_chapter_count: u32,
    /// Arc name → ~500-word summary.
    #[serde(default)]
    pub arc_summaries: BTreeMap<String, String>,
    /// Arc name → chapter count at the last arc-summary refresh.
    #[serde(default)]
    pub arc_summary_marks: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectMetadata {
    #[serde(default)]
    pub concept: Concept,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub synopsis: Option<String>,
    #[serde(default)]
    pub story_bible: StoryBible,
    #[serde(default)]
    pub continuity: Continuity,
    #[serde(default)]
    pub recursive_memory: RecursiveMemoryState,
    #[serde(default)]
    pub recent_chapter_summaries: Vec<String>,
    #[serde(default)]
    pub tracked_contradictions: Vec<TrackedContradiction>,
    #[serde(default)]
    pub chekhov_guns: Vec<ChekhovGun>,
    /// Chapter index → plan generated ahead of time.
    #[serde(default)]
    pub pregenerated_plans: BTreeMap<u32, ChapterPlan>,
    #[serde(default)]
    pub chapter_word_range: Option<WordRange>,
    #[serde(default)]
    pub pov_character: Option<String>,
    #[serde(default)]
    pub pov_type: Option<String>,
}

impl ProjectMetadata {
    /// Descriptions of contradictions that must be filtered from future
    /// validation outputs.
    #[must_use]
    pub fn suppressed_contradictions(&self) -> Vec<String> {
        self.tracked_contradictions
            .iter()
            .filter(|contradiction| contradiction.suppresses())
            .map(|contradiction| contradiction.description.clone())
            .collect()
    }

    /// Append a new summary, retaining only the 10 most recent.
    pub fn push_recent_summary(&mut self, summary: impl Into<String>) {
        self.recent_chapter_summaries.push(summary.into());
        let len = self.recent_chapter_summaries.len();
        if len > 10 {
            self.recent_chapter_summaries.drain(..len - 10);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub genre: String,
    pub metadata: ProjectMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    #[must_use]
    pub fn new(owner_id: Uuid, title: impl Into<String>, genre: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            title: title.into(),
            genre: genre.into(),
            metadata: ProjectMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The accepted plan, or the §7 contract error.
    pub fn accepted_plan(&self) -> crate::error::Result<&Plan> {
        match &self.metadata.plan {
            None => Err(crate::error::Error::PlanMissing {
                project_id: self.id,
            }),
            Some(plan) if !plan.is_accepted() => Err(crate::error::Error::PlanNotAccepted {
                project_id: self.id,
            }),
            Some(plan) => Ok(plan),
        }
    }
}
