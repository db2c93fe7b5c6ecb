//! Global plan and per-chapter plans.

use serde::{Deserialize, Serialize};

/// Acceptance state of the project plan. No chapter may be generated while
/// the plan is still a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Draft,
    Accepted,
}

/// The project-level plan envelope: status plus the planned arcs/chapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub status: PlanStatus,
    pub data: PlanData,
}

impl Plan {
    #[must_use]
    pub fn accepted(data: PlanData) -> Self {
        Self {
            status: PlanStatus::Accepted,
            data,
        }
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.status == PlanStatus::Accepted
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanData {
    #[serde(default)]
    pub global_summary: String,
    #[serde(default)]
    pub arcs: Vec<StoryArc>,
    #[serde(default)]
    pub chapters: Vec<PlanChapter>,
}

impl PlanData {
    /// Plan entry for a 1-based chapter index.
    #[must_use]
    pub fn chapter(&self, index: u32) -> Option<&PlanChapter> {
        self.chapters.iter().find(|entry| entry.index == index)
    }

    pub fn chapter_mut(&mut self, index: u32) -> Option<&mut PlanChapter> {
        self.chapters.iter_mut().find(|entry| entry.index == index)
    }

    /// Arc covering a 1-based chapter index, if any.
    #[must_use]
    pub fn arc_for_chapter(&self, index: u32) -> Option<&StoryArc> {
        self.arcs
            .iter()
            .find(|arc| arc.start_chapter <= index && index <= arc.end_chapter)
    }
}

/// An ordered narrative arc spanning a contiguous chapter range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryArc {
    pub name: String,
    pub start_chapter: u32,
    pub end_chapter: u32,
    #[serde(default)]
    pub summary: String,
}

/// Per-chapter approval state inside the plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanChapterStatus {
    #[default]
    Pending,
    Approved,
}

/// One planned chapter entry. Constraints declared here are merged into the
/// generated [`ChapterPlan`] so the planner can never drop them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanChapter {
    pub index: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub emotional_stake: String,
    #[serde(default)]
    pub status: PlanChapterStatus,
    #[serde(default)]
    pub scene_beats: Vec<String>,
    #[serde(default)]
    pub required_plot_points: Vec<String>,
    #[serde(default)]
    pub forbidden_actions: Vec<String>,
    #[serde(default)]
    pub optional_subplots: Vec<String>,
    #[serde(default)]
    pub arc_constraints: Vec<String>,
    #[serde(default)]
    pub success_criteria: String,
    #[serde(default)]
    pub cliffhanger_type: String,
    #[serde(default)]
    pub estimated_word_count: Option<u32>,
}

impl PlanChapter {
    /// Whether the entry already carries a usable beat breakdown, making an
    /// LLM planning call unnecessary.
    #[must_use]
    pub fn has_details(&self) -> bool {
        !self.scene_beats.is_empty()
    }
}

/// The working plan the writer expands. Immutable once the draft is
/// persisted; may come from the planner LLM, the plan entry, or the
/// pregenerated cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterPlan {
    #[serde(default)]
    pub chapter_number: u32,
    #[serde(default)]
    pub scene_beats: Vec<String>,
    #[serde(default)]
    pub target_emotion: String,
    #[serde(default)]
    pub required_plot_points: Vec<String>,
    #[serde(default)]
    pub forbidden_actions: Vec<String>,
    #[serde(default)]
    pub arc_constraints: Vec<String>,
    #[serde(default)]
    pub optional_subplots: Vec<String>,
    #[serde(default)]
    pub success_criteria: String,
    #[serde(default)]
    pub cliffhanger_type: String,
    #[serde(default)]
    pub estimated_word_count: u32,
}

impl ChapterPlan {
    /// Normalize a plan fresh out of the LLM: clamp beats to 3–7, fill the
    /// chapter number and a word estimate when missing.
    pub fn normalize(mut self, chapter_index: u32, target_words: Option<u32>) -> Self {
        self.chapter_number = chapter_index;
        if self.scene_beats.is_empty() {
            self.scene_beats = default_beats();
        }
        self.scene_beats.truncate(7);
        if self.estimated_word_count == 0 {
            self.estimated_word_count = target_words.unwrap_or(0);
        }
        self
    }

    /// Overlay non-empty plan-entry constraints; entry values win so that
    /// global plan constraints are never silently dropped.
    pub fn merge_entry_constraints(&mut self, entry: &PlanChapter) {
        if !entry.required_plot_points.is_empty() {
            self.required_plot_points = entry.required_plot_points.clone();
        }
        if !entry.forbidden_actions.is_empty() {
            self.forbidden_actions = entry.forbidden_actions.clone();
        }
        if !entry.optional_subplots.is_empty() {
            self.optional_subplots = entry.optional_subplots.clone();
        }
        if !entry.arc_constraints.is_empty() {
            self.arc_constraints = entry.arc_constraints.clone();
        }
        if !entry.success_criteria.is_empty() {
            self.success_criteria = entry.success_criteria.clone();
        }
    }
}

/// Fallback beat outline when the planner produced none.
#[must_use]
pub fn default_beats() -> Vec<String> {
    vec![
        "Mise en place".to_string(),
        "Montee en tension".to_string(),
        "Revelation cliffhanger".to_string(),
    ]
}
