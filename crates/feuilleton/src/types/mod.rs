//! Domain model.
//!
//! Schema-validated records replace the free-form maps the serialized
//! metadata used to be: every entity that crosses a persistence or prompt
//! boundary is a serde struct, and the only serialization layer lives in the
//! repositories.

mod bible;
mod chapter;
mod chekhov;
mod continuity;
mod contradiction;
mod plan;
mod project;
mod validation;

pub use bible::{IntentionalMystery, PromotedFact, StoryBible};
pub use chapter::{Chapter, ChapterMetadata, ChapterStatus};
pub use chekhov::{ChekhovGun, GunType};
pub use continuity::{
    CharacterFact, CharacterLocation, Continuity, ContinuityFacts, EventFact, HistoryEntry,
    LocationFact, ObjectFact, ObjectStatus, ObjectStatusEntry, RelationFact,
};
pub use contradiction::{ContradictionStatus, Severity, TrackedContradiction};
pub use plan::{
    default_beats, ChapterPlan, Plan, PlanChapter, PlanChapterStatus, PlanData, PlanStatus,
    StoryArc,
};
pub use project::{Concept, Project, ProjectMetadata, RecursiveMemoryState, WordRange};
pub use validation::{
    AnalysisCharacterIssue, AnalysisContradiction, AnalysisRuleViolation, AnalysisTimelineIssue,
    ContinuityAnalysis, ContinuityValidation, GraphIssue, PlotPointValidation, ValidationIssue,
};
