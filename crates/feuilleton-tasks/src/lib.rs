//! Background work for Feuilleton.
//!
//! The in-process [`TaskQueue`] mirrors the deployment's named queues with
//! priority lanes; maintenance jobs reconcile memory, rebuild RAG indexes,
//! clean up stale drafts, and promote recurring facts into the story bible.

mod maintenance;
mod promotion;
mod queue;
mod scheduler;

pub use maintenance::{
    cleanup_old_drafts, compare_continuity, rebuild_project_rag, reconcile_all_projects,
    reconcile_project_memory, ContinuityDiff, ReconcileReport,
};
pub use promotion::{promote_facts_to_bible, promote_recurring_facts, PromotionReport};
pub use queue::{Lane, TaskQueue};
pub use scheduler::spawn_periodic;
