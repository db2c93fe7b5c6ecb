//! Background maintenance jobs, keyed by project.
//!
//! 1. Memory reconciliation: re-extract facts from every approved chapter
//!    and replace stored continuity only when the diff is significant.
//! 2. RAG rebuild: wipe and re-index the project's documents.
//! 3. Draft cleanup: delete drafts older than the configured age.
//!
//! Jobs reconcile existing data; they never invent it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use uuid::Uuid;

use feuilleton::config::Settings;
use feuilleton::error::Result;
use feuilleton::stores::{update_project_metadata_unchecked, ChapterRepository, ProjectRepository};
use feuilleton::types::{ChapterStatus, Continuity};
use feuilleton_memory::MemoryService;
use feuilleton_rag::RagService;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ContinuityDiff {
    pub added_characters: Vec<String>,
    pub removed_characters: Vec<String>,
    pub status_changes: Vec<String>,
}

impl ContinuityDiff {
    /// Aggregate of added/removed characters and status changes.
    #[must_use]
    pub fn magnitude(&self) -> usize {
        self.added_characters.len() + self.removed_characters.len() + self.status_changes.len()
    }
}

/// Compare stored continuity with a freshly re-extracted one.
#[must_use]
pub fn compare_continuity(old: &Continuity, new: &Continuity) -> ContinuityDiff {
    let old_by_name: HashMap<&str, &str> = old
        .characters
        .iter()
        .map(|character| (character.name.as_str(), character.status.as_str()))
        .collect();
    let new_by_name: HashMap<&str, &str> = new
        .characters
        .iter()
        .map(|character| (character.name.as_str(), character.status.as_str()))
        .collect();
    let old_names: HashSet<&str> = old_by_name.keys().copied().collect();
    let new_names: HashSet<&str> = new_by_name.keys().copied().collect();

    let mut diff = ContinuityDiff {
        added_characters: new_names
            .difference(&old_names)
            .map(|name| (*name).to_string())
            .collect(),
        removed_characters: old_names
            .difference(&new_names)
            .map(|name| (*name).to_string())
            .collect(),
        status_changes: Vec::new(),
    };
    for name in old_names.intersection(&new_names) {
        if old_by_name[name] != new_by_name[name] {
            diff.status_changes.push(format!(
                "{name}: {} -> {}",
                old_by_name[name], new_by_name[name]
            ));
        }
    }
    diff.added_characters.sort();
    diff.removed_characters.sort();
    diff.status_changes.sort();
    diff
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub chapters_scanned: usize,
    pub diff_magnitude: usize,
    pub replaced: bool,
}

/// Re-extract facts from all approved chapters; replace the stored
/// continuity only when the aggregate diff exceeds the threshold.
pub async fn reconcile_project_memory(
    projects: &dyn ProjectRepository,
    chapters: &dyn ChapterRepository,
    memory: &MemoryService,
    settings: &Settings,
    project_id: Uuid,
) -> Result<ReconcileReport> {
    let approved = chapters.list_approved(project_id).await?;
    let mut rebuilt = Continuity::default();
    for chapter in &approved {
        let facts = memory.extract_facts(&chapter.content).await?;
        memory.merge_facts(&mut rebuilt, &facts);
    }

    let project = projects.get_unchecked(project_id).await?;
    let diff = compare_continuity(&project.metadata.continuity, &rebuilt);
    let magnitude = diff.magnitude();
    let replace = magnitude > settings.memory_reconcile_diff_threshold as usize;
    if replace {
        tracing::info!(%project_id, magnitude, "reconciliation replacing continuity");
        update_project_metadata_unchecked(projects, project_id, |metadata| {
            metadata.continuity = rebuilt.clone();
        })
        .await?;
    }
    Ok(ReconcileReport {
        chapters_scanned: approved.len(),
        diff_magnitude: magnitude,
        replaced: replace,
    })
}

/// Wipe and re-index every document of the project.
pub async fn rebuild_project_rag(
    chapters: &dyn ChapterRepository,
    rag: &RagService,
    project_id: Uuid,
) -> Result<usize> {
    let documents = chapters.list_by_project(project_id).await?;
    rag.index_documents(project_id, &documents, true).await
}

/// Delete draft documents older than `days_threshold` days.
pub async fn cleanup_old_drafts(
    chapters: &dyn ChapterRepository,
    project_id: Uuid,
    days_threshold: i64,
) -> Result<usize> {
    let cutoff = Utc::now() - ChronoDuration::days(days_threshold);
    let documents = chapters.list_by_project(project_id).await?;
    let mut deleted = 0;
    for document in documents {
        if document.metadata.status == ChapterStatus::Draft && document.updated_at < cutoff {
            chapters.delete(document.id).await?;
            deleted += 1;
        }
    }
    if deleted > 0 {
        tracing::info!(%project_id, deleted, "draft cleanup");
    }
    Ok(deleted)
}

/// Run reconciliation for every known project (the scheduled entry point).
pub async fn reconcile_all_projects(
    projects: Arc<dyn ProjectRepository>,
    chapters: Arc<dyn ChapterRepository>,
    memory: Arc<MemoryService>,
    settings: Arc<Settings>,
) -> Result<Vec<(Uuid, ReconcileReport)>> {
    let mut reports = Vec::new();
    for project_id in projects.list_ids().await? {
        match reconcile_project_memory(
            projects.as_ref(),
            chapters.as_ref(),
            memory.as_ref(),
            settings.as_ref(),
            project_id,
        )
        .await
        {
            Ok(report) => reports.push((project_id, report)),
            Err(err) => {
                tracing::warn!(%project_id, error = %err, "reconciliation failed");
            }
        }
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use feuilleton::types::CharacterFact;

    fn continuity_with(names_and_statuses: &[(&str, &str)]) -> Continuity {
        Continuity {
            characters: names_and_statuses
                .iter()
                .map(|(name, status)| CharacterFact {
                    name: (*name).to_string(),
                    status: (*status).to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn diff_counts_adds_removes_and_status_changes() {
        let old = continuity_with(&[("Marie", "alive"), ("Bob", "alive"), ("Luc", "alive")]);
        let new = continuity_with(&[("Marie", "alive"), ("Bob", "dead"), ("Nora", "alive")]);
        let diff = compare_continuity(&old, &new);
        assert_eq!(diff.added_characters, vec!["Nora"]);
        assert_eq!(diff.removed_characters, vec!["Luc"]);
        assert_eq!(diff.status_changes, vec!["Bob: alive -> dead"]);
        assert_eq!(diff.magnitude(), 3);
    }

    #[test]
    fn identical_continuity_has_zero_magnitude() {
        let continuity = continuity_with(&[("Marie", "alive")]);
        assert_eq!(compare_continuity(&continuity, &continuity).magnitude(), 0);
    }
}
