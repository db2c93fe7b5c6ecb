//! Project context assembly for prompts.

mod recursive;
mod truncate;

pub use recursive::RecursiveMemory;
pub use truncate::SmartContextTruncator;

use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;
use crate::stores::ProjectRepository;
use crate::types::Project;

/// The per-request context pack: the project aggregate plus the metadata
/// version the caller will CAS against.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub project: Project,
    pub metadata_version: u64,
}

impl ProjectContext {
    /// Applied chapter word range: the project override clamped into the
    /// process defaults, falling back to the defaults on nonsense.
    #[must_use]
    pub fn word_range(&self, default_min: u32, default_max: u32) -> (u32, u32) {
        let Some(range) = self.project.metadata.chapter_word_range else {
            return (default_min, default_max);
        };
        if range.min < 1 || range.max < 1 || range.min > default_max || range.max > default_max {
            return (default_min, default_max);
        }
        if range.max < range.min {
            return (default_min, default_max);
        }
        let min = range.min.max(default_min);
        let max = range.max.min(default_max);
        if min > max {
            (default_min, default_max)
        } else {
            (min, max)
        }
    }
}

/// Builds the context pack the pipeline starts from.
pub struct ContextBuilder {
    projects: Arc<dyn ProjectRepository>,
}

impl ContextBuilder {
    #[must_use]
    pub fn new(projects: Arc<dyn ProjectRepository>) -> Self {
        Self { projects }
    }

    pub async fn build(&self, project_id: Uuid, user_id: Uuid) -> Result<ProjectContext> {
        let project = self.projects.get(project_id, user_id).await?;
        let metadata_version = self.projects.metadata_version(project_id).await?;
        Ok(ProjectContext {
            project,
            metadata_version,
        })
    }
}
