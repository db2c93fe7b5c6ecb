//! Repository seams for projects and chapters.
//!
//! The engine only sees these traits; production deployments back them with
//! a database, tests and single-process setups use the in-memory
//! implementations. Project metadata writes go through an optimistic
//! version check so concurrent approvals reconcile instead of clobbering.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Chapter, ChapterStatus, Project, ProjectMetadata};

/// How many times a read-merge-write loop retries on version conflicts.
pub const METADATA_WRITE_ATTEMPTS: u32 = 3;

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Fetch a project owned by `owner`. [`Error::NotOwned`] when the owner
    /// does not match.
    async fn get(&self, id: Uuid, owner: Uuid) -> Result<Project>;

    /// Maintenance access: fetch without an ownership check. Background
    /// jobs reconcile data but never act on behalf of a user.
    async fn get_unchecked(&self, id: Uuid) -> Result<Project>;

    /// Current metadata version, for optimistic writes.
    async fn metadata_version(&self, id: Uuid) -> Result<u64>;

    /// Compare-and-swap metadata write. Returns the new version;
    /// [`Error::MetadataConflict`] when `expected_version` is stale.
    async fn update_metadata(
        &self,
        id: Uuid,
        metadata: ProjectMetadata,
        expected_version: u64,
    ) -> Result<u64>;

    async fn insert(&self, project: Project) -> Result<()>;

    async fn list_ids(&self) -> Result<Vec<Uuid>>;
}

/// Read-merge-write helper: loads the project, applies `mutate`, and retries
/// the compare-and-swap up to [`METADATA_WRITE_ATTEMPTS`] times.
pub async fn update_project_metadata<F>(
    repository: &dyn ProjectRepository,
    id: Uuid,
    owner: Uuid,
    mut mutate: F,
) -> Result<ProjectMetadata>
where
    F: FnMut(&mut ProjectMetadata),
{
    for attempt in 1..=METADATA_WRITE_ATTEMPTS {
        let project = repository.get(id, owner).await?;
        let version = repository.metadata_version(id).await?;
        let mut metadata = project.metadata;
        mutate(&mut metadata);
        match repository
            .update_metadata(id, metadata.clone(), version)
            .await
        {
            Ok(_) => return Ok(metadata),
            Err(Error::MetadataConflict { .. }) if attempt < METADATA_WRITE_ATTEMPTS => {
                tracing::debug!(project_id = %id, attempt, "metadata conflict, re-merging");
            }
            Err(err) => return Err(err),
        }
    }
    Err(Error::MetadataConflict {
        attempts: METADATA_WRITE_ATTEMPTS,
    })
}

/// Maintenance variant of [`update_project_metadata`]: no ownership check.
pub async fn update_project_metadata_unchecked<F>(
    repository: &dyn ProjectRepository,
    id: Uuid,
    mut mutate: F,
) -> Result<ProjectMetadata>
where
    F: FnMut(&mut ProjectMetadata),
{
    for attempt in 1..=METADATA_WRITE_ATTEMPTS {
        let project = repository.get_unchecked(id).await?;
        let version = repository.metadata_version(id).await?;
        let mut metadata = project.metadata;
        mutate(&mut metadata);
        match repository
            .update_metadata(id, metadata.clone(), version)
            .await
        {
            Ok(_) => return Ok(metadata),
            Err(Error::MetadataConflict { .. }) if attempt < METADATA_WRITE_ATTEMPTS => {
                tracing::debug!(project_id = %id, attempt, "metadata conflict, re-merging");
            }
            Err(err) => return Err(err),
        }
    }
    Err(Error::MetadataConflict {
        attempts: METADATA_WRITE_ATTEMPTS,
    })
}

/// Partial chapter update applied by [`ChapterRepository::update`].
#[derive(Debug, Clone, Default)]
pub struct ChapterPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub order_index: Option<u32>,
    pub metadata: Option<crate::types::ChapterMetadata>,
}

#[async_trait]
pub trait ChapterRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Chapter>;

    async fn create(&self, chapter: Chapter) -> Result<()>;

    async fn update(&self, id: Uuid, patch: ChapterPatch) -> Result<Chapter>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Highest `order_index` among the project's chapters.
    async fn max_order_index(&self, project_id: Uuid) -> Result<Option<u32>>;

    /// Chapter carrying the given 1-based `chapter_index`.
    async fn chapter_by_index(&self, project_id: Uuid, index: u32) -> Result<Option<Chapter>>;

    /// All chapters of the project ordered by `order_index`.
    async fn list_by_project(&self, project_id: Uuid) -> Result<Vec<Chapter>>;

    async fn list_approved(&self, project_id: Uuid) -> Result<Vec<Chapter>> {
        let chapters = self.list_by_project(project_id).await?;
        Ok(chapters
            .into_iter()
            .filter(Chapter::is_approved)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryProjectRepository {
    projects: DashMap<Uuid, (Project, u64)>,
}

impl InMemoryProjectRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectRepository for InMemoryProjectRepository {
    async fn get(&self, id: Uuid, owner: Uuid) -> Result<Project> {
        let entry = self
            .projects
            .get(&id)
            .ok_or(Error::ProjectNotFound { project_id: id })?;
        let (project, _) = entry.value();
        if project.owner_id != owner {
            return Err(Error::NotOwned);
        }
        Ok(project.clone())
    }

    async fn get_unchecked(&self, id: Uuid) -> Result<Project> {
        let entry = self
            .projects
            .get(&id)
            .ok_or(Error::ProjectNotFound { project_id: id })?;
        Ok(entry.value().0.clone())
    }

    async fn metadata_version(&self, id: Uuid) -> Result<u64> {
        let entry = self
            .projects
            .get(&id)
            .ok_or(Error::ProjectNotFound { project_id: id })?;
        Ok(entry.value().1)
    }

    async fn update_metadata(
        &self,
        id: Uuid,
        metadata: ProjectMetadata,
        expected_version: u64,
    ) -> Result<u64> {
        let mut entry = self
            .projects
            .get_mut(&id)
            .ok_or(Error::ProjectNotFound { project_id: id })?;
        let (project, version) = entry.value_mut();
        if *version != expected_version {
            return Err(Error::MetadataConflict { attempts: 1 });
        }
        project.metadata = metadata;
        project.updated_at = Utc::now();
        *version += 1;
        Ok(*version)
    }

    async fn insert(&self, project: Project) -> Result<()> {
        self.projects.insert(project.id, (project, 0));
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<Uuid>> {
        Ok(self.projects.iter().map(|entry| *entry.key()).collect())
    }
}

#[derive(Default)]
pub struct InMemoryChapterRepository {
    chapters: DashMap<Uuid, Chapter>,
}

impl InMemoryChapterRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChapterRepository for InMemoryChapterRepository {
    async fn get(&self, id: Uuid) -> Result<Chapter> {
        self.chapters
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::ChapterNotFound { chapter_id: id })
    }

    async fn create(&self, chapter: Chapter) -> Result<()> {
        self.chapters.insert(chapter.id, chapter);
        Ok(())
    }

    async fn update(&self, id: Uuid, patch: ChapterPatch) -> Result<Chapter> {
        let mut entry = self
            .chapters
            .get_mut(&id)
            .ok_or(Error::ChapterNotFound { chapter_id: id })?;
        let chapter = entry.value_mut();
        if let Some(title) = patch.title {
            chapter.title = title;
        }
        if let Some(content) = patch.content {
            chapter.content = content;
        }
        if let Some(order_index) = patch.order_index {
            chapter.order_index = order_index;
        }
        if let Some(metadata) = patch.metadata {
            chapter.metadata = metadata;
        }
        chapter.updated_at = Utc::now();
        Ok(chapter.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.chapters.remove(&id);
        Ok(())
    }

    async fn max_order_index(&self, project_id: Uuid) -> Result<Option<u32>> {
        Ok(self
            .chapters
            .iter()
            .filter(|entry| entry.value().project_id == project_id)
            .map(|entry| entry.value().order_index)
            .max())
    }

    async fn chapter_by_index(&self, project_id: Uuid, index: u32) -> Result<Option<Chapter>> {
        Ok(self
            .chapters
            .iter()
            .filter(|entry| entry.value().project_id == project_id)
            .find(|entry| entry.value().chapter_index() == index)
            .map(|entry| entry.value().clone()))
    }

    async fn list_by_project(&self, project_id: Uuid) -> Result<Vec<Chapter>> {
        let mut chapters: Vec<Chapter> = self
            .chapters
            .iter()
            .filter(|entry| entry.value().project_id == project_id)
            .map(|entry| entry.value().clone())
            .collect();
        chapters.sort_by_key(|chapter| chapter.order_index);
        Ok(chapters)
    }
}

/// Convenience used by tests and maintenance: count a project's approved
/// chapters.
pub async fn approved_chapter_count(
    chapters: &dyn ChapterRepository,
    project_id: Uuid,
) -> Result<u32> {
    Ok(chapters
        .list_by_project(project_id)
        .await?
        .iter()
        .filter(|chapter| chapter.metadata.status == ChapterStatus::Approved)
        .count() as u32)
}
