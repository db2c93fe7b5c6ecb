//! Fire-and-forget chapter generation.
//!
//! A generation job runs the pipeline on the `generation_medium` lane and
//! records its status in a registry the API layer can poll by job id.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use feuilleton_tasks::{Lane, TaskQueue};

use crate::pipeline::WritingPipeline;
use crate::state::{GenerateChapterRequest, GenerateChapterResponse};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done {
        document_id: Option<Uuid>,
        word_count: u32,
    },
    Failed {
        error: String,
    },
}

/// Registry of asynchronous generation jobs.
#[derive(Default)]
pub struct GenerationJobs {
    statuses: DashMap<Uuid, JobStatus>,
}

impl GenerationJobs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.statuses.get(&job_id).map(|entry| entry.value().clone())
    }

    /// Enqueue a generation run; returns the job id immediately.
    pub fn enqueue(
        self: &Arc<Self>,
        queue: &TaskQueue,
        pipeline: Arc<WritingPipeline>,
        request: GenerateChapterRequest,
    ) -> Uuid {
        let job_id = Uuid::new_v4();
        self.statuses.insert(job_id, JobStatus::Queued);
        let registry = Arc::clone(self);
        // The receiver is dropped on purpose; completion lands in the
        // registry, not in a caller future.
        let _ = queue.submit(Lane::GenerationMedium, async move {
            registry.statuses.insert(job_id, JobStatus::Running);
            match pipeline.generate_chapter(request).await {
                Ok(GenerateChapterResponse {
                    document_id,
                    word_count,
                    ..
                }) => {
                    registry.statuses.insert(
                        job_id,
                        JobStatus::Done {
                            document_id,
                            word_count,
                        },
                    );
                }
                Err(err) => {
                    tracing::warn!(%job_id, error = %err, "generation job failed");
                    registry
                        .statuses
                        .insert(job_id, JobStatus::Failed { error: err.to_string() });
                }
            }
        });
        job_id
    }
}
