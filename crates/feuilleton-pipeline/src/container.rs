//! Process-wide dependency container.
//!
//! Everything long-lived (LLM client, stores, graph, vector client, cache,
//! circuit breakers, the pipeline itself) is built once at startup and
//! injected into per-request work. `warmup` pre-loads the embedding model
//! with a known-good prompt so first-chapter latency excludes model loading.

use std::sync::Arc;

use uuid::Uuid;

use feuilleton::cache::{CacheService, InMemoryKvCache, KvCache};
use feuilleton::config::Settings;
use feuilleton::error::Result;
use feuilleton::export::export_zip;
use feuilleton::llm::ChatClient;
use feuilleton::stores::{
    ChapterRepository, InMemoryChapterRepository, InMemoryProjectRepository, ProjectRepository,
};
use feuilleton_memory::{ContinuityGraph, GraphExport, InMemoryContinuityGraph, MemoryService, StyleMemory};
use feuilleton_rag::{ChunkConfig, Embeddings, HashEmbeddings, RagService, VectorStore};
use feuilleton_tasks::TaskQueue;

use crate::jobs::GenerationJobs;
use crate::pipeline::WritingPipeline;
use crate::specialists::CoherenceGates;

/// Pluggable backends; anything left `None` gets the in-process default.
#[derive(Default)]
pub struct EngineBackends {
    pub projects: Option<Arc<dyn ProjectRepository>>,
    pub chapters: Option<Arc<dyn ChapterRepository>>,
    pub graph: Option<Arc<dyn ContinuityGraph>>,
    pub vectors: Option<Arc<dyn VectorStore>>,
    pub embeddings: Option<Arc<dyn Embeddings>>,
    pub cache: Option<Arc<dyn KvCache>>,
}

/// The assembled engine.
pub struct Engine {
    pub settings: Arc<Settings>,
    pub projects: Arc<dyn ProjectRepository>,
    pub chapters: Arc<dyn ChapterRepository>,
    pub graph: Arc<dyn ContinuityGraph>,
    pub rag: Arc<RagService>,
    pub memory: Arc<MemoryService>,
    pub queue: Arc<TaskQueue>,
    pub jobs: Arc<GenerationJobs>,
    pub pipeline: Arc<WritingPipeline>,
}

impl Engine {
    /// Assemble the engine. Every singleton is registered here, up front.
    #[must_use]
    pub fn build(
        settings: Settings,
        llm: Arc<dyn ChatClient>,
        backends: EngineBackends,
        worker_count: usize,
    ) -> Self {
        let settings = Arc::new(settings);
        let projects = backends
            .projects
            .unwrap_or_else(|| Arc::new(InMemoryProjectRepository::new()));
        let chapters = backends
            .chapters
            .unwrap_or_else(|| Arc::new(InMemoryChapterRepository::new()));
        let graph = backends
            .graph
            .unwrap_or_else(|| Arc::new(InMemoryContinuityGraph::new()));
        let embeddings = backends
            .embeddings
            .unwrap_or_else(|| Arc::new(HashEmbeddings::new(settings.embedding_dimension)));
        let vectors = backends.vectors;

        let rag = Arc::new(RagService::new(
            vectors.clone(),
            embeddings.clone(),
            ChunkConfig {
                chunk_size: settings.rag_chunk_size,
                chunk_overlap: settings.rag_chunk_overlap,
            },
        ));
        let memory = Arc::new(MemoryService::new(
            llm.clone(),
            graph.clone(),
            StyleMemory::new(vectors, embeddings.clone()),
        ));
        let cache = Arc::new(CacheService::new(
            backends
                .cache
                .unwrap_or_else(|| Arc::new(InMemoryKvCache::new())),
            settings.memory_context_cache_ttl,
            settings.rag_cache_ttl,
        ));
        let queue = TaskQueue::start(worker_count);
        let gates = CoherenceGates::new(settings.clone(), llm.clone(), Some(embeddings));

        let pipeline = Arc::new(
            WritingPipeline::new(
                settings.clone(),
                llm,
                projects.clone(),
                chapters.clone(),
                rag.clone(),
                memory.clone(),
                cache,
            )
            .with_queue(queue.clone())
            .with_coherence_gates(gates),
        );

        Self {
            settings,
            projects,
            chapters,
            graph,
            rag,
            memory,
            queue,
            jobs: Arc::new(GenerationJobs::new()),
            pipeline,
        }
    }

    /// Load model weights before the first chapter request.
    pub async fn warmup(&self) -> Result<()> {
        self.rag.warmup().await
    }

    /// `{nodes, edges}` view of the project's continuity graph.
    pub async fn export_graph(&self, project_id: Uuid) -> Result<GraphExport> {
        self.graph.export(project_id).await
    }

    /// Zip pack of the project's approved chapters
    /// (`{index:03}-{safe_title}.md` entries).
    pub async fn export_approved_chapters(&self, project_id: Uuid) -> Result<Vec<u8>> {
        let approved = self.chapters.list_approved(project_id).await?;
        export_zip(&approved)
    }
}
