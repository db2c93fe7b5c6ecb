//! The Feuilleton chapter generation pipeline.
//!
//! One [`WritingPipeline`] per process, shared across requests; each
//! `generate_chapter` call runs its own state through the node sequence
//! with the quality gate bounding the revise loop. Approval is the separate
//! action that commits facts to memory and refreshes retrieval.

mod approve;
mod container;
mod gate;
mod jobs;
mod pipeline;
mod plan;
mod specialists;
mod state;
mod validate;
mod write;

pub use container::{Engine, EngineBackends};
pub use gate::{quality_gate, GateDecision};
pub use jobs::{GenerationJobs, JobStatus};
pub use pipeline::WritingPipeline;
pub use specialists::CoherenceGates;
pub use state::{
    ApproveChapterResponse, Critique, GenerateChapterRequest, GenerateChapterResponse,
    PipelineState,
};
