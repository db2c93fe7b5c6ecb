//! Memory for Feuilleton.
//!
//! Facts are extracted from approved chapters by the LLM, merged into the
//! project continuity under strict deterministic invariants, and mirrored
//! into a structured entity graph with temporal attributes. The graph
//! answers the continuity queries the validators rely on (resurrections,
//! orphaned threads, object availability, character locations).

mod context_block;
mod extraction;
mod graph;
mod merge;
mod service;
mod style;

pub use context_block::build_context_block;
pub use extraction::extract_facts;
pub use graph::{
    CharacterEvolution, CharacterNode, ContinuityGraph, EventNode, ExportedEdge, ExportedNode,
    GraphEdge, GraphExport, GraphNode, InMemoryContinuityGraph, LocationConsistency, LocationNode,
    LocationVisit, NodeLabel, ObjectAvailability, ObjectNode, OrphanedThread, RelationState,
};
pub use merge::{merge_fact_payloads, merge_facts};
pub use service::MemoryService;
pub use style::StyleMemory;
