//! Coherence specialists.
//!
//! Optional gates layered on top of the pipeline's continuity validation:
//! the LLM consistency analyst, character drift detection, dialogue voice
//! consistency, POV validation, Chekhov's gun tracking, and semantic
//! contradiction detection. Each degrades gracefully when its model or
//! prerequisite data is missing.

mod analyst;
mod chekhov;
mod drift;
mod pov;
mod semantic;
mod voice;

pub use analyst::{agent_by_tag, Agent, AgentContext, AgentOutcome, AgentTask, ConsistencyAnalyst};
pub use chekhov::{elements_match, ChekhovTracker, GunAlert, GunUpdate};
pub use drift::{CharacterDriftDetector, DriftIssue, DriftReport};
pub use pov::{PovType, PovValidation, PovValidator, PovViolation};
pub use semantic::{extract_factual_sentences, SemanticConflict, SemanticValidator};
pub use voice::{extract_dialogues, Dialogue, VoiceConsistencyAnalyzer, VoiceIssue, VoiceReport};
