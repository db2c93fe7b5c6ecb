//! Optional coherence gates layered onto continuity validation.
//!
//! Each specialist runs only when its switch is on and degrades to silence
//! on unusable payloads; findings land as minor issues and alerts, never as
//! hard failures.

use std::sync::Arc;

use feuilleton::config::Settings;
use feuilleton::error::Result;
use feuilleton::llm::ChatClient;
use feuilleton::stores::update_project_metadata;
use feuilleton::types::{Severity, ValidationIssue};
use feuilleton_coherence::{
    CharacterDriftDetector, ChekhovTracker, PovType, PovValidator, SemanticValidator,
    VoiceConsistencyAnalyzer,
};
use feuilleton_rag::Embeddings;

use crate::pipeline::WritingPipeline;
use crate::state::PipelineState;

pub struct CoherenceGates {
    settings: Arc<Settings>,
    drift: CharacterDriftDetector,
    voice: VoiceConsistencyAnalyzer,
    pov: PovValidator,
    semantic: SemanticValidator,
    chekhov: ChekhovTracker,
}

impl CoherenceGates {
    #[must_use]
    pub fn new(
        settings: Arc<Settings>,
        llm: Arc<dyn ChatClient>,
        embeddings: Option<Arc<dyn Embeddings>>,
    ) -> Self {
        let drift = CharacterDriftDetector::new(llm.clone(), settings.character_drift_threshold);
        let voice = VoiceConsistencyAnalyzer::new(
            embeddings
                .clone()
                .unwrap_or_else(|| Arc::new(feuilleton_rag::HashEmbeddings::default())),
            settings.voice_consistency_threshold,
            settings.voice_min_dialogues_for_analysis,
        );
        let pov = PovValidator::new(llm.clone());
        let semantic = SemanticValidator::new(embeddings, settings.semantic_conflict_threshold);
        let chekhov = ChekhovTracker::new(llm);
        Self {
            settings,
            drift,
            voice,
            pov,
            semantic,
            chekhov,
        }
    }

    #[must_use]
    pub fn chekhov(&self) -> &ChekhovTracker {
        &self.chekhov
    }

    /// Run the enabled specialists on a validated draft.
    pub async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let metadata = &state.project_context.project.metadata;

        if self.settings.character_drift_enabled {
            let report = self
                .drift
                .analyze_chapter_characters(
                    &state.chapter_text,
                    &metadata.continuity.characters,
                    &metadata.story_bible,
                )
                .await?;
            if self.drift.is_drifting(&report) {
                state.continuity_alerts.push(format!(
                    "Derive de personnage detectee (score {:.2})",
                    report.drift_score
                ));
            }
            for issue in report.issues {
                state.continuity_validation.minor_issues.push(
                    ValidationIssue::new(
                        "character_drift",
                        format!("{}: {}", issue.character, issue.issue),
                        Severity::Medium,
                    )
                    .with_source("character_drift"),
                );
            }
        }

        if self.settings.voice_analyzer_enabled {
            let known: Vec<String> = metadata
                .continuity
                .characters
                .iter()
                .map(|character| character.name.clone())
                .collect();
            let report = self
                .voice
                .analyze_chapter_voices(&state.chapter_text, &known)
                .await?;
            for issue in report.issues {
                state.continuity_validation.minor_issues.push(
                    ValidationIssue::new(
                        "voice_inconsistency",
                        format!(
                            "{}: voix inhabituelle ({:.2} < {:.2}) pour \"{}\"",
                            issue.character, issue.similarity, issue.threshold, issue.dialogue
                        ),
                        Severity::Low,
                    )
                    .with_source("voice_analyzer"),
                );
            }
        }

        if self.settings.pov_validator_enabled {
            if let Some(pov_character) = &metadata.pov_character {
                let pov_type = metadata
                    .pov_type
                    .as_deref()
                    .map_or_else(|| PovType::parse(&self.settings.pov_default_type), PovType::parse);
                let validation = self
                    .pov
                    .validate_pov(&state.chapter_text, pov_character, pov_type, &[])
                    .await?;
                for violation in validation.violations {
                    state.continuity_validation.minor_issues.push(
                        ValidationIssue::new(
                            "pov_violation",
                            format!("{}: {}", violation.kind, violation.explanation),
                            Severity::parse(&violation.severity),
                        )
                        .with_source("pov_validator"),
                    );
                }
            }
        }

        if self.settings.semantic_validator_enabled {
            let conflicts = self
                .semantic
                .detect_contradictions(
                    &state.chapter_text,
                    &metadata.story_bible.established_facts,
                )
                .await?;
            for conflict in conflicts {
                state.continuity_validation.minor_issues.push(
                    ValidationIssue::new(
                        "semantic_conflict",
                        format!(
                            "\"{}\" contredit \"{}\"",
                            conflict.new_fact, conflict.established_fact
                        ),
                        Severity::Medium,
                    )
                    .with_source("semantic_validator"),
                );
            }
        }

        // Stale narrative promises always alert (cheap, rule-based).
        let alerts = ChekhovTracker::check_unresolved(
            &metadata.chekhov_guns,
            state.chapter_index,
            15,
            7,
        );
        for alert in alerts {
            state.continuity_alerts.push(format!(
                "Arme de Tchekhov en attente depuis le ch.{}: {} ({})",
                alert.introduced_chapter, alert.element, alert.recommendation
            ));
        }

        Ok(())
    }
}

impl WritingPipeline {
    /// Track Chekhov's guns for a freshly approved chapter.
    pub(crate) async fn track_chekhov_guns(
        &self,
        project_id: uuid::Uuid,
        user_id: uuid::Uuid,
        chapter_text: &str,
        chapter_index: u32,
    ) -> Result<()> {
        let Some(gates) = &self.coherence_gates else {
            return Ok(());
        };
        let project = self.projects.get(project_id, user_id).await?;
        let mut guns = project.metadata.chekhov_guns.clone();
        gates
            .chekhov()
            .track_chapter(&mut guns, chapter_text, chapter_index)
            .await?;
        update_project_metadata(self.projects.as_ref(), project_id, user_id, |metadata| {
            metadata.chekhov_guns = guns.clone();
        })
        .await?;
        Ok(())
    }
}
