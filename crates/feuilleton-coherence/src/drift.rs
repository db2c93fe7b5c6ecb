//! Character drift detection.
//!
//! For every known character present in a chapter, current behavior is
//! compared against the established status history and story-bible traits.
//! The aggregate drift score is `mean(severity) / 10`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use feuilleton::error::Result;
use feuilleton::llm::{chat_json, ChatClient, ChatMessage, ChatRequest};
use feuilleton::types::{CharacterFact, StoryBible};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriftIssue {
    #[serde(default)]
    pub character: String,
    #[serde(default)]
    pub issue: String,
    /// 1–10; unjustified changes score high.
    #[serde(default)]
    pub severity: u8,
    #[serde(default)]
    pub established: String,
    #[serde(default)]
    pub observed: String,
    #[serde(default)]
    pub suggested_fix: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriftReport {
    pub issues: Vec<DriftIssue>,
    /// `mean(severity) / 10`, 0.0 when no issue.
    pub drift_score: f64,
    pub characters_checked: Vec<String>,
}

pub struct CharacterDriftDetector {
    llm: Arc<dyn ChatClient>,
    threshold: f64,
}

impl CharacterDriftDetector {
    #[must_use]
    pub fn new(llm: Arc<dyn ChatClient>, threshold: f64) -> Self {
        Self { llm, threshold }
    }

    /// Whether a report crosses the configured drift threshold.
    #[must_use]
    pub fn is_drifting(&self, report: &DriftReport) -> bool {
        report.drift_score >= self.threshold
    }

    fn character_sheet(character: &CharacterFact, bible: &StoryBible) -> String {
        let mut lines = vec![format!(
            "{} | status: {} | etat: {}",
            character.name, character.status, character.current_state
        )];
        if !character.traits.is_empty() {
            lines.push(format!("traits: {}", character.traits.join(", ")));
        }
        if !character.motivations.is_empty() {
            lines.push(format!("motivations: {}", character.motivations.join(", ")));
        }
        if let Some(bible_traits) = bible.character_traits.get(&character.name) {
            lines.push(format!("bible: {}", bible_traits.join(", ")));
        }
        let history: Vec<String> = character
            .status_history
            .iter()
            .map(|entry| {
                format!(
                    "ch.{} -> {}",
                    entry.chapter_index.unwrap_or(0),
                    entry.value
                )
            })
            .collect();
        if !history.is_empty() {
            lines.push(format!("historique: {}", history.join("; ")));
        }
        lines.join("\n")
    }

    /// Analyze every known character textually present in the chapter.
    pub async fn analyze_chapter_characters(
        &self,
        chapter_text: &str,
        known_characters: &[CharacterFact],
        bible: &StoryBible,
    ) -> Result<DriftReport> {
        let mentioned: Vec<&CharacterFact> = known_characters
            .iter()
            .filter(|character| chapter_text.contains(character.name.as_str()))
            .collect();
        if mentioned.is_empty() {
            return Ok(DriftReport::default());
        }

        let sheets = mentioned
            .iter()
            .map(|character| Self::character_sheet(character, bible))
            .collect::<Vec<_>>()
            .join("\n---\n");
        let prompt = format!(
            "Compare le comportement de ces personnages dans le chapitre avec leur \
             profil etabli. Signale uniquement les changements NON justifies par le texte.\n\n\
             PROFILS ETABLIS:\n{sheets}\n\n\
             CHAPITRE:\n{}\n\n\
             Retourne un JSON {{\"issues\": [{{\"character\", \"issue\", \
             \"severity\" (1-10), \"established\", \"observed\", \"suggested_fix\"}}]}}.",
            feuilleton::text::truncate_chars(chapter_text, 5000)
        );
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)])
            .with_temperature(0.2)
            .with_max_tokens(1000);

        let issues: Vec<DriftIssue> = match chat_json(self.llm.as_ref(), request).await {
            Ok(value) => value
                .get("issues")
                .and_then(|issues| serde_json::from_value(issues.clone()).ok())
                .unwrap_or_default(),
            Err(feuilleton::error::Error::LlmBadFormat(message)) => {
                tracing::warn!(%message, "drift payload unusable");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let drift_score = if issues.is_empty() {
            0.0
        } else {
            let total: u32 = issues
                .iter()
                .map(|issue| u32::from(issue.severity.clamp(1, 10)))
                .sum();
            f64::from(total) / issues.len() as f64 / 10.0
        };

        Ok(DriftReport {
            issues,
            drift_score,
            characters_checked: mentioned
                .iter()
                .map(|character| character.name.clone())
                .collect(),
        })
    }
}
