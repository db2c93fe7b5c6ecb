//! Dialogue voice consistency.
//!
//! Dialogues are extracted per character, embedded, and compared against the
//! character's historical dialogue corpus by cosine similarity. Outliers
//! below the threshold are flagged. Characters with too few prior dialogues
//! are skipped.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

use feuilleton::error::Result;
use feuilleton_rag::{cosine_similarity, Embeddings};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceIssue {
    pub character: String,
    pub dialogue: String,
    pub similarity: f32,
    pub threshold: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceReport {
    pub issues: Vec<VoiceIssue>,
    pub analyzed_characters: Vec<String>,
    pub skipped_characters: Vec<String>,
}

/// One attributed dialogue line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialogue {
    pub character: String,
    pub text: String,
}

/// Extract quoted dialogue with a nearby attribution (`dit Marie`,
/// `demanda Luc`, …). Unattributed quotes are ignored.
#[must_use]
pub fn extract_dialogues(chapter_text: &str, known_characters: &[String]) -> Vec<Dialogue> {
    // « ... » and "..." quote styles both appear in the corpus.
    let quote_re = Regex::new(r#"[«"]([^«»"]{2,400})[»"]"#).unwrap_or_else(|_| unreachable!());
    let mut dialogues = Vec::new();
    for capture in quote_re.captures_iter(chapter_text) {
        let Some(quoted) = capture.get(1) else { continue };
        // Attribution window: the 80 chars following the closing quote.
        let after_start = capture.get(0).map_or(0, |m| m.end());
        let window_end = chapter_text
            .char_indices()
            .map(|(i, _)| i)
            .find(|&i| i >= after_start + 80)
            .unwrap_or(chapter_text.len());
        let window = &chapter_text[after_start..window_end];
        if let Some(character) = known_characters
            .iter()
            .find(|name| window.contains(name.as_str()))
        {
            dialogues.push(Dialogue {
                character: character.clone(),
                text: quoted.as_str().trim().to_string(),
            });
        }
    }
    dialogues
}

pub struct VoiceConsistencyAnalyzer {
    embeddings: Arc<dyn Embeddings>,
    threshold: f64,
    min_dialogues: usize,
    /// Character → embedded historical dialogues.
    corpus: RwLock<HashMap<String, Vec<Vec<f32>>>>,
}

impl VoiceConsistencyAnalyzer {
    #[must_use]
    pub fn new(embeddings: Arc<dyn Embeddings>, threshold: f64, min_dialogues: usize) -> Self {
        Self {
            embeddings,
            threshold,
            min_dialogues,
            corpus: RwLock::new(HashMap::new()),
        }
    }

    /// Feed validated dialogues (e.g. from approved chapters) into the
    /// historical corpus.
    pub async fn store_validated_dialogues(&self, dialogues: &[Dialogue]) -> Result<()> {
        for dialogue in dialogues {
            let vector = self.embeddings.embed_one(&dialogue.text).await?;
            self.corpus
                .write()
                .entry(dialogue.character.clone())
                .or_default()
                .push(vector);
        }
        Ok(())
    }

    #[must_use]
    pub fn corpus_size(&self, character: &str) -> usize {
        self.corpus.read().get(character).map_or(0, Vec::len)
    }

    /// Compare each new dialogue against the character's corpus; flag lines
    /// whose best similarity falls below the threshold.
    pub async fn analyze_chapter_voices(
        &self,
        chapter_text: &str,
        known_characters: &[String],
    ) -> Result<VoiceReport> {
        let dialogues = extract_dialogues(chapter_text, known_characters);
        let mut report = VoiceReport::default();
        for dialogue in dialogues {
            let history_len = self.corpus_size(&dialogue.character);
            if history_len < self.min_dialogues {
                if !report.skipped_characters.contains(&dialogue.character) {
                    report.skipped_characters.push(dialogue.character.clone());
                }
                continue;
            }
            if !report.analyzed_characters.contains(&dialogue.character) {
                report.analyzed_characters.push(dialogue.character.clone());
            }
            let vector = self.embeddings.embed_one(&dialogue.text).await?;
            let best = {
                let corpus = self.corpus.read();
                corpus
                    .get(&dialogue.character)
                    .map(|vectors| {
                        vectors
                            .iter()
                            .map(|historical| cosine_similarity(historical, &vector))
                            .fold(f32::MIN, f32::max)
                    })
                    .unwrap_or(0.0)
            };
            if f64::from(best) < self.threshold {
                report.issues.push(VoiceIssue {
                    character: dialogue.character.clone(),
                    dialogue: dialogue.text,
                    similarity: best,
                    threshold: self.threshold,
                });
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feuilleton_rag::HashEmbeddings;

    fn known() -> Vec<String> {
        vec!["Marie".to_string(), "Luc".to_string()]
    }

    #[test]
    fn extraction_requires_attribution() {
        let text = "« Je pars ce soir », dit Marie. « On verra bien. » \
                    « Attends-moi », supplia Luc.";
        let dialogues = extract_dialogues(text, &known());
        assert_eq!(dialogues.len(), 2);
        assert_eq!(dialogues[0].character, "Marie");
        assert_eq!(dialogues[1].character, "Luc");
    }

    #[tokio::test]
    async fn few_prior_dialogues_skip_analysis() {
        let analyzer =
            VoiceConsistencyAnalyzer::new(Arc::new(HashEmbeddings::new(64)), 0.55, 5);
        let report = analyzer
            .analyze_chapter_voices("« Bonjour », dit Marie.", &known())
            .await
            .unwrap();
        assert!(report.issues.is_empty());
        assert_eq!(report.skipped_characters, vec!["Marie"]);
    }

    #[tokio::test]
    async fn outlier_dialogue_is_flagged() {
        let analyzer =
            VoiceConsistencyAnalyzer::new(Arc::new(HashEmbeddings::new(128)), 0.9, 2);
        let history: Vec<Dialogue> = (0..3)
            .map(|_| Dialogue {
                character: "Marie".to_string(),
                text: "Je dois proteger ma soeur avant tout".to_string(),
            })
            .collect();
        analyzer.store_validated_dialogues(&history).await.unwrap();

        // Identical phrasing passes the 0.9 bar.
        let same = analyzer
            .analyze_chapter_voices(
                "« Je dois proteger ma soeur avant tout », dit Marie.",
                &known(),
            )
            .await
            .unwrap();
        assert!(same.issues.is_empty());
        assert_eq!(same.analyzed_characters, vec!["Marie"]);

        // Radically different vocabulary does not.
        let different = analyzer
            .analyze_chapter_voices(
                "« Yo frerot balance le fric maintenant », dit Marie.",
                &known(),
            )
            .await
            .unwrap();
        assert_eq!(different.issues.len(), 1);
        assert!(f64::from(different.issues[0].similarity) < 0.9);
    }
}
