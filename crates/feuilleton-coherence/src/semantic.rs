//! Semantic contradiction detection.
//!
//! Factual sentences from the new chapter are embedded and compared against
//! the established fact corpus; pairs above the similarity threshold are
//! checked for contradictory patterns (vivant/mort, ami/ennemi, …).
//! Degrades to a no-op when no embedding model is available.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use feuilleton::error::Result;
use feuilleton_rag::{cosine_similarity, Embeddings};

/// Contradictory marker pairs scanned inside similar fact pairs.
const CONTRADICTION_PATTERNS: &[(&str, &str)] = &[
    ("vivant", "mort"),
    ("vivante", "morte"),
    ("ami", "ennemi"),
    ("alliee", "ennemie"),
    ("jour", "nuit"),
    ("ouvert", "ferme"),
    ("possede", "perdu"),
    ("present", "absent"),
    ("riche", "pauvre"),
    ("marie", "celibataire"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConflict {
    pub new_fact: String,
    pub established_fact: String,
    pub similarity: f32,
    #[serde(default)]
    pub pattern: Option<(String, String)>,
}

/// Sentences likely to carry facts: declarative sentences naming a proper
/// noun with a stative verb.
#[must_use]
pub fn extract_factual_sentences(text: &str) -> Vec<String> {
    let fact_verb =
        Regex::new(r"\b(est|etait|sont|etaient|a|avait|possede|possedait|devient|devint|reste|demeure)\b")
            .unwrap_or_else(|_| unreachable!());
    let proper_noun = Regex::new(r"\b[A-Z][a-zàâäéèêëïîôùûüÿœæç]+").unwrap_or_else(|_| unreachable!());

    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|sentence| sentence.len() > 15 && sentence.len() < 300)
        .filter(|sentence| fact_verb.is_match(sentence) && proper_noun.is_match(sentence))
        .map(str::to_string)
        .collect()
}

fn contradiction_pattern(a: &str, b: &str) -> Option<(String, String)> {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    for (p1, p2) in CONTRADICTION_PATTERNS {
        if (a.contains(p1) && b.contains(p2)) || (a.contains(p2) && b.contains(p1)) {
            return Some(((*p1).to_string(), (*p2).to_string()));
        }
    }
    None
}

pub struct SemanticValidator {
    embeddings: Option<Arc<dyn Embeddings>>,
    conflict_threshold: f64,
}

impl SemanticValidator {
    #[must_use]
    pub fn new(embeddings: Option<Arc<dyn Embeddings>>, conflict_threshold: f64) -> Self {
        Self {
            embeddings,
            conflict_threshold,
        }
    }

    /// Compare the chapter's factual sentences against established facts.
    pub async fn detect_contradictions(
        &self,
        chapter_text: &str,
        established_facts: &[String],
    ) -> Result<Vec<SemanticConflict>> {
        let Some(embeddings) = &self.embeddings else {
            // No model: explicit no-op.
            return Ok(Vec::new());
        };
        if established_facts.is_empty() {
            return Ok(Vec::new());
        }
        let new_facts = extract_factual_sentences(chapter_text);
        if new_facts.is_empty() {
            return Ok(Vec::new());
        }

        let new_vectors = embeddings.embed(&new_facts).await?;
        let established_vectors = embeddings.embed(established_facts).await?;

        let mut conflicts = Vec::new();
        for (new_fact, new_vector) in new_facts.iter().zip(&new_vectors) {
            for (established, established_vector) in
                established_facts.iter().zip(&established_vectors)
            {
                let similarity = cosine_similarity(new_vector, established_vector);
                if f64::from(similarity) < self.conflict_threshold {
                    continue;
                }
                if let Some(pattern) = contradiction_pattern(new_fact, established) {
                    conflicts.push(SemanticConflict {
                        new_fact: new_fact.clone(),
                        established_fact: established.clone(),
                        similarity,
                        pattern: Some(pattern),
                    });
                }
            }
        }
        Ok(conflicts)
    }
}
