//! Story bible: long-lived canonical rules and facts of the fictional world.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pre-declared exception to contradiction detection, e.g. a character who
/// is secretly alive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentionalMystery {
    pub description: String,
    #[serde(default)]
    pub characters: Vec<String>,
}

impl IntentionalMystery {
    /// Whether a detected issue is covered by this mystery: its description
    /// substring-matches, or one of its characters is named in the issue.
    #[must_use]
    pub fn covers(&self, issue_detail: &str) -> bool {
        let detail = issue_detail.to_lowercase();
        if !self.description.is_empty() {
            let description = self.description.to_lowercase();
            if detail.contains(&description) || description.contains(&detail) {
                return true;
            }
        }
        self.characters
            .iter()
            .any(|name| detail.contains(&name.to_lowercase()))
    }
}

/// An entry promoted from recurring continuity facts by the maintenance job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotedFact {
    pub section: String,
    pub key: String,
    pub value: String,
    pub frequency: u32,
    pub confidence: f64,
    pub source: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryBible {
    #[serde(default)]
    pub world_rules: Vec<String>,
    #[serde(default)]
    pub timeline: Vec<String>,
    #[serde(default)]
    pub glossary: BTreeMap<String, String>,
    #[serde(default)]
    pub established_facts: Vec<String>,
    #[serde(default)]
    pub character_traits: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub location_rules: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub intentional_mysteries: Vec<IntentionalMystery>,
    /// Audit trail of fact-promotion inserts.
    #[serde(default)]
    pub promoted: Vec<PromotedFact>,
}

impl StoryBible {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.world_rules.is_empty()
            && self.timeline.is_empty()
            && self.glossary.is_empty()
            && self.established_facts.is_empty()
            && self.character_traits.is_empty()
            && self.location_rules.is_empty()
    }

    /// Whether any intentional mystery covers the issue.
    #[must_use]
    pub fn mystery_covers(&self, issue_detail: &str) -> bool {
        self.intentional_mysteries
            .iter()
            .any(|mystery| mystery.covers(issue_detail))
    }

    /// Multi-section plain-text rendering for prompts. Empty sections are
    /// omitted.
    #[must_use]
    pub fn context_block(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        if !self.world_rules.is_empty() {
            lines.push("Regles du monde:".to_string());
            lines.extend(self.world_rules.iter().map(|rule| format!("- {rule}")));
        }
        if !self.timeline.is_empty() {
            lines.push("Chronologie:".to_string());
            lines.extend(self.timeline.iter().map(|entry| format!("- {entry}")));
        }
        if !self.established_facts.is_empty() {
            lines.push("Faits etablis:".to_string());
            lines.extend(self.established_facts.iter().map(|fact| format!("- {fact}")));
        }
        for (name, traits) in &self.character_traits {
            if !traits.is_empty() {
                lines.push(format!("{name}: {}", traits.join(", ")));
            }
        }
        for (name, rules) in &self.location_rules {
            if !rules.is_empty() {
                lines.push(format!("{name}: {}", rules.join(", ")));
            }
        }
        if !self.glossary.is_empty() {
            lines.push("Glossaire:".to_string());
            lines.extend(
                self.glossary
                    .iter()
                    .map(|(term, definition)| format!("- {term}: {definition}")),
            );
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mystery_matches_by_character_name() {
        let mystery = IntentionalMystery {
            description: "La mort de Bob est une mise en scene".to_string(),
            characters: vec!["Bob".to_string()],
        };
        assert!(mystery.covers("Bob: resurrection entre ch.3 et ch.5"));
        assert!(!mystery.covers("Alice change de motivation sans raison"));
    }

    #[test]
    fn context_block_skips_empty_sections() {
        let bible = StoryBible {
            world_rules: vec!["La magie draine la memoire".to_string()],
            ..Default::default()
        };
        let block = bible.context_block();
        assert!(block.contains("Regles du monde:"));
        assert!(!block.contains("Chronologie:"));
    }
}
