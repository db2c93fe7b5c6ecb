//! Tracked contradictions: detected inconsistencies that were acknowledged,
//! resolved, or declared intentional.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Severity {
    /// Lenient parse for LLM-produced severity strings.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "critical" | "critique" | "blocking" => Severity::Critical,
            "high" | "haute" => Severity::High,
            "low" | "basse" | "faible" => Severity::Low,
            _ => Severity::Medium,
        }
    }

    #[must_use]
    pub fn is_severe(self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContradictionStatus {
    #[default]
    Pending,
    Resolved,
    Intentional,
}

/// Once `resolved` or `intentional`, the same description is filtered from
/// every future validation output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedContradiction {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub detected_in_chapter: Option<u32>,
    pub detected_at: DateTime<Utc>,
    pub status: ContradictionStatus,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub affected_chapters: Vec<u32>,
    #[serde(default)]
    pub auto_detected: bool,
}

impl TrackedContradiction {
    #[must_use]
    pub fn auto(
        kind: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
        chapter_index: Option<u32>,
    ) -> Self {
        let mut affected_chapters = Vec::new();
        if let Some(index) = chapter_index {
            affected_chapters.push(index);
        }
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            severity,
            description: description.into(),
            detected_in_chapter: chapter_index,
            detected_at: Utc::now(),
            status: ContradictionStatus::Pending,
            resolution: None,
            affected_chapters,
            auto_detected: true,
        }
    }

    /// Whether issues matching this description must be suppressed.
    #[must_use]
    pub fn suppresses(&self) -> bool {
        matches!(
            self.status,
            ContradictionStatus::Resolved | ContradictionStatus::Intentional
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_parse_is_lenient() {
        assert_eq!(Severity::parse("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::parse("critique"), Severity::Critical);
        assert_eq!(Severity::parse("weird"), Severity::Medium);
        assert_eq!(Severity::parse("low"), Severity::Low);
    }

    #[test]
    fn resolved_and_intentional_suppress() {
        let mut contradiction =
            TrackedContradiction::auto("graph_contradiction", Severity::Critical, "Bob", Some(3));
        assert!(!contradiction.suppresses());
        contradiction.status = ContradictionStatus::Intentional;
        assert!(contradiction.suppresses());
        contradiction.status = ContradictionStatus::Resolved;
        assert!(contradiction.suppresses());
    }
}
