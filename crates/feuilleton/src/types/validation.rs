//! Validation payloads shared between the pipeline, the coherence
//! specialists, and the continuity graph.

use serde::{Deserialize, Serialize};

use super::contradiction::Severity;

/// A single detected issue, normalized across sources (analyst, graph,
/// plot-point validation).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub suggested_fix: String,
    #[serde(default)]
    pub previous_state: String,
    #[serde(default)]
    pub current_state: String,
}

impl ValidationIssue {
    #[must_use]
    pub fn new(kind: impl Into<String>, detail: impl Into<String>, severity: Severity) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.into(),
            severity: if severity == Severity::Critical {
                "blocking".to_string()
            } else {
                severity.as_str().to_string()
            },
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.severity == "blocking"
    }
}

/// Issue raised by the structured continuity graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphIssue {
    #[serde(rename = "type")]
    pub kind: String,
    pub detail: String,
    pub severity: Severity,
    #[serde(default)]
    pub source: String,
}

/// Plot-point coverage report for one chapter draft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlotPointValidation {
    #[serde(default)]
    pub covered_points: Vec<String>,
    #[serde(default)]
    pub missing_points: Vec<String>,
    #[serde(default)]
    pub forbidden_violations: Vec<String>,
    #[serde(default)]
    pub coverage_score: f64,
    #[serde(default)]
    pub explanation: String,
}

impl PlotPointValidation {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing_points.is_empty() && self.forbidden_violations.is_empty()
    }
}

/// Raw output of the LLM consistency analyst, before fusion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContinuityAnalysis {
    #[serde(default)]
    pub contradictions: Vec<AnalysisContradiction>,
    #[serde(default)]
    pub timeline_issues: Vec<AnalysisTimelineIssue>,
    #[serde(default)]
    pub character_inconsistencies: Vec<AnalysisCharacterIssue>,
    #[serde(default)]
    pub world_rule_violations: Vec<AnalysisRuleViolation>,
    #[serde(default)]
    pub overall_coherence_score: Option<f64>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub blocking_issues: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisContradiction {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub suggested_fix: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisTimelineIssue {
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub suggested_fix: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisCharacterIssue {
    #[serde(default)]
    pub character: String,
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub previous_state: String,
    #[serde(default)]
    pub current_state: String,
    #[serde(default)]
    pub suggested_fix: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisRuleViolation {
    #[serde(default)]
    pub rule: String,
    #[serde(default)]
    pub violation: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub suggested_fix: String,
}

/// Fused continuity validation for one draft: analyst + graph + plot points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuityValidation {
    #[serde(default)]
    pub severe_issues: Vec<ValidationIssue>,
    #[serde(default)]
    pub minor_issues: Vec<ValidationIssue>,
    #[serde(default)]
    pub graph_issues: Vec<GraphIssue>,
    #[serde(default)]
    pub coherence_score: f64,
    #[serde(default)]
    pub blocking: bool,
    #[serde(default)]
    pub blocking_issues: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub plot_point_validation: PlotPointValidation,
}

impl ContinuityValidation {
    /// Drop every issue whose detail matches a suppressed description, and
    /// clear `blocking` when nothing blocking remains.
    pub fn filter_suppressed(&mut self, suppressed: &[String]) {
        if suppressed.is_empty() {
            return;
        }
        let keep = |detail: &str| !suppressed.iter().any(|desc| desc == detail);
        self.severe_issues.retain(|issue| keep(&issue.detail));
        self.minor_issues.retain(|issue| keep(&issue.detail));
        self.graph_issues.retain(|issue| keep(&issue.detail));
        if self.blocking
            && self.severe_issues.is_empty()
            && self.plot_point_validation.is_clean()
        {
            self.blocking = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_suppressed_clears_blocking() {
        let mut validation = ContinuityValidation {
            severe_issues: vec![ValidationIssue::new(
                "graph_contradiction",
                "Bob: resurrection entre ch.3 et ch.5",
                Severity::Critical,
            )],
            blocking: true,
            ..Default::default()
        };
        validation.filter_suppressed(&["Bob: resurrection entre ch.3 et ch.5".to_string()]);
        assert!(validation.severe_issues.is_empty());
        assert!(!validation.blocking);
    }

    #[test]
    fn filter_keeps_unrelated_issues() {
        let mut validation = ContinuityValidation {
            severe_issues: vec![
                ValidationIssue::new("timeline", "hier/demain incoherent", Severity::High),
            ],
            blocking: true,
            ..Default::default()
        };
        validation.filter_suppressed(&["autre chose".to_string()]);
        assert_eq!(validation.severe_issues.len(), 1);
        assert!(validation.blocking);
    }
}
