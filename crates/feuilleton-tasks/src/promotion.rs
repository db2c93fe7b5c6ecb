//! Fact promotion: recurring continuity facts graduate into the story bible.
//!
//! Counts trait/motivation occurrences per character, rule occurrences per
//! location, and recurring event impacts; any value with frequency at or
//! above the threshold is inserted into the matching bible section with a
//! confidence score. Promotion only: demotion when frequencies drop is
//! intentionally not performed, but promoted entries keep their provenance
//! so a later pass can find them.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use feuilleton::error::Result;
use feuilleton::stores::{update_project_metadata_unchecked, ProjectRepository};
use feuilleton::types::{Continuity, PromotedFact, StoryBible};

const PROMOTION_SOURCE: &str = "fact_promotion";

#[derive(Debug, Clone, Default, Serialize)]
pub struct PromotionReport {
    pub character_traits: usize,
    pub location_rules: usize,
    pub world_rules: usize,
}

impl PromotionReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.character_traits + self.location_rules + self.world_rules
    }
}

fn count_occurrences<'a>(values: impl Iterator<Item = &'a str>) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for value in values {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        *counts.entry(value.to_string()).or_insert(0) += 1;
    }
    counts
}

fn confidence(frequency: u32, threshold: u32) -> f64 {
    (f64::from(frequency) / f64::from(threshold.max(1)) / 2.0).min(0.99)
}

fn promote(
    bible: &mut StoryBible,
    section: &str,
    key: &str,
    value: &str,
    frequency: u32,
    threshold: u32,
) -> bool {
    let already = bible
        .promoted
        .iter()
        .any(|fact| fact.section == section && fact.key == key && fact.value == value);
    if already {
        return false;
    }
    match section {
        "character_traits" => {
            let traits = bible.character_traits.entry(key.to_string()).or_default();
            if !traits.iter().any(|existing| existing == value) {
                traits.push(value.to_string());
            }
        }
        "location_rules" => {
            let rules = bible.location_rules.entry(key.to_string()).or_default();
            if !rules.iter().any(|existing| existing == value) {
                rules.push(value.to_string());
            }
        }
        _ => {
            if !bible.world_rules.iter().any(|existing| existing == value) {
                bible.world_rules.push(value.to_string());
            }
        }
    }
    bible.promoted.push(PromotedFact {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        frequency,
        confidence: confidence(frequency, threshold),
        source: PROMOTION_SOURCE.to_string(),
        added_at: Utc::now(),
    });
    true
}

/// Apply promotion rules to a bible in place; returns what was added.
pub fn promote_recurring_facts(
    continuity: &Continuity,
    bible: &mut StoryBible,
    threshold: u32,
) -> PromotionReport {
    let mut report = PromotionReport::default();

    for character in &continuity.characters {
        let counted = count_occurrences(
            character
                .traits
                .iter()
                .map(String::as_str)
                .chain(
                    character
                        .motivations
                        .iter()
                        .map(String::as_str),
                ),
        );
        for (value, frequency) in counted {
            if frequency >= threshold
                && promote(
                    bible,
                    "character_traits",
                    &character.name,
                    &value,
                    frequency,
                    threshold,
                )
            {
                report.character_traits += 1;
            }
        }
    }

    for location in &continuity.locations {
        let counted = count_occurrences(location.rules.iter().map(String::as_str));
        for (value, frequency) in counted {
            if frequency >= threshold
                && promote(
                    bible,
                    "location_rules",
                    &location.name,
                    &value,
                    frequency,
                    threshold,
                )
            {
                report.location_rules += 1;
            }
        }
    }

    // Recurring event impacts hint at world rules.
    let impacts = count_occurrences(
        continuity
            .events
            .iter()
            .map(|event| event.impact.as_str())
            .filter(|impact| impact.len() > 20),
    );
    for (value, frequency) in impacts {
        if frequency >= threshold && promote(bible, "world_rules", "", &value, frequency, threshold)
        {
            report.world_rules += 1;
        }
    }

    report
}

/// Scheduled entry point: promote for one project and persist.
pub async fn promote_facts_to_bible(
    projects: &dyn ProjectRepository,
    project_id: Uuid,
    threshold: u32,
) -> Result<PromotionReport> {
    let project = projects.get_unchecked(project_id).await?;
    let mut bible = project.metadata.story_bible.clone();
    let report = promote_recurring_facts(&project.metadata.continuity, &mut bible, threshold);
    if report.total() > 0 {
        update_project_metadata_unchecked(projects, project_id, |metadata| {
            metadata.story_bible = bible.clone();
        })
        .await?;
        tracing::info!(%project_id, promoted = report.total(), "facts promoted to bible");
    }
    Ok(report)
}
