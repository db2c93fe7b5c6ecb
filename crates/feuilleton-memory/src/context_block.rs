//! Plain-text continuity block for prompts.

use feuilleton::types::{
    CharacterFact, Continuity, EventFact, LocationFact, RelationFact,
};

fn format_list(values: &[String]) -> String {
    if values.is_empty() {
        "none".to_string()
    } else {
        values.join(", ")
    }
}

fn or_unknown(value: &str) -> &str {
    if value.is_empty() {
        "unknown"
    } else {
        value
    }
}

fn format_character(character: &CharacterFact) -> String {
    format!(
        "- {} | role: {} | status: {} | etat: {} | motivations: {}",
        character.name,
        or_unknown(&character.role),
        or_unknown(&character.status),
        or_unknown(&character.current_state),
        format_list(&character.motivations)
    )
}

fn format_location(location: &LocationFact) -> String {
    format!(
        "- {} | {} | regles: {}",
        location.name,
        or_unknown(&location.description),
        format_list(&location.rules)
    )
}

fn format_relation(relation: &RelationFact) -> String {
    format!(
        "- {} -[{}]-> {} | {}",
        relation.from,
        or_unknown(&relation.kind),
        relation.to,
        or_unknown(&relation.current_state)
    )
}

fn format_event(event: &EventFact) -> String {
    format!(
        "- {} (ch.{}) | {} | fils ouverts: {}",
        event.name,
        event
            .chapter_index
            .map_or_else(|| "?".to_string(), |index| index.to_string()),
        or_unknown(&event.summary),
        format_list(&event.unresolved_threads)
    )
}

const COHERENCE_PADDING: &str = "Notes de coherence: garder les personnages fideles a leurs \
motivations etablies, respecter la chronologie des evenements precedents, ne pas reintroduire \
d'objets perdus ou detruits, et maintenir le ton du recit d'un chapitre a l'autre.";

/// Multi-section plain-text block. Blocks under 200 words get a fixed
/// coherence-notes padding so downstream prompts always have a substantive
/// reference.
#[must_use]
pub fn build_context_block(continuity: &Continuity) -> String {
    let mut lines: Vec<String> = vec!["CONTINUITY FACTS:".to_string(), String::new()];

    lines.push("Characters:".to_string());
    if continuity.characters.is_empty() {
        lines.push("- none".to_string());
    } else {
        lines.extend(continuity.characters.iter().map(format_character));
    }

    lines.push(String::new());
    lines.push("Locations:".to_string());
    if continuity.locations.is_empty() {
        lines.push("- none".to_string());
    } else {
        lines.extend(continuity.locations.iter().map(format_location));
    }

    lines.push(String::new());
    lines.push("Relations:".to_string());
    if continuity.relations.is_empty() {
        lines.push("- none".to_string());
    } else {
        lines.extend(continuity.relations.iter().map(format_relation));
    }

    lines.push(String::new());
    lines.push("Events:".to_string());
    if continuity.events.is_empty() {
        lines.push("- none".to_string());
    } else {
        lines.extend(continuity.events.iter().map(format_event));
    }

    let block = lines.join("\n").trim().to_string();
    if feuilleton::text::word_count(&block) < 200 {
        format!("{block}\n\n{COHERENCE_PADDING}")
    } else {
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_continuity_still_yields_all_sections_and_padding() {
        let block = build_context_block(&Continuity::default());
        for section in ["Characters:", "Locations:", "Relations:", "Events:"] {
            assert!(block.contains(section));
        }
        assert!(block.contains("Notes de coherence"));
    }

    #[test]
    fn character_names_survive_the_round_trip() {
        let continuity = Continuity {
            characters: vec![CharacterFact {
                name: "Marie".to_string(),
                status: "alive".to_string(),
                last_seen_chapter: Some(4),
                ..Default::default()
            }],
            ..Default::default()
        };
        let block = build_context_block(&continuity);
        assert!(block.contains("- Marie |"));
        assert!(block.contains("status: alive"));
    }
}
