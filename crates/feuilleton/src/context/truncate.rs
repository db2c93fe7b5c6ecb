//! Priority-weighted truncation of the continuity memory block.
//!
//! Sections are emitted in a fixed order; budgets cascade so the most
//! relevant material survives when the block must shrink:
//!
//! 1. characters known to appear in the upcoming chapter,
//! 2. events from the last 5 chapters,
//! 3. active relations,
//! 4. unresolved plot threads.

use crate::types::Continuity;

pub struct SmartContextTruncator;

impl SmartContextTruncator {
    /// Compose the memory block within `max_chars`.
    #[must_use]
    pub fn truncate_memory_context(
        memory: &Continuity,
        max_chars: usize,
        current_chapter: u32,
        mentioned_characters: Option<&[String]>,
    ) -> String {
        let mut sections: Vec<(&str, String)> = Vec::new();
        let mut remaining = max_chars;

        if let Some(mentioned) = mentioned_characters {
            let priority: Vec<_> = memory
                .characters
                .iter()
                .filter(|character| mentioned.iter().any(|name| name == &character.name))
                .collect();
            let block = format_characters(&priority);
            if !block.is_empty() {
                remaining = remaining.saturating_sub(block.len());
                sections.push(("PERSONNAGES PRESENTS", block));
            }
        }

        let cutoff = current_chapter.saturating_sub(5);
        let recent: Vec<_> = memory
            .events
            .iter()
            .filter(|event| event.chapter_index.unwrap_or(0) >= cutoff)
            .collect();
        let events_block = format_events(&recent);
        if !events_block.is_empty() {
            let budget = (remaining / 3).max(500);
            let block = crate::text::truncate_chars(&events_block, budget).to_string();
            remaining = remaining.saturating_sub(block.len());
            sections.push(("EVENEMENTS RECENTS", block));
        }

        let relations_block: String = memory
            .relations
            .iter()
            .map(|relation| {
                format!(
                    "- {} -> {}: {}",
                    relation.from, relation.to, relation.kind
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        if !relations_block.is_empty() {
            let budget = (remaining / 4).max(500);
            let block = crate::text::truncate_chars(&relations_block, budget).to_string();
            remaining = remaining.saturating_sub(block.len());
            sections.push(("RELATIONS", block));
        }

        let unresolved_block: String = memory
            .events
            .iter()
            .filter(|event| event.unresolved())
            .flat_map(|event| {
                event.unresolved_threads.iter().map(move |thread| {
                    format!(
                        "- {thread} (depuis ch.{})",
                        event
                            .chapter_index
                            .map_or_else(|| "?".to_string(), |index| index.to_string())
                    )
                })
            })
            .collect::<Vec<_>>()
            .join("\n");
        if !unresolved_block.is_empty() {
            let budget = remaining.min(500);
            let block = crate::text::truncate_chars(&unresolved_block, budget).to_string();
            if !block.is_empty() {
                sections.push(("FILS NARRATIFS OUVERTS", block));
            }
        }

        build_output(&sections, max_chars)
    }
}

fn format_characters(characters: &[&crate::types::CharacterFact]) -> String {
    characters
        .iter()
        .map(|character| {
            let state = if character.current_state.is_empty() {
                "inconnu"
            } else {
                &character.current_state
            };
            let mut line = format!("- {}: {state}", character.name);
            if !character.motivations.is_empty() {
                line.push_str(&format!(" | Motivation: {}", character.motivations.join(", ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_events(events: &[&crate::types::EventFact]) -> String {
    events
        .iter()
        .map(|event| {
            let label = if event.summary.is_empty() {
                &event.name
            } else {
                &event.summary
            };
            format!(
                "- Ch.{}: {label}",
                event
                    .chapter_index
                    .map_or_else(|| "?".to_string(), |index| index.to_string())
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Emit sections until the budget runs out; the last section that does not
/// fit is truncated with an ellipsis and closes the block.
fn build_output(sections: &[(&str, String)], max_chars: usize) -> String {
    let mut output: Vec<String> = Vec::new();
    let mut remaining = max_chars;
    for (title, content) in sections {
        if content.is_empty() || remaining == 0 {
            continue;
        }
        let section_text = format!("### {title}\n{content}\n");
        if section_text.len() <= remaining {
            remaining -= section_text.len();
            output.push(section_text);
        } else {
            if remaining > 3 {
                // Byte budget, cut on a char boundary.
                let mut end = remaining - 3;
                while end > 0 && !section_text.is_char_boundary(end) {
                    end -= 1;
                }
                let mut truncated = section_text[..end].to_string();
                truncated.push_str("...");
                output.push(truncated);
            }
            break;
        }
    }
    output.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CharacterFact, EventFact, RelationFact};

    fn sample_memory() -> Continuity {
        Continuity {
            characters: vec![CharacterFact {
                name: "Marie".to_string(),
                current_state: "en fuite".to_string(),
                motivations: vec!["retrouver sa soeur".to_string()],
                ..Default::default()
            }],
            relations: vec![RelationFact {
                from: "Marie".to_string(),
                to: "Luc".to_string(),
                kind: "alliee".to_string(),
                ..Default::default()
            }],
            events: vec![
                EventFact {
                    name: "l'incendie".to_string(),
                    summary: "l'incendie du manoir".to_string(),
                    chapter_index: Some(8),
                    unresolved_threads: vec!["qui a mis le feu".to_string()],
                    ..Default::default()
                },
                EventFact {
                    name: "vieille dette".to_string(),
                    chapter_index: Some(1),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn block_never_exceeds_budget() {
        let memory = sample_memory();
        for budget in [50usize, 200, 1000, 4000] {
            let block = SmartContextTruncator::truncate_memory_context(
                &memory,
                budget,
                9,
                Some(&["Marie".to_string()]),
            );
            assert!(block.len() <= budget, "budget {budget} exceeded: {}", block.len());
        }
    }

    #[test]
    fn sections_keep_fixed_order() {
        let memory = sample_memory();
        let block = SmartContextTruncator::truncate_memory_context(
            &memory,
            4000,
            9,
            Some(&["Marie".to_string()]),
        );
        let characters = block.find("PERSONNAGES PRESENTS").unwrap();
        let events = block.find("EVENEMENTS RECENTS").unwrap();
        let relations = block.find("RELATIONS").unwrap();
        let threads = block.find("FILS NARRATIFS OUVERTS").unwrap();
        assert!(characters < events && events < relations && relations < threads);
    }

    #[test]
    fn old_events_are_filtered() {
        let memory = sample_memory();
        let block = SmartContextTruncator::truncate_memory_context(&memory, 4000, 9, None);
        assert!(block.contains("l'incendie du manoir"));
        assert!(!block.contains("vieille dette"));
    }

    #[test]
    fn later_sections_see_a_shrinking_budget() {
        // A budget the earlier sections exhaust leaves nothing for the
        // trailing unresolved-threads section.
        let memory = sample_memory();
        let block = SmartContextTruncator::truncate_memory_context(&memory, 60, 9, None);
        assert!(block.len() <= 60);
        assert!(!block.contains("FILS NARRATIFS OUVERTS"));
    }

    #[test]
    fn unresolved_threads_cite_their_chapter() {
        let memory = sample_memory();
        let block = SmartContextTruncator::truncate_memory_context(&memory, 4000, 9, None);
        assert!(block.contains("qui a mis le feu (depuis ch.8)"));
    }
}
