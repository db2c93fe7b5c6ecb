//! Deterministic fact merging.
//!
//! Invariants: keyed upserts (name for characters/locations/events,
//! `(from, to, type)` for relations); list unions deduplicate by lower-cased
//! trimmed value preserving insertion order; scalar changes to tracked
//! fields append to a history list; `last_seen`/`last_mentioned` take the
//! max, `start_chapter` the min. Applying the same facts twice leaves the
//! continuity unchanged.

use chrono::Utc;
use feuilleton::text::dedup_preserving_order;
use feuilleton::types::{
    CharacterFact, Continuity, ContinuityFacts, EventFact, HistoryEntry, LocationFact,
    RelationFact,
};

fn merge_numeric_max(current: Option<u32>, incoming: Option<u32>) -> Option<u32> {
    match (current, incoming) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => b.or(a),
    }
}

fn merge_numeric_min(current: Option<u32>, incoming: Option<u32>) -> Option<u32> {
    match (current, incoming) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => b.or(a),
    }
}

fn merge_scalar(current: &str, incoming: &str) -> String {
    if incoming.trim().is_empty() {
        current.to_string()
    } else {
        incoming.to_string()
    }
}

/// Append to a history list when a tracked scalar actually changes.
fn track_history(
    history: &mut Vec<HistoryEntry>,
    previous: &str,
    incoming: &str,
    chapter_index: Option<u32>,
) {
    let incoming = incoming.trim();
    if incoming.is_empty() || incoming == previous {
        return;
    }
    history.push(HistoryEntry {
        value: incoming.to_string(),
        chapter_index,
        timestamp: Utc::now(),
    });
}

fn merge_character(current: &mut CharacterFact, incoming: &CharacterFact) {
    let previous_status = current.status.clone();
    let chapter = merge_numeric_max(current.last_seen_chapter, incoming.last_seen_chapter)
        .or(incoming.last_seen_chapter);

    current.role = merge_scalar(&current.role, &incoming.role);
    current.current_state = merge_scalar(&current.current_state, &incoming.current_state);
    current.arc_stage = merge_scalar(&current.arc_stage, &incoming.arc_stage);
    current.motivations = dedup_preserving_order(
        current
            .motivations
            .iter()
            .chain(&incoming.motivations)
            .cloned(),
    );
    current.traits =
        dedup_preserving_order(current.traits.iter().chain(&incoming.traits).cloned());
    current.goals = dedup_preserving_order(current.goals.iter().chain(&incoming.goals).cloned());
    current.first_appearance =
        merge_numeric_min(current.first_appearance, incoming.first_appearance);
    current.last_seen_chapter = chapter;

    track_history(
        &mut current.status_history,
        &previous_status,
        &incoming.status,
        incoming.last_seen_chapter,
    );
    current.status = merge_scalar(&current.status, &incoming.status);
}

fn merge_location(current: &mut LocationFact, incoming: &LocationFact) {
    current.description = merge_scalar(&current.description, &incoming.description);
    current.atmosphere = merge_scalar(&current.atmosphere, &incoming.atmosphere);
    current.rules = dedup_preserving_order(current.rules.iter().chain(&incoming.rules).cloned());
    current.timeline_markers = dedup_preserving_order(
        current
            .timeline_markers
            .iter()
            .chain(&incoming.timeline_markers)
            .cloned(),
    );
    current.last_mentioned_chapter = merge_numeric_max(
        current.last_mentioned_chapter,
        incoming.last_mentioned_chapter,
    );
}

fn merge_event(current: &mut EventFact, incoming: &EventFact) {
    current.summary = merge_scalar(&current.summary, &incoming.summary);
    current.time_reference = merge_scalar(&current.time_reference, &incoming.time_reference);
    current.impact = merge_scalar(&current.impact, &incoming.impact);
    current.unresolved_threads = dedup_preserving_order(
        current
            .unresolved_threads
            .iter()
            .chain(&incoming.unresolved_threads)
            .cloned(),
    );
    current.chapter_index = merge_numeric_max(current.chapter_index, incoming.chapter_index);
}

fn merge_relation(current: &mut RelationFact, incoming: &RelationFact) {
    let previous_state = current.current_state.clone();
    current.detail = merge_scalar(&current.detail, &incoming.detail);
    current.start_chapter = merge_numeric_min(current.start_chapter, incoming.start_chapter);
    track_history(
        &mut current.evolution_history,
        &previous_state,
        &incoming.current_state,
        incoming.start_chapter,
    );
    current.current_state = merge_scalar(&current.current_state, &incoming.current_state);
}

fn upsert_by_key<T, K, M>(existing: &mut Vec<T>, incoming: &[T], key: K, mut merge: M)
where
    T: Clone,
    K: Fn(&T) -> String,
    M: FnMut(&mut T, &T),
{
    for item in incoming {
        let item_key = key(item);
        if item_key.trim().is_empty() {
            continue;
        }
        match existing.iter_mut().find(|entry| key(entry) == item_key) {
            Some(entry) => merge(entry, item),
            None => existing.push(item.clone()),
        }
    }
}

/// Merge extracted facts into the project continuity in place.
pub fn merge_facts(continuity: &mut Continuity, facts: &ContinuityFacts) {
    upsert_by_key(
        &mut continuity.characters,
        &facts.characters,
        |character: &CharacterFact| character.name.clone(),
        merge_character,
    );
    upsert_by_key(
        &mut continuity.locations,
        &facts.locations,
        |location: &LocationFact| location.name.clone(),
        merge_location,
    );
    upsert_by_key(
        &mut continuity.relations,
        &facts.relations,
        RelationFact::key,
        merge_relation,
    );
    upsert_by_key(
        &mut continuity.events,
        &facts.events,
        |event: &EventFact| event.name.clone(),
        merge_event,
    );
    continuity.updated_at = Some(Utc::now());
}

fn merge_summary(current: &str, incoming: &str) -> String {
    let current = current.trim();
    let incoming = incoming.trim();
    if !current.is_empty() && !incoming.is_empty() && current != incoming {
        format!("{current} / {incoming}")
    } else if incoming.is_empty() {
        current.to_string()
    } else {
        incoming.to_string()
    }
}

/// Merge two per-chapter extraction payloads (head+tail chunks).
#[must_use]
pub fn merge_fact_payloads(
    mut current: ContinuityFacts,
    incoming: ContinuityFacts,
    _chapter_index: Option<u32>,
) -> ContinuityFacts {
    current.summary = merge_summary(&current.summary, &incoming.summary);
    upsert_by_key(
        &mut current.characters,
        &incoming.characters,
        |character: &CharacterFact| character.name.clone(),
        merge_character,
    );
    upsert_by_key(
        &mut current.locations,
        &incoming.locations,
        |location: &LocationFact| location.name.clone(),
        merge_location,
    );
    upsert_by_key(
        &mut current.relations,
        &incoming.relations,
        RelationFact::key,
        merge_relation,
    );
    upsert_by_key(
        &mut current.events,
        &incoming.events,
        |event: &EventFact| event.name.clone(),
        merge_event,
    );
    current.objects.extend(incoming.objects);
    current.character_locations.extend(incoming.character_locations);
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn character(name: &str, status: &str, chapter: Option<u32>) -> CharacterFact {
        CharacterFact {
            name: name.to_string(),
            status: status.to_string(),
            last_seen_chapter: chapter,
            ..Default::default()
        }
    }

    #[test]
    fn status_change_appends_history() {
        let mut continuity = Continuity::default();
        let first = ContinuityFacts {
            characters: vec![character("Bob", "alive", Some(2))],
            ..Default::default()
        };
        merge_facts(&mut continuity, &first);
        assert!(continuity.character("Bob").unwrap().status_history.is_empty() == false);

        let second = ContinuityFacts {
            characters: vec![character("Bob", "dead", Some(5))],
            ..Default::default()
        };
        merge_facts(&mut continuity, &second);
        let bob = continuity.character("Bob").unwrap();
        assert_eq!(bob.status, "dead");
        assert_eq!(bob.last_seen_chapter, Some(5));
        let last = bob.status_history.last().unwrap();
        assert_eq!(last.value, "dead");
        assert_eq!(last.chapter_index, Some(5));
    }

    #[test]
    fn merge_is_idempotent() {
        let facts = ContinuityFacts {
            characters: vec![CharacterFact {
                name: "Marie".to_string(),
                status: "alive".to_string(),
                motivations: vec!["retrouver sa soeur".to_string()],
                last_seen_chapter: Some(4),
                ..Default::default()
            }],
            relations: vec![RelationFact {
                from: "Marie".to_string(),
                to: "Luc".to_string(),
                kind: "alliee".to_string(),
                start_chapter: Some(2),
                ..Default::default()
            }],
            events: vec![EventFact {
                name: "l'incendie".to_string(),
                chapter_index: Some(3),
                ..Default::default()
            }],
            ..Default::default()
        };
        let mut once = Continuity::default();
        merge_facts(&mut once, &facts);
        let mut twice = once.clone();
        merge_facts(&mut twice, &facts);

        // Timestamps differ; compare structure.
        assert_eq!(once.characters.len(), twice.characters.len());
        assert_eq!(
            once.characters[0].status_history.len(),
            twice.characters[0].status_history.len()
        );
        assert_eq!(
            once.characters[0].motivations,
            twice.characters[0].motivations
        );
        assert_eq!(once.relations.len(), twice.relations.len());
        assert_eq!(once.events.len(), twice.events.len());
    }

    #[test]
    fn relations_key_on_from_to_type() {
        let mut continuity = Continuity::default();
        let facts = ContinuityFacts {
            relations: vec![
                RelationFact {
                    from: "A".to_string(),
                    to: "B".to_string(),
                    kind: "ami".to_string(),
                    start_chapter: Some(4),
                    ..Default::default()
                },
                RelationFact {
                    from: "A".to_string(),
                    to: "B".to_string(),
                    kind: "rival".to_string(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        merge_facts(&mut continuity, &facts);
        assert_eq!(continuity.relations.len(), 2);

        // A lower start chapter wins the min.
        let update = ContinuityFacts {
            relations: vec![RelationFact {
                from: "A".to_string(),
                to: "B".to_string(),
                kind: "ami".to_string(),
                start_chapter: Some(2),
                ..Default::default()
            }],
            ..Default::default()
        };
        merge_facts(&mut continuity, &update);
        let ami = continuity
            .relations
            .iter()
            .find(|r| r.kind == "ami")
            .unwrap();
        assert_eq!(ami.start_chapter, Some(2));
    }

    #[test]
    fn list_unions_dedup_case_insensitively() {
        let mut continuity = Continuity::default();
        merge_facts(
            &mut continuity,
            &ContinuityFacts {
                characters: vec![CharacterFact {
                    name: "Marie".to_string(),
                    traits: vec!["Prudente".to_string()],
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        merge_facts(
            &mut continuity,
            &ContinuityFacts {
                characters: vec![CharacterFact {
                    name: "Marie".to_string(),
                    traits: vec!["prudente".to_string(), "loyale".to_string()],
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        assert_eq!(
            continuity.character("Marie").unwrap().traits,
            vec!["Prudente", "loyale"]
        );
    }

    #[test]
    fn payload_merge_concatenates_distinct_summaries() {
        let head = ContinuityFacts {
            summary: "Debut du chapitre.".to_string(),
            ..Default::default()
        };
        let tail = ContinuityFacts {
            summary: "Fin du chapitre.".to_string(),
            ..Default::default()
        };
        let merged = merge_fact_payloads(head, tail, None);
        assert_eq!(merged.summary, "Debut du chapitre. / Fin du chapitre.");
    }
}
