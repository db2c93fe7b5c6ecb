//! LLM fact extraction.
//!
//! Long chapters are split into head+tail chunks extracted independently and
//! merged, so the prompt never exceeds the extraction budget. The prompt
//! demands strict JSON; missing fields are coerced to empty values.

use feuilleton::error::Result;
use feuilleton::llm::{chat_json, ChatClient, ChatMessage, ChatRequest};
use feuilleton::types::ContinuityFacts;

use crate::merge::merge_fact_payloads;

/// Chapters above this size are extracted in two chunks.
const EXTRACTION_CHUNK_CHARS: usize = 10_000;

pub(crate) fn select_extraction_chunks(chapter_text: &str, max_chars: usize) -> Vec<&str> {
    let total = chapter_text.chars().count();
    if total <= max_chars {
        return vec![chapter_text];
    }
    let head = feuilleton::text::truncate_chars(chapter_text, max_chars / 2);
    let tail = feuilleton::text::tail_chars(chapter_text, max_chars / 2);
    vec![head, tail]
}

fn extraction_prompt(chapter_text: &str) -> String {
    format!(
        "Analyse ce chapitre et extrais les faits de continuite. \
         Retourne un JSON strict avec les cles: summary (2-3 phrases), \
         characters (name, role, status, current_state, motivations, traits, goals, \
         arc_stage, last_seen_chapter), \
         locations (name, description, rules, timeline_markers, atmosphere, \
         last_mentioned_chapter), \
         relations (from, to, type, detail, start_chapter, current_state), \
         events (name, summary, chapter_index, time_reference, impact, unresolved_threads), \
         objects (name, description, status, current_holder, location, magical_properties), \
         character_locations (character_name, location, chapter_index, travel_from, \
         travel_to, arrival_confirmed). \
         Les listes absentes doivent etre des listes vides. \
         Retourne uniquement le JSON.\n\nTexte du chapitre:\n{chapter_text}"
    )
}

fn coerce_facts(value: serde_json::Value) -> ContinuityFacts {
    // Entries that fail schema validation are dropped rather than failing
    // the whole payload (unknown keys are ignored by serde).
    let mut facts = ContinuityFacts::default();
    if let Some(summary) = value.get("summary").and_then(|v| v.as_str()) {
        facts.summary = summary.trim().to_string();
    }
    macro_rules! coerce_list {
        ($field:ident, $key:literal) => {
            if let Some(items) = value.get($key).and_then(|v| v.as_array()) {
                for item in items {
                    if let Ok(parsed) = serde_json::from_value(item.clone()) {
                        facts.$field.push(parsed);
                    }
                }
            }
        };
    }
    coerce_list!(characters, "characters");
    coerce_list!(locations, "locations");
    coerce_list!(relations, "relations");
    coerce_list!(events, "events");
    coerce_list!(objects, "objects");
    coerce_list!(character_locations, "character_locations");
    facts.characters.retain(|c| !c.name.trim().is_empty());
    facts.locations.retain(|l| !l.name.trim().is_empty());
    facts
        .relations
        .retain(|r| !r.from.trim().is_empty() && !r.to.trim().is_empty());
    facts.events.retain(|e| !e.name.trim().is_empty());
    facts.objects.retain(|o| !o.name.trim().is_empty());
    facts
        .character_locations
        .retain(|cl| !cl.character_name.trim().is_empty() && !cl.location.trim().is_empty());
    facts
}

async fn extract_chunk(llm: &dyn ChatClient, chunk: &str) -> Result<ContinuityFacts> {
    let request = ChatRequest::new(vec![ChatMessage::user(extraction_prompt(chunk))])
        .with_temperature(0.2)
        .with_max_tokens(1500);
    match chat_json(llm, request).await {
        Ok(value) => Ok(coerce_facts(value)),
        Err(err) if matches!(err, feuilleton::error::Error::LlmBadFormat(_)) => {
            // Downgrade: the chapter still gets approved, just without new
            // facts from this chunk.
            tracing::warn!(error = %err, "fact extraction payload unusable, skipping chunk");
            Ok(ContinuityFacts::default())
        }
        Err(err) => Err(err),
    }
}

/// Extract continuity facts from the full chapter text.
pub async fn extract_facts(llm: &dyn ChatClient, chapter_text: &str) -> Result<ContinuityFacts> {
    if chapter_text.trim().is_empty() {
        return Ok(ContinuityFacts::default());
    }
    let chunks = select_extraction_chunks(chapter_text, EXTRACTION_CHUNK_CHARS);
    let mut merged = ContinuityFacts::default();
    for chunk in chunks {
        let chunk_facts = extract_chunk(llm, chunk).await?;
        merged = merge_fact_payloads(merged, chunk_facts, None);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use feuilleton::llm::ScriptedChatClient;

    #[test]
    fn short_text_is_one_chunk_long_text_is_head_and_tail() {
        assert_eq!(select_extraction_chunks("court", 100).len(), 1);
        let long = "x".repeat(250);
        let chunks = select_extraction_chunks(&long, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 50);
        assert_eq!(chunks[1].len(), 50);
    }

    #[tokio::test]
    async fn malformed_entries_are_dropped_not_fatal() {
        let payload = r#"{
            "summary": "Marie trouve la lettre.",
            "characters": [
                {"name": "Marie", "status": "alive"},
                {"status": "no-name-here"},
                42
            ],
            "events": [{"name": "la lettre", "unresolved_threads": ["qui l'a ecrite"]}]
        }"#;
        let client = ScriptedChatClient::new(vec![payload.to_string()]);
        let facts = extract_facts(&client, "Marie ouvrit le tiroir.").await.unwrap();
        assert_eq!(facts.summary, "Marie trouve la lettre.");
        assert_eq!(facts.characters.len(), 1);
        assert_eq!(facts.characters[0].name, "Marie");
        assert!(facts.events[0].unresolved());
    }

    #[tokio::test]
    async fn empty_text_skips_the_llm() {
        let client = ScriptedChatClient::new(vec![]);
        let facts = extract_facts(&client, "   ").await.unwrap();
        assert!(facts.is_empty());
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn double_bad_payload_degrades_to_empty() {
        let client = ScriptedChatClient::new(vec![
            "pas de json".to_string(),
            "encore rien".to_string(),
        ]);
        let facts = extract_facts(&client, "Texte.").await.unwrap();
        assert!(facts.is_empty());
    }
}
