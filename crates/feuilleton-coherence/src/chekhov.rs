//! Chekhov's gun tracking.
//!
//! New guns are extracted per chapter, resolutions are matched fuzzily
//! (≥ 50% word overlap), and unresolved urgent guns raise alerts once they
//! age past the horizon.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use feuilleton::error::Result;
use feuilleton::llm::{chat_json, ChatClient, ChatMessage, ChatRequest};
use feuilleton::types::{ChekhovGun, GunType};

/// Two element descriptions refer to the same thing when they are equal or
/// share at least half of the smaller one's words.
#[must_use]
pub fn elements_match(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let words_a: std::collections::HashSet<&str> = a.split_whitespace().collect();
    let words_b: std::collections::HashSet<&str> = b.split_whitespace().collect();
    let common = words_a.intersection(&words_b).count();
    common * 2 >= words_a.len().min(words_b.len())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GunAlert {
    pub element: String,
    pub element_type: GunType,
    pub expectation: String,
    pub introduced_chapter: u32,
    pub chapters_waiting: u32,
    pub urgency: u8,
    pub severity: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ExtractionPayload {
    #[serde(default)]
    new_guns: Vec<ExtractedGun>,
    #[serde(default)]
    resolved: Vec<ResolvedGun>,
    #[serde(default)]
    hints: Vec<GunHint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ExtractedGun {
    #[serde(default)]
    element: String,
    #[serde(default)]
    element_type: Option<GunType>,
    #[serde(default)]
    expectation: String,
    #[serde(default)]
    urgency: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ResolvedGun {
    #[serde(default)]
    element: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GunHint {
    #[serde(default)]
    for_element: String,
    #[serde(default)]
    hint: String,
}

/// Per-chapter tracking outcome: additions and status updates already
/// applied to the gun list.
#[derive(Debug, Clone, Default)]
pub struct GunUpdate {
    pub new_guns: Vec<ChekhovGun>,
    pub resolved_elements: Vec<String>,
}

pub struct ChekhovTracker {
    llm: Arc<dyn ChatClient>,
}

impl ChekhovTracker {
    #[must_use]
    pub fn new(llm: Arc<dyn ChatClient>) -> Self {
        Self { llm }
    }

    fn summarize_existing(guns: &[ChekhovGun]) -> String {
        if guns.is_empty() {
            return "aucun".to_string();
        }
        guns.iter()
            .map(|gun| {
                format!(
                    "- {} (ch.{}, urgence {}, {})",
                    gun.element,
                    gun.introduced_chapter,
                    gun.urgency,
                    if gun.resolved { "resolu" } else { "ouvert" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Extract new guns, resolutions and hints from a chapter, then apply
    /// them to `guns` in place.
    pub async fn track_chapter(
        &self,
        guns: &mut Vec<ChekhovGun>,
        chapter_text: &str,
        chapter_index: u32,
    ) -> Result<GunUpdate> {
        let prompt = format!(
            "Analyse ce chapitre pour les promesses narratives (armes de Tchekhov): \
             objets charges de sens, competences mentionnees, menaces, promesses, \
             prefigurations, questions ouvertes.\n\
             ELEMENTS DEJA SUIVIS:\n{}\n\n\
             CHAPITRE {chapter_index}:\n{}\n\n\
             Retourne un JSON avec: new_guns (element, element_type parmi \
             object/skill/threat/promise/foreshadowing/question, expectation, urgency 1-10), \
             resolved (element), hints (for_element, hint). \
             Ne repete pas les elements deja suivis dans new_guns.",
            Self::summarize_existing(guns),
            feuilleton::text::truncate_chars(chapter_text, 6000)
        );
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)])
            .with_temperature(0.2)
            .with_max_tokens(900);
        let payload: ExtractionPayload = match chat_json(self.llm.as_ref(), request).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(feuilleton::error::Error::LlmBadFormat(message)) => {
                tracing::warn!(%message, "chekhov payload unusable");
                ExtractionPayload::default()
            }
            Err(err) => return Err(err),
        };

        let mut update = GunUpdate::default();

        for extracted in payload.new_guns {
            if extracted.element.trim().is_empty() {
                continue;
            }
            if guns.iter().any(|gun| elements_match(&gun.element, &extracted.element)) {
                continue;
            }
            let gun = ChekhovGun {
                element: extracted.element,
                element_type: extracted.element_type.unwrap_or_default(),
                expectation: extracted.expectation,
                introduced_chapter: chapter_index,
                urgency: extracted.urgency.unwrap_or(5).clamp(1, 10),
                resolved: false,
                resolved_chapter: None,
                hints_dropped: Vec::new(),
            };
            guns.push(gun.clone());
            update.new_guns.push(gun);
        }

        for resolved in payload.resolved {
            for gun in guns.iter_mut() {
                if !gun.resolved && elements_match(&gun.element, &resolved.element) {
                    gun.resolved = true;
                    gun.resolved_chapter = Some(chapter_index);
                    update.resolved_elements.push(gun.element.clone());
                }
            }
        }

        for hint in payload.hints {
            for gun in guns.iter_mut() {
                if elements_match(&gun.element, &hint.for_element) && !hint.hint.is_empty() {
                    gun.hints_dropped.push(hint.hint.clone());
                }
            }
        }

        Ok(update)
    }

    /// Alerts for unresolved guns that waited too long. High urgency halves
    /// the allowed horizon.
    #[must_use]
    pub fn check_unresolved(
        guns: &[ChekhovGun],
        current_chapter: u32,
        max_chapters_unresolved: u32,
        urgency_threshold: u8,
    ) -> Vec<GunAlert> {
        let mut alerts = Vec::new();
        for gun in guns {
            if gun.resolved {
                continue;
            }
            let waiting = gun.age(current_chapter);
            let adjusted_max = if gun.urgency >= 8 {
                (max_chapters_unresolved / 2).max(5)
            } else if gun.urgency >= 6 {
                ((max_chapters_unresolved as f64 * 0.7) as u32).max(8)
            } else {
                max_chapters_unresolved
            };
            if waiting > adjusted_max && gun.urgency >= urgency_threshold {
                alerts.push(GunAlert {
                    element: gun.element.clone(),
                    element_type: gun.element_type,
                    expectation: gun.expectation.clone(),
                    introduced_chapter: gun.introduced_chapter,
                    chapters_waiting: waiting,
                    urgency: gun.urgency,
                    severity: if gun.urgency >= 8 { "high" } else { "medium" }.to_string(),
                    recommendation: resolution_recommendation(gun),
                });
            }
        }
        alerts
    }

    /// Ask the LLM for concrete resolution scenes for the most urgent
    /// unresolved guns.
    pub async fn suggest_resolutions(
        &self,
        guns: &[ChekhovGun],
        story_context: &str,
        upcoming_chapters: u32,
    ) -> Result<Vec<String>> {
        let mut unresolved: Vec<&ChekhovGun> = guns.iter().filter(|gun| !gun.resolved).collect();
        unresolved.sort_by_key(|gun| std::cmp::Reverse(gun.urgency));
        if unresolved.is_empty() {
            return Ok(Vec::new());
        }
        let listing = unresolved
            .iter()
            .take(5)
            .map(|gun| format!("- {} ({}): {}", gun.element, gun.urgency, gun.expectation))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Ces promesses narratives attendent une resolution dans les {upcoming_chapters} \
             prochains chapitres:\n{listing}\n\nCONTEXTE:\n{story_context}\n\n\
             Retourne un JSON {{\"suggestions\": [\"scene de resolution concrete par element\"]}}."
        );
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)])
            .with_temperature(0.5)
            .with_max_tokens(800);
        let value = chat_json(self.llm.as_ref(), request).await?;
        Ok(value
            .get("suggestions")
            .and_then(|suggestions| suggestions.as_array())
            .map(|suggestions| {
                suggestions
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn resolution_recommendation(gun: &ChekhovGun) -> String {
    match gun.element_type {
        GunType::Object => format!(
            "L'objet '{}' devrait etre utilise ou sa pertinence expliquee.",
            gun.element
        ),
        GunType::Skill => "La competence mentionnee devrait etre mise en pratique.".to_string(),
        GunType::Threat => "La menace devrait se concretiser ou etre neutralisee.".to_string(),
        GunType::Promise => {
            "La promesse devrait etre tenue, brisee, ou son statut clarifie.".to_string()
        }
        GunType::Foreshadowing => "L'element de prefiguration devrait se realiser.".to_string(),
        GunType::Question => "La question soulevee merite une reponse.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feuilleton::llm::ScriptedChatClient;

    #[test]
    fn fuzzy_matching_uses_word_overlap() {
        assert!(elements_match("le revolver du grenier", "revolver du grenier"));
        assert!(elements_match("La Carte", "la carte"));
        assert!(!elements_match("le revolver", "la lettre volee"));
        assert!(!elements_match("", "la carte"));
    }

    #[test]
    fn stale_urgent_guns_alert() {
        let guns = vec![
            ChekhovGun {
                element: "le revolver".to_string(),
                introduced_chapter: 1,
                urgency: 9,
                ..Default::default()
            },
            ChekhovGun {
                element: "detail mineur".to_string(),
                introduced_chapter: 1,
                urgency: 3,
                ..Default::default()
            },
        ];
        // Urgency 9 halves the 15-chapter horizon.
        let alerts = ChekhovTracker::check_unresolved(&guns, 10, 15, 7);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].element, "le revolver");
        assert_eq!(alerts[0].severity, "high");

        // Invariant: unresolved urgency ≥ 7 guns older than 15 chapters
        // always alert.
        let alerts = ChekhovTracker::check_unresolved(&guns, 17, 15, 7);
        assert!(alerts.iter().any(|alert| alert.element == "le revolver"));
    }

    #[tokio::test]
    async fn track_chapter_applies_extraction() {
        let payload = serde_json::json!({
            "new_guns": [
                {"element": "la lettre cachetee", "element_type": "object",
                 "expectation": "sera ouverte", "urgency": 8}
            ],
            "resolved": [{"element": "le revolver du grenier"}],
            "hints": [{"for_element": "la lettre cachetee", "hint": "le sceau est brise"}]
        })
        .to_string();
        let tracker = ChekhovTracker::new(std::sync::Arc::new(ScriptedChatClient::new(vec![
            payload,
        ])));
        let mut guns = vec![ChekhovGun {
            element: "le revolver du grenier".to_string(),
            introduced_chapter: 2,
            urgency: 7,
            ..Default::default()
        }];
        let update = tracker
            .track_chapter(&mut guns, "Elle trouva une lettre cachetee.", 6)
            .await
            .unwrap();

        assert_eq!(update.new_guns.len(), 1);
        assert_eq!(update.resolved_elements, vec!["le revolver du grenier"]);
        assert_eq!(guns.len(), 2);
        assert!(guns[0].resolved);
        assert_eq!(guns[0].resolved_chapter, Some(6));
        assert_eq!(guns[1].hints_dropped, vec!["le sceau est brise"]);
    }
}
