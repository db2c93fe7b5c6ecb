//! Continuity facts: the canonical entities extracted from approved chapters
//! and merged into the project-level record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked scalar change: the new value, where it happened, and when it was
/// recorded. History lists are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub value: String,
    #[serde(default)]
    pub chapter_index: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    #[must_use]
    pub fn new(value: impl Into<String>, chapter_index: Option<u32>) -> Self {
        Self {
            value: value.into(),
            chapter_index,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterFact {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub current_state: String,
    #[serde(default)]
    pub motivations: Vec<String>,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub arc_stage: String,
    #[serde(default)]
    pub first_appearance: Option<u32>,
    #[serde(default)]
    pub last_seen_chapter: Option<u32>,
    #[serde(default)]
    pub status_history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationFact {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub timeline_markers: Vec<String>,
    #[serde(default)]
    pub atmosphere: String,
    #[serde(default)]
    pub last_mentioned_chapter: Option<u32>,
}

/// Relation between two characters, keyed by `(from, to, kind)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationFact {
    pub from: String,
    pub to: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub start_chapter: Option<u32>,
    #[serde(default)]
    pub current_state: String,
    #[serde(default)]
    pub evolution_history: Vec<HistoryEntry>,
}

impl RelationFact {
    /// Composite merge key.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.from, self.to, self.kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFact {
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub chapter_index: Option<u32>,
    #[serde(default)]
    pub time_reference: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default)]
    pub unresolved_threads: Vec<String>,
}

impl EventFact {
    /// An event is unresolved while it still carries open threads.
    #[must_use]
    pub fn unresolved(&self) -> bool {
        !self.unresolved_threads.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStatus {
    #[default]
    Possessed,
    Lost,
    Destroyed,
    Hidden,
    Transferred,
    Found,
}

impl ObjectStatus {
    /// Statuses under which the object is back in play after being lost.
    #[must_use]
    pub fn counts_as_recovered(self) -> bool {
        matches!(self, ObjectStatus::Possessed | ObjectStatus::Found)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectStatusEntry {
    pub status: ObjectStatus,
    #[serde(default)]
    pub chapter: Option<u32>,
    #[serde(default)]
    pub holder: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectFact {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: ObjectStatus,
    #[serde(default)]
    pub current_holder: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status_history: Vec<ObjectStatusEntry>,
    #[serde(default)]
    pub magical_properties: Option<String>,
    #[serde(default)]
    pub last_seen_chapter: Option<u32>,
}

/// Where a character is, and whether travel there was made explicit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterLocation {
    pub character_name: String,
    pub location: String,
    #[serde(default)]
    pub chapter_index: Option<u32>,
    #[serde(default)]
    pub travel_from: Option<String>,
    #[serde(default)]
    pub travel_to: Option<String>,
    #[serde(default = "default_true")]
    pub arrival_confirmed: bool,
}

fn default_true() -> bool {
    true
}

/// Facts extracted from a single chapter, before merging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuityFacts {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub characters: Vec<CharacterFact>,
    #[serde(default)]
    pub locations: Vec<LocationFact>,
    #[serde(default)]
    pub relations: Vec<RelationFact>,
    #[serde(default)]
    pub events: Vec<EventFact>,
    #[serde(default)]
    pub objects: Vec<ObjectFact>,
    #[serde(default)]
    pub character_locations: Vec<CharacterLocation>,
}

impl ContinuityFacts {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
            && self.locations.is_empty()
            && self.relations.is_empty()
            && self.events.is_empty()
            && self.objects.is_empty()
            && self.character_locations.is_empty()
    }
}

/// Project-level merged continuity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Continuity {
    #[serde(default)]
    pub characters: Vec<CharacterFact>,
    #[serde(default)]
    pub locations: Vec<LocationFact>,
    #[serde(default)]
    pub relations: Vec<RelationFact>,
    #[serde(default)]
    pub events: Vec<EventFact>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Continuity {
    #[must_use]
    pub fn character(&self, name: &str) -> Option<&CharacterFact> {
        self.characters.iter().find(|c| c.name == name)
    }

    /// Character names known to continuity, for mention scanning.
    #[must_use]
    pub fn character_names(&self) -> Vec<&str> {
        self.characters.iter().map(|c| c.name.as_str()).collect()
    }
}
