//! Structured continuity graph.
//!
//! Nodes are keyed by `(project_id, name)` with labels `Character`,
//! `Location`, `Event`, `Object`; edges carry relations between characters
//! and possession of objects. Upserts are idempotent and history lists are
//! append-only, so concurrent approvals converge. The in-process
//! implementation is a petgraph entity graph; the trait leaves room for a
//! served graph database behind the same queries.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use feuilleton::error::Result;
use feuilleton::types::{
    ContinuityFacts, GraphIssue, HistoryEntry, ObjectStatus, ObjectStatusEntry, Severity,
};

/// Chapters an unresolved event may go unmentioned before it is orphaned.
const ORPHAN_THRESHOLD: u32 = 10;
/// Chapters of implicit travel tolerated before a location inconsistency.
const TRAVEL_TOLERANCE: u32 = 2;
const CONTRADICTION_CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeLabel {
    Character,
    Location,
    Event,
    Object,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationVisit {
    pub location: String,
    #[serde(default)]
    pub chapter: Option<u32>,
    #[serde(default)]
    pub travel_from: Option<String>,
    #[serde(default)]
    pub travel_to: Option<String>,
    #[serde(default)]
    pub arrival_confirmed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterNode {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub current_state: String,
    #[serde(default)]
    pub status_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub first_appearance: Option<u32>,
    #[serde(default)]
    pub last_seen_chapter: Option<u32>,
    #[serde(default)]
    pub current_location: Option<String>,
    #[serde(default)]
    pub location_updated_chapter: Option<u32>,
    #[serde(default)]
    pub location_history: Vec<LocationVisit>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationNode {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub last_mentioned_chapter: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventNode {
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub unresolved: bool,
    #[serde(default)]
    pub last_mentioned_chapter: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectNode {
    pub name: String,
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
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GraphNode {
    Character(CharacterNode),
    Location(LocationNode),
    Event(EventNode),
    Object(ObjectNode),
}

impl GraphNode {
    #[must_use]
    pub fn label(&self) -> NodeLabel {
        match self {
            GraphNode::Character(_) => NodeLabel::Character,
            GraphNode::Location(_) => NodeLabel::Location,
            GraphNode::Event(_) => NodeLabel::Event,
            GraphNode::Object(_) => NodeLabel::Object,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            GraphNode::Character(node) => &node.name,
            GraphNode::Location(node) => &node.name,
            GraphNode::Event(node) => &node.name,
            GraphNode::Object(node) => &node.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GraphEdge {
    Relation {
        kind: String,
        current_state: String,
        start_chapter: Option<u32>,
        evolution_history: Vec<HistoryEntry>,
    },
    Possesses,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterEvolution {
    pub name: String,
    pub first_appearance: Option<u32>,
    pub last_seen_chapter: Option<u32>,
    pub status_history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationState {
    pub kind: String,
    pub current_state: String,
    pub start_chapter: Option<u32>,
    pub evolution_history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanedThread {
    pub event: String,
    pub summary: String,
    pub last_mentioned: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectAvailability {
    pub available: bool,
    pub status: String,
    #[serde(default)]
    pub holder: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub issue: Option<String>,
}

impl ObjectAvailability {
    fn unknown() -> Self {
        Self {
            available: true,
            status: "unknown".to_string(),
            holder: None,
            location: None,
            issue: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConsistency {
    pub consistent: bool,
    #[serde(default)]
    pub current_location: Option<String>,
    #[serde(default)]
    pub last_known_chapter: Option<u32>,
    #[serde(default)]
    pub issue: Option<String>,
    #[serde(default)]
    pub warning: Option<String>,
}

impl LocationConsistency {
    fn consistent() -> Self {
        Self {
            consistent: true,
            current_location: None,
            last_known_chapter: None,
            issue: None,
            warning: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<ExportedNode>,
    pub edges: Vec<ExportedEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedNode {
    pub id: usize,
    pub label: NodeLabel,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedEdge {
    pub source: usize,
    pub target: usize,
    #[serde(rename = "type")]
    pub kind: String,
}

#[async_trait]
pub trait ContinuityGraph: Send + Sync {
    /// Idempotent MERGE-upsert of one chapter's facts.
    async fn apply_facts(
        &self,
        project_id: Uuid,
        facts: &ContinuityFacts,
        chapter_index: Option<u32>,
    ) -> Result<()>;

    async fn character_evolution(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<Option<CharacterEvolution>>;

    /// `dead/destroyed → alive/active` transitions in the status history.
    async fn detect_character_contradictions(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<Vec<GraphIssue>>;

    async fn relationship_evolution(
        &self,
        project_id: Uuid,
        from: &str,
        to: &str,
    ) -> Result<Vec<RelationState>>;

    /// Unresolved events last mentioned ≥ 10 chapters ago.
    async fn find_orphaned_plot_threads(
        &self,
        project_id: Uuid,
        current_chapter: u32,
    ) -> Result<Vec<OrphanedThread>>;

    async fn check_object_availability(
        &self,
        project_id: Uuid,
        object_name: &str,
        chapter_index: u32,
    ) -> Result<ObjectAvailability>;

    /// 2-chapter tolerance for implicit travel; otherwise the inconsistency
    /// cites the last known location.
    async fn check_character_location_consistency(
        &self,
        project_id: Uuid,
        character_name: &str,
        required_location: &str,
        chapter_index: u32,
    ) -> Result<LocationConsistency>;

    async fn export(&self, project_id: Uuid) -> Result<GraphExport>;
}

struct GraphInner {
    graph: StableDiGraph<GraphNode, GraphEdge>,
    /// `(project_id, lower-cased name)` → node. The per-project secondary
    /// index the queries filter on.
    by_key: HashMap<(Uuid, String), NodeIndex>,
    by_project: HashMap<Uuid, Vec<NodeIndex>>,
}

/// In-process continuity graph.
pub struct InMemoryContinuityGraph {
    inner: RwLock<GraphInner>,
    contradiction_cache: RwLock<HashMap<(Uuid, String), (Vec<GraphIssue>, Instant)>>,
}

impl Default for InMemoryContinuityGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryContinuityGraph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(GraphInner {
                graph: StableDiGraph::new(),
                by_key: HashMap::new(),
                by_project: HashMap::new(),
            }),
            contradiction_cache: RwLock::new(HashMap::new()),
        }
    }

    fn key(project_id: Uuid, name: &str) -> (Uuid, String) {
        (project_id, name.trim().to_lowercase())
    }

    fn find(inner: &GraphInner, project_id: Uuid, name: &str) -> Option<NodeIndex> {
        inner.by_key.get(&Self::key(project_id, name)).copied()
    }

    fn upsert_node(
        inner: &mut GraphInner,
        project_id: Uuid,
        name: &str,
        default: GraphNode,
    ) -> NodeIndex {
        let key = Self::key(project_id, name);
        if let Some(index) = inner.by_key.get(&key) {
            return *index;
        }
        let index = inner.graph.add_node(default);
        inner.by_key.insert(key, index);
        inner.by_project.entry(project_id).or_default().push(index);
        index
    }

    fn ensure_character(inner: &mut GraphInner, project_id: Uuid, name: &str) -> NodeIndex {
        let index = Self::upsert_node(
            inner,
            project_id,
            name,
            GraphNode::Character(CharacterNode {
                name: name.to_string(),
                ..Default::default()
            }),
        );
        // Label collisions (an event named like a character) resolve in
        // favor of the character label.
        if !matches!(inner.graph[index], GraphNode::Character(_)) {
            inner.graph[index] = GraphNode::Character(CharacterNode {
                name: name.to_string(),
                ..Default::default()
            });
        }
        index
    }
}

#[async_trait]
impl ContinuityGraph for InMemoryContinuityGraph {
    async fn apply_facts(
        &self,
        project_id: Uuid,
        facts: &ContinuityFacts,
        chapter_index: Option<u32>,
    ) -> Result<()> {
        let timestamp = Utc::now();
        let mut inner = self.inner.write();

        for fact in &facts.characters {
            let chapter = fact.last_seen_chapter.or(chapter_index);
            let index = Self::ensure_character(&mut inner, project_id, &fact.name);
            let GraphNode::Character(node) = &mut inner.graph[index] else {
                continue;
            };
            if !fact.status.is_empty() && fact.status != node.status {
                node.status_history.push(HistoryEntry {
                    value: fact.status.clone(),
                    chapter_index: chapter,
                    timestamp,
                });
                node.status = fact.status.clone();
            }
            if !fact.current_state.is_empty() {
                node.current_state = fact.current_state.clone();
            }
            node.first_appearance = match (node.first_appearance, chapter) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            node.last_seen_chapter = match (node.last_seen_chapter, chapter) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => b.or(a),
            };
        }

        for fact in &facts.locations {
            let chapter = fact.last_mentioned_chapter.or(chapter_index);
            let index = Self::upsert_node(
                &mut inner,
                project_id,
                &fact.name,
                GraphNode::Location(LocationNode {
                    name: fact.name.clone(),
                    ..Default::default()
                }),
            );
            if let GraphNode::Location(node) = &mut inner.graph[index] {
                if !fact.description.is_empty() {
                    node.description = fact.description.clone();
                }
                node.last_mentioned_chapter = match (node.last_mentioned_chapter, chapter) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => b.or(a),
                };
            }
        }

        for fact in &facts.events {
            let chapter = fact.chapter_index.or(chapter_index);
            let index = Self::upsert_node(
                &mut inner,
                project_id,
                &fact.name,
                GraphNode::Event(EventNode {
                    name: fact.name.clone(),
                    ..Default::default()
                }),
            );
            if let GraphNode::Event(node) = &mut inner.graph[index] {
                if !fact.summary.is_empty() {
                    node.summary = fact.summary.clone();
                }
                node.unresolved = fact.unresolved();
                node.last_mentioned_chapter = match (node.last_mentioned_chapter, chapter) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => b.or(a),
                };
            }
        }

        for fact in &facts.relations {
            let from_index = Self::ensure_character(&mut inner, project_id, &fact.from);
            let to_index = Self::ensure_character(&mut inner, project_id, &fact.to);
            let existing = inner
                .graph
                .edges(from_index)
                .find(|edge| {
                    edge.target() == to_index
                        && matches!(edge.weight(), GraphEdge::Relation { kind, .. } if *kind == fact.kind)
                })
                .map(|edge| edge.id());
            match existing {
                Some(edge_id) => {
                    if let Some(GraphEdge::Relation {
                        current_state,
                        start_chapter,
                        evolution_history,
                        ..
                    }) = inner.graph.edge_weight_mut(edge_id)
                    {
                        if !fact.current_state.is_empty() && fact.current_state != *current_state {
                            evolution_history.push(HistoryEntry {
                                value: fact.current_state.clone(),
                                chapter_index: fact.start_chapter.or(chapter_index),
                                timestamp,
                            });
                            *current_state = fact.current_state.clone();
                        }
                        *start_chapter = match (*start_chapter, fact.start_chapter) {
                            (Some(a), Some(b)) => Some(a.min(b)),
                            (a, b) => a.or(b),
                        };
                    }
                }
                None => {
                    let mut evolution_history = Vec::new();
                    if !fact.current_state.is_empty() {
                        evolution_history.push(HistoryEntry {
                            value: fact.current_state.clone(),
                            chapter_index: fact.start_chapter.or(chapter_index),
                            timestamp,
                        });
                    }
                    inner.graph.add_edge(
                        from_index,
                        to_index,
                        GraphEdge::Relation {
                            kind: fact.kind.clone(),
                            current_state: fact.current_state.clone(),
                            start_chapter: fact.start_chapter.or(chapter_index),
                            evolution_history,
                        },
                    );
                }
            }
        }

        for fact in &facts.objects {
            let chapter = fact.last_seen_chapter.or(chapter_index);
            let index = Self::upsert_node(
                &mut inner,
                project_id,
                &fact.name,
                GraphNode::Object(ObjectNode {
                    name: fact.name.clone(),
                    ..Default::default()
                }),
            );
            if let GraphNode::Object(node) = &mut inner.graph[index] {
                node.status_history.push(ObjectStatusEntry {
                    status: fact.status,
                    chapter,
                    holder: fact.current_holder.clone(),
                    location: fact.location.clone(),
                    timestamp,
                });
                node.status = fact.status;
                node.current_holder = fact.current_holder.clone();
                node.location = fact.location.clone();
                if fact.magical_properties.is_some() {
                    node.magical_properties = fact.magical_properties.clone();
                }
            }
            if let Some(holder) = fact.current_holder.clone() {
                let holder_index = Self::ensure_character(&mut inner, project_id, &holder);
                let already = inner
                    .graph
                    .edges(holder_index)
                    .any(|edge| edge.target() == index && matches!(edge.weight(), GraphEdge::Possesses));
                if !already {
                    inner.graph.add_edge(holder_index, index, GraphEdge::Possesses);
                }
            }
        }

        for fact in &facts.character_locations {
            let chapter = fact.chapter_index.or(chapter_index);
            let index = Self::ensure_character(&mut inner, project_id, &fact.character_name);
            let GraphNode::Character(node) = &mut inner.graph[index] else {
                continue;
            };
            node.location_history.push(LocationVisit {
                location: fact.location.clone(),
                chapter,
                travel_from: fact.travel_from.clone(),
                travel_to: fact.travel_to.clone(),
                arrival_confirmed: fact.arrival_confirmed,
            });
            node.current_location = Some(fact.location.clone());
            node.location_updated_chapter = chapter;
        }

        drop(inner);
        // Histories changed; cached contradiction scans are stale.
        self.contradiction_cache.write().retain(|(project, _), _| *project != project_id);
        Ok(())
    }

    async fn character_evolution(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<Option<CharacterEvolution>> {
        let inner = self.inner.read();
        let Some(index) = Self::find(&inner, project_id, name) else {
            return Ok(None);
        };
        match &inner.graph[index] {
            GraphNode::Character(node) => Ok(Some(CharacterEvolution {
                name: node.name.clone(),
                first_appearance: node.first_appearance,
                last_seen_chapter: node.last_seen_chapter,
                status_history: node.status_history.clone(),
            })),
            _ => Ok(None),
        }
    }

    async fn detect_character_contradictions(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<Vec<GraphIssue>> {
        let cache_key = Self::key(project_id, name);
        if let Some((issues, stored_at)) = self.contradiction_cache.read().get(&cache_key) {
            if stored_at.elapsed() < CONTRADICTION_CACHE_TTL {
                return Ok(issues.clone());
            }
        }

        let issues = {
            let inner = self.inner.read();
            let Some(index) = Self::find(&inner, project_id, name) else {
                return Ok(Vec::new());
            };
            let GraphNode::Character(node) = &inner.graph[index] else {
                return Ok(Vec::new());
            };
            let mut ordered: Vec<&HistoryEntry> = node.status_history.iter().collect();
            ordered.sort_by_key(|entry| entry.chapter_index.unwrap_or(0));
            let mut issues = Vec::new();
            for pair in ordered.windows(2) {
                let from = pair[0];
                let to = pair[1];
                let was_dead = matches!(from.value.as_str(), "dead" | "mort" | "destroyed");
                let now_alive = matches!(
                    to.value.as_str(),
                    "alive" | "active" | "healthy" | "vivant"
                );
                if was_dead && now_alive {
                    issues.push(GraphIssue {
                        kind: "graph_contradiction".to_string(),
                        detail: format!(
                            "{}: resurrection entre ch.{} et ch.{}",
                            node.name,
                            from.chapter_index.unwrap_or(0),
                            to.chapter_index.unwrap_or(0)
                        ),
                        severity: Severity::Critical,
                        source: "continuity_graph".to_string(),
                    });
                }
            }
            issues
        };

        self.contradiction_cache
            .write()
            .insert(cache_key, (issues.clone(), Instant::now()));
        Ok(issues)
    }

    async fn relationship_evolution(
        &self,
        project_id: Uuid,
        from: &str,
        to: &str,
    ) -> Result<Vec<RelationState>> {
        let inner = self.inner.read();
        let (Some(from_index), Some(to_index)) = (
            Self::find(&inner, project_id, from),
            Self::find(&inner, project_id, to),
        ) else {
            return Ok(Vec::new());
        };
        let mut states: Vec<RelationState> = inner
            .graph
            .edges(from_index)
            .filter(|edge| edge.target() == to_index)
            .filter_map(|edge| match edge.weight() {
                GraphEdge::Relation {
                    kind,
                    current_state,
                    start_chapter,
                    evolution_history,
                } => Some(RelationState {
                    kind: kind.clone(),
                    current_state: current_state.clone(),
                    start_chapter: *start_chapter,
                    evolution_history: evolution_history.clone(),
                }),
                GraphEdge::Possesses => None,
            })
            .collect();
        states.sort_by_key(|state| state.start_chapter.unwrap_or(0));
        Ok(states)
    }

    async fn find_orphaned_plot_threads(
        &self,
        project_id: Uuid,
        current_chapter: u32,
    ) -> Result<Vec<OrphanedThread>> {
        let cutoff = current_chapter.saturating_sub(ORPHAN_THRESHOLD);
        let inner = self.inner.read();
        let Some(indices) = inner.by_project.get(&project_id) else {
            return Ok(Vec::new());
        };
        let mut threads: Vec<OrphanedThread> = indices
            .iter()
            .filter_map(|index| match &inner.graph[*index] {
                GraphNode::Event(event)
                    if event.unresolved
                        && event.last_mentioned_chapter.unwrap_or(0) < cutoff =>
                {
                    Some(OrphanedThread {
                        event: event.name.clone(),
                        summary: event.summary.clone(),
                        last_mentioned: event.last_mentioned_chapter,
                    })
                }
                _ => None,
            })
            .collect();
        threads.sort_by_key(|thread| thread.last_mentioned.unwrap_or(0));
        Ok(threads)
    }

    async fn check_object_availability(
        &self,
        project_id: Uuid,
        object_name: &str,
        chapter_index: u32,
    ) -> Result<ObjectAvailability> {
        let inner = self.inner.read();
        let Some(index) = Self::find(&inner, project_id, object_name) else {
            return Ok(ObjectAvailability::unknown());
        };
        let GraphNode::Object(node) = &inner.graph[index] else {
            return Ok(ObjectAvailability::unknown());
        };

        if node.status == ObjectStatus::Destroyed {
            return Ok(ObjectAvailability {
                available: false,
                status: "destroyed".to_string(),
                holder: None,
                location: None,
                issue: Some(format!(
                    "L'objet '{}' a ete detruit et ne peut plus etre utilise.",
                    node.name
                )),
            });
        }

        // Lost before this chapter without a later recovery entry.
        let lost_chapter = node.status_history.iter().find_map(|entry| {
            let entry_chapter = entry.chapter.unwrap_or(0);
            if entry.status == ObjectStatus::Lost && entry_chapter < chapter_index {
                let found_after = node.status_history.iter().any(|later| {
                    later.status.counts_as_recovered()
                        && later.chapter.unwrap_or(0) > entry_chapter
                        && later.chapter.unwrap_or(0) <= chapter_index
                });
                if !found_after {
                    return Some(entry_chapter);
                }
            }
            None
        });
        if let Some(lost_chapter) = lost_chapter {
            return Ok(ObjectAvailability {
                available: false,
                status: "lost".to_string(),
                holder: None,
                location: node.location.clone(),
                issue: Some(format!(
                    "L'objet '{}' a ete perdu au chapitre {lost_chapter} et n'a pas ete retrouve.",
                    node.name
                )),
            });
        }

        Ok(ObjectAvailability {
            available: true,
            status: serde_json::to_value(node.status)
                .ok()
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or_else(|| "possessed".to_string()),
            holder: node.current_holder.clone(),
            location: node.location.clone(),
            issue: None,
        })
    }

    async fn check_character_location_consistency(
        &self,
        project_id: Uuid,
        character_name: &str,
        required_location: &str,
        chapter_index: u32,
    ) -> Result<LocationConsistency> {
        let inner = self.inner.read();
        let Some(index) = Self::find(&inner, project_id, character_name) else {
            return Ok(LocationConsistency::consistent());
        };
        let GraphNode::Character(node) = &inner.graph[index] else {
            return Ok(LocationConsistency::consistent());
        };
        let Some(current_location) = node.current_location.clone() else {
            return Ok(LocationConsistency::consistent());
        };

        if current_location.to_lowercase() == required_location.to_lowercase() {
            return Ok(LocationConsistency {
                consistent: true,
                current_location: Some(current_location),
                last_known_chapter: node.location_updated_chapter,
                issue: None,
                warning: None,
            });
        }

        let travel_found = node.location_history.iter().any(|visit| {
            visit
                .travel_to
                .as_deref()
                .is_some_and(|to| to.to_lowercase() == required_location.to_lowercase())
                && visit.chapter.unwrap_or(0) <= chapter_index
        });
        if travel_found {
            return Ok(LocationConsistency {
                consistent: true,
                current_location: Some(required_location.to_string()),
                last_known_chapter: Some(chapter_index),
                issue: None,
                warning: None,
            });
        }

        let chapter_gap = chapter_index.saturating_sub(node.location_updated_chapter.unwrap_or(0));
        if chapter_gap <= TRAVEL_TOLERANCE {
            return Ok(LocationConsistency {
                consistent: true,
                current_location: Some(current_location.clone()),
                last_known_chapter: node.location_updated_chapter,
                issue: None,
                warning: Some(format!(
                    "Voyage implicite de {current_location} a {required_location}"
                )),
            });
        }

        Ok(LocationConsistency {
            consistent: false,
            current_location: Some(current_location.clone()),
            last_known_chapter: node.location_updated_chapter,
            issue: Some(format!(
                "'{character_name}' etait a '{current_location}' au chapitre {}. \
                 Aucun voyage vers '{required_location}' n'a ete mentionne.",
                node.location_updated_chapter.unwrap_or(0)
            )),
            warning: None,
        })
    }

    async fn export(&self, project_id: Uuid) -> Result<GraphExport> {
        let inner = self.inner.read();
        let Some(indices) = inner.by_project.get(&project_id) else {
            return Ok(GraphExport::default());
        };
        let nodes: Vec<ExportedNode> = indices
            .iter()
            .map(|index| {
                let node = &inner.graph[*index];
                ExportedNode {
                    id: index.index(),
                    label: node.label(),
                    name: node.name().to_string(),
                }
            })
            .collect();
        let project_set: std::collections::HashSet<NodeIndex> = indices.iter().copied().collect();
        let edges: Vec<ExportedEdge> = inner
            .graph
            .edge_references()
            .filter(|edge| {
                project_set.contains(&edge.source()) && project_set.contains(&edge.target())
            })
            .map(|edge| ExportedEdge {
                source: edge.source().index(),
                target: edge.target().index(),
                kind: match edge.weight() {
                    GraphEdge::Relation { kind, .. } => format!("RELATION:{kind}"),
                    GraphEdge::Possesses => "POSSESSES".to_string(),
                },
            })
            .collect();
        Ok(GraphExport { nodes, edges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feuilleton::types::{CharacterFact, CharacterLocation, EventFact, ObjectFact, RelationFact};

    fn facts_with_character(name: &str, status: &str, chapter: u32) -> ContinuityFacts {
        ContinuityFacts {
            characters: vec![CharacterFact {
                name: name.to_string(),
                status: status.to_string(),
                last_seen_chapter: Some(chapter),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn resurrection_is_detected() {
        let graph = InMemoryContinuityGraph::new();
        let project = Uuid::new_v4();
        graph
            .apply_facts(project, &facts_with_character("Bob", "dead", 3), Some(3))
            .await
            .unwrap();
        graph
            .apply_facts(project, &facts_with_character("Bob", "alive", 5), Some(5))
            .await
            .unwrap();

        let issues = graph
            .detect_character_contradictions(project, "Bob")
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].detail.contains("Bob: resurrection"));
        assert_eq!(issues[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn contradiction_cache_invalidated_by_new_facts() {
        let graph = InMemoryContinuityGraph::new();
        let project = Uuid::new_v4();
        graph
            .apply_facts(project, &facts_with_character("Bob", "alive", 1), Some(1))
            .await
            .unwrap();
        assert!(graph
            .detect_character_contradictions(project, "Bob")
            .await
            .unwrap()
            .is_empty());

        graph
            .apply_facts(project, &facts_with_character("Bob", "dead", 2), Some(2))
            .await
            .unwrap();
        graph
            .apply_facts(project, &facts_with_character("Bob", "alive", 4), Some(4))
            .await
            .unwrap();
        assert_eq!(
            graph
                .detect_character_contradictions(project, "Bob")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn orphaned_threads_need_ten_silent_chapters() {
        let graph = InMemoryContinuityGraph::new();
        let project = Uuid::new_v4();
        let facts = ContinuityFacts {
            events: vec![
                EventFact {
                    name: "la dette".to_string(),
                    chapter_index: Some(1),
                    unresolved_threads: vec!["qui paiera".to_string()],
                    ..Default::default()
                },
                EventFact {
                    name: "recente".to_string(),
                    chapter_index: Some(9),
                    unresolved_threads: vec!["fil ouvert".to_string()],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        graph.apply_facts(project, &facts, None).await.unwrap();

        let orphans = graph.find_orphaned_plot_threads(project, 12).await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].event, "la dette");
    }

    #[tokio::test]
    async fn lost_object_without_recovery_is_unavailable() {
        let graph = InMemoryContinuityGraph::new();
        let project = Uuid::new_v4();
        let mut facts = ContinuityFacts::default();
        facts.objects.push(ObjectFact {
            name: "l'amulette".to_string(),
            status: ObjectStatus::Possessed,
            current_holder: Some("Marie".to_string()),
            last_seen_chapter: Some(2),
            ..Default::default()
        });
        graph.apply_facts(project, &facts, Some(2)).await.unwrap();

        let mut lost = ContinuityFacts::default();
        lost.objects.push(ObjectFact {
            name: "l'amulette".to_string(),
            status: ObjectStatus::Lost,
            last_seen_chapter: Some(4),
            ..Default::default()
        });
        graph.apply_facts(project, &lost, Some(4)).await.unwrap();

        let availability = graph
            .check_object_availability(project, "l'amulette", 7)
            .await
            .unwrap();
        assert!(!availability.available);
        assert!(availability.issue.unwrap().contains("chapitre 4"));

        // Found again afterwards: available.
        let mut found = ContinuityFacts::default();
        found.objects.push(ObjectFact {
            name: "l'amulette".to_string(),
            status: ObjectStatus::Found,
            last_seen_chapter: Some(6),
            ..Default::default()
        });
        graph.apply_facts(project, &found, Some(6)).await.unwrap();
        let availability = graph
            .check_object_availability(project, "l'amulette", 7)
            .await
            .unwrap();
        assert!(availability.available);
    }

    #[tokio::test]
    async fn location_consistency_tolerates_two_chapters() {
        let graph = InMemoryContinuityGraph::new();
        let project = Uuid::new_v4();
        let mut facts = ContinuityFacts::default();
        facts.character_locations.push(CharacterLocation {
            character_name: "Marie".to_string(),
            location: "Paris".to_string(),
            chapter_index: Some(3),
            ..Default::default()
        });
        graph.apply_facts(project, &facts, Some(3)).await.unwrap();

        let near = graph
            .check_character_location_consistency(project, "Marie", "Lyon", 5)
            .await
            .unwrap();
        assert!(near.consistent);
        assert!(near.warning.is_some());

        let far = graph
            .check_character_location_consistency(project, "Marie", "Lyon", 9)
            .await
            .unwrap();
        assert!(!far.consistent);
        assert!(far.issue.unwrap().contains("Paris"));
    }

    #[tokio::test]
    async fn relations_and_possession_appear_in_export() {
        let graph = InMemoryContinuityGraph::new();
        let project = Uuid::new_v4();
        let facts = ContinuityFacts {
            relations: vec![RelationFact {
                from: "Marie".to_string(),
                to: "Luc".to_string(),
                kind: "alliee".to_string(),
                current_state: "confiance".to_string(),
                start_chapter: Some(2),
                ..Default::default()
            }],
            objects: vec![ObjectFact {
                name: "la carte".to_string(),
                current_holder: Some("Luc".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        graph.apply_facts(project, &facts, Some(2)).await.unwrap();
        // Re-applying must not duplicate edges.
        graph.apply_facts(project, &facts, Some(2)).await.unwrap();

        let export = graph.export(project).await.unwrap();
        assert_eq!(export.nodes.len(), 3);
        assert_eq!(export.edges.len(), 2);

        let evolution = graph
            .relationship_evolution(project, "Marie", "Luc")
            .await
            .unwrap();
        assert_eq!(evolution.len(), 1);
        assert_eq!(evolution[0].current_state, "confiance");
        assert_eq!(evolution[0].evolution_history.len(), 1);
    }
}
