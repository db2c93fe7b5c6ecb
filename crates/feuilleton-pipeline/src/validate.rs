//! Continuity validation: LLM analyst and graph validator run concurrently,
//! results are fused, suppressed contradictions filtered, plot points
//! checked, and new severe issues tracked on the project.

use feuilleton::error::{Error, Result};
use feuilleton::llm::{chat_json, ChatMessage, ChatRequest};
use feuilleton::stores::update_project_metadata;
use feuilleton::text::truncate_chars;
use feuilleton::types::{
    ContinuityAnalysis, ContinuityValidation, GraphIssue, PlotPointValidation, Severity,
    StoryBible, TrackedContradiction, ValidationIssue,
};
use feuilleton_coherence::{Agent, AgentContext, AgentTask};

use crate::pipeline::WritingPipeline;
use crate::state::PipelineState;

impl WritingPipeline {
    pub(crate) async fn validate_continuity(&self, state: &mut PipelineState) -> Result<()> {
        if state.chapter_text.is_empty() {
            state.continuity_validation = ContinuityValidation {
                severe_issues: vec![ValidationIssue::new(
                    "missing_content",
                    "No chapter text to validate.",
                    Severity::Medium,
                )],
                coherence_score: 0.0,
                blocking: false,
                ..Default::default()
            };
            return Ok(());
        }

        let chapter_text =
            truncate_chars(&state.chapter_text, self.settings.validation_max_chars).to_string();
        let memory_context =
            truncate_chars(&state.memory_context, self.settings.memory_context_max_chars)
                .to_string();
        let previous_chapters = self.previous_chapter_texts(state, 5).await?;

        let agent_context = AgentContext {
            story_bible: state.project_context.project.metadata.story_bible.clone(),
        };
        let analyst_task = self.analyst.execute(
            AgentTask::AnalyzeChapter {
                chapter_text: chapter_text.clone(),
                memory_context,
                previous_chapters,
            },
            &agent_context,
        );
        let graph_task = self.validate_with_graph(state);
        let (analyst_result, graph_result) = tokio::join!(analyst_task, graph_task);

        let analysis = match analyst_result {
            Ok(outcome) => outcome.analysis,
            Err(err) if matches!(err, Error::LlmUnavailable(_) | Error::CircuitOpen { .. }) => {
                return Err(err.trace(
                    state.project_id,
                    Some(state.chapter_index),
                    "validate_continuity",
                ));
            }
            Err(err) => {
                tracing::warn!(error = %err, "analyst failed, continuing with graph only");
                ContinuityAnalysis::default()
            }
        };
        let graph_issues = graph_result.unwrap_or_default();

        let mut validation = transform_analysis(analysis);
        fuse_graph_issues(&mut validation, graph_issues);

        // Drop anything the project already resolved or declared
        // intentional, and anything a story-bible intentional mystery
        // covers, before plot points are considered. The analyst filters
        // its own output against mysteries; graph issues get theirs here.
        let suppressed = state
            .project_context
            .project
            .metadata
            .suppressed_contradictions();
        validation.filter_suppressed(&suppressed);
        filter_mystery_covered(
            &mut validation,
            &state.project_context.project.metadata.story_bible,
        );

        // Plot-point coverage.
        let plan = state.current_plan.clone().unwrap_or_default();
        if !plan.required_plot_points.is_empty() || !plan.forbidden_actions.is_empty() {
            let plot = self
                .validate_plot_points(
                    &chapter_text,
                    &plan.required_plot_points,
                    &plan.forbidden_actions,
                )
                .await?;
            for missing in &plot.missing_points {
                validation.severe_issues.push(
                    ValidationIssue::new(
                        "missing_plot_point",
                        format!("Point d'intrigue requis absent: {missing}"),
                        Severity::Critical,
                    )
                    .with_source("plot_point_validation"),
                );
            }
            for violation in &plot.forbidden_violations {
                validation.severe_issues.push(
                    ValidationIssue::new(
                        "forbidden_action",
                        format!("Action interdite presente: {violation}"),
                        Severity::Critical,
                    )
                    .with_source("plot_point_validation"),
                );
            }
            if !plot.is_clean() {
                validation.blocking = true;
            }
            validation.plot_point_validation = plot;
        }

        // Track new severe issues on the project (deduplicated by detail).
        self.track_contradictions(state, &validation).await;

        state.continuity_alerts = build_alerts(&validation);
        state.continuity_validation = validation;

        if let Some(gates) = &self.coherence_gates {
            gates.run(state).await?;
        }
        Ok(())
    }

    /// Graph checks for every known character textually present in the
    /// chapter, plus orphaned plot threads. Degrades to empty on a graph
    /// outage.
    async fn validate_with_graph(&self, state: &PipelineState) -> Result<Vec<GraphIssue>> {
        let graph = self.memory.graph();
        let continuity = &state.project_context.project.metadata.continuity;
        let mentioned: Vec<String> = continuity
            .characters
            .iter()
            .filter(|character| state.chapter_text.contains(character.name.as_str()))
            .map(|character| character.name.clone())
            .collect();

        let mut issues = Vec::new();
        for name in mentioned {
            match graph
                .detect_character_contradictions(state.project_id, &name)
                .await
            {
                Ok(found) => issues.extend(found),
                Err(err) if err.is_degraded_store() => {
                    tracing::warn!(error = %err, "graph validation degraded");
                    return Ok(Vec::new());
                }
                Err(err) => return Err(err),
            }
        }

        match graph
            .find_orphaned_plot_threads(state.project_id, state.chapter_index)
            .await
        {
            Ok(orphans) => {
                for orphan in orphans {
                    issues.push(GraphIssue {
                        kind: "orphaned_thread".to_string(),
                        detail: format!(
                            "Fil narratif abandonne: {} (dernier chapitre {})",
                            orphan.event,
                            orphan.last_mentioned.unwrap_or(0)
                        ),
                        severity: Severity::Medium,
                        source: "continuity_graph".to_string(),
                    });
                }
            }
            Err(err) if err.is_degraded_store() => {
                tracing::warn!(error = %err, "orphan scan degraded");
            }
            Err(err) => return Err(err),
        }
        Ok(issues)
    }

    async fn validate_plot_points(
        &self,
        chapter_text: &str,
        required: &[String],
        forbidden: &[String],
    ) -> Result<PlotPointValidation> {
        if required.is_empty() && forbidden.is_empty() {
            return Ok(PlotPointValidation::default());
        }
        let prompt = format!(
            "Verifie la couverture des points d'intrigue dans ce chapitre.\n\
             POINTS REQUIS (doivent apparaitre):\n{}\n\
             ACTIONS INTERDITES (ne doivent PAS apparaitre):\n{}\n\n\
             CHAPITRE:\n{}\n\n\
             Retourne un JSON avec: covered_points, missing_points, \
             forbidden_violations, coverage_score (0-1), explanation. \
             missing_points ne peut contenir que des points requis.",
            if required.is_empty() { "aucun".to_string() } else { required.join("\n") },
            if forbidden.is_empty() { "aucune".to_string() } else { forbidden.join("\n") },
            chapter_text
        );
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)])
            .with_temperature(0.1)
            .with_max_tokens(600);
        let mut plot: PlotPointValidation = match chat_json(self.llm.as_ref(), request).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(Error::LlmBadFormat(message)) => {
                tracing::warn!(%message, "plot validation payload unusable");
                PlotPointValidation::default()
            }
            Err(err) => return Err(err),
        };
        // Invariants: missing ⊆ required, missing ∩ covered = ∅,
        // violations ⊆ forbidden.
        let covered = plot.covered_points.clone();
        plot.missing_points
            .retain(|point| required.contains(point) && !covered.contains(point));
        plot.forbidden_violations
            .retain(|violation| forbidden.contains(violation));
        Ok(plot)
    }

    async fn previous_chapter_texts(
        &self,
        state: &PipelineState,
        limit: u32,
    ) -> Result<Vec<String>> {
        if state.chapter_index <= 1 {
            return Ok(Vec::new());
        }
        let first = state.chapter_index.saturating_sub(limit).max(1);
        let mut excerpts = Vec::new();
        for index in first..state.chapter_index {
            if let Some(chapter) = self
                .chapters
                .chapter_by_index(state.project_id, index)
                .await?
            {
                if !chapter.content.is_empty() {
                    excerpts.push(format!(
                        "[Chapitre {index}]\n{}",
                        truncate_chars(&chapter.content, 2000)
                    ));
                }
            }
        }
        Ok(excerpts)
    }

    /// Append every severe issue with a non-empty detail to the project's
    /// tracked contradictions (deduplicated by description).
    async fn track_contradictions(&self, state: &PipelineState, validation: &ContinuityValidation) {
        let new_issues: Vec<(String, String, Severity)> = validation
            .severe_issues
            .iter()
            .filter(|issue| !issue.detail.trim().is_empty())
            .map(|issue| {
                (
                    issue.kind.clone(),
                    issue.detail.clone(),
                    Severity::parse(&issue.severity),
                )
            })
            .collect();
        if new_issues.is_empty() {
            return;
        }
        let chapter_index = state.chapter_index;
        let result = update_project_metadata(
            self.projects.as_ref(),
            state.project_id,
            state.user_id,
            |metadata| {
                for (kind, detail, severity) in &new_issues {
                    match metadata
                        .tracked_contradictions
                        .iter_mut()
                        .find(|tracked| tracked.description == *detail)
                    {
                        Some(existing) => {
                            if !existing.affected_chapters.contains(&chapter_index) {
                                existing.affected_chapters.push(chapter_index);
                            }
                        }
                        None => metadata.tracked_contradictions.push(
                            TrackedContradiction::auto(
                                kind.clone(),
                                *severity,
                                detail.clone(),
                                Some(chapter_index),
                            ),
                        ),
                    }
                }
            },
        )
        .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to persist tracked contradictions");
        }
    }
}

fn push_issue(
    validation: &mut ContinuityValidation,
    kind: &str,
    detail: String,
    severity_raw: &str,
    suggested_fix: String,
) {
    let severity = Severity::parse(severity_raw);
    let mut issue = ValidationIssue::new(kind, detail, severity).with_source("consistency_analyst");
    issue.suggested_fix = suggested_fix;
    if severity.is_severe() {
        validation.severe_issues.push(issue);
    } else {
        validation.minor_issues.push(issue);
    }
}

/// Normalize the analyst output into the fused validation shape.
fn transform_analysis(analysis: ContinuityAnalysis) -> ContinuityValidation {
    let mut validation = ContinuityValidation {
        coherence_score: analysis.overall_coherence_score.unwrap_or(7.0),
        summary: analysis.summary,
        blocking_issues: analysis.blocking_issues,
        ..Default::default()
    };

    for contradiction in analysis.contradictions {
        let kind = if contradiction.kind.is_empty() {
            "contradiction".to_string()
        } else {
            contradiction.kind
        };
        push_issue(
            &mut validation,
            &kind,
            contradiction.description,
            &contradiction.severity,
            contradiction.suggested_fix,
        );
    }
    for timeline in analysis.timeline_issues {
        push_issue(
            &mut validation,
            "timeline",
            timeline.issue,
            &timeline.severity,
            timeline.suggested_fix,
        );
    }
    for character in analysis.character_inconsistencies {
        let detail = format!(
            "{}: {}",
            if character.character.is_empty() {
                "Unknown"
            } else {
                &character.character
            },
            character.issue
        );
        let severity = Severity::parse(&character.severity);
        let mut issue =
            ValidationIssue::new("character", detail, severity).with_source("consistency_analyst");
        issue.previous_state = character.previous_state;
        issue.current_state = character.current_state;
        issue.suggested_fix = character.suggested_fix;
        if severity.is_severe() {
            validation.severe_issues.push(issue);
        } else {
            validation.minor_issues.push(issue);
        }
    }
    for rule in analysis.world_rule_violations {
        push_issue(
            &mut validation,
            "world_rule",
            format!("Regle violee: {} - {}", rule.rule, rule.violation),
            &rule.severity,
            rule.suggested_fix,
        );
    }

    validation.blocking = validation
        .severe_issues
        .iter()
        .any(ValidationIssue::is_blocking);
    validation
}

/// Drop every issue an intentional mystery covers, whatever its source,
/// and clear `blocking` when nothing blocking remains.
fn filter_mystery_covered(validation: &mut ContinuityValidation, bible: &StoryBible) {
    if bible.intentional_mysteries.is_empty() {
        return;
    }
    validation
        .severe_issues
        .retain(|issue| !bible.mystery_covers(&issue.detail));
    validation
        .minor_issues
        .retain(|issue| !bible.mystery_covers(&issue.detail));
    validation
        .graph_issues
        .retain(|issue| !bible.mystery_covers(&issue.detail));
    if validation.blocking
        && validation.severe_issues.is_empty()
        && validation.plot_point_validation.is_clean()
    {
        validation.blocking = false;
    }
}

/// Critical graph issues block; high ones are severe; the rest are minor.
fn fuse_graph_issues(validation: &mut ContinuityValidation, graph_issues: Vec<GraphIssue>) {
    for issue in &graph_issues {
        let payload = ValidationIssue::new(issue.kind.clone(), issue.detail.clone(), issue.severity)
            .with_source(if issue.source.is_empty() {
                "continuity_graph".to_string()
            } else {
                issue.source.clone()
            });
        if issue.severity.is_severe() {
            if issue.severity == Severity::Critical {
                validation.blocking = true;
            }
            validation.severe_issues.push(payload);
        } else {
            validation.minor_issues.push(payload);
        }
    }
    validation.graph_issues = graph_issues;
}

fn build_alerts(validation: &ContinuityValidation) -> Vec<String> {
    let mut alerts = Vec::new();
    for issue in &validation.severe_issues {
        alerts.push(format!("[{}] {}", issue.kind, issue.detail));
    }
    for issue in &validation.graph_issues {
        if issue.kind == "orphaned_thread" {
            alerts.push(issue.detail.clone());
        }
    }
    alerts
}
