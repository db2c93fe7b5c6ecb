//! Three-level summary pyramid.
//!
//! L1: 2–3 sentence per-chapter summaries stored on the chapter metadata,
//! generated lazily. L2: ~500-word per-arc summaries refreshed every 5
//! chapters or at an arc boundary. L3: ~1000-word global synopsis refreshed
//! every 10 approved chapters.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::Settings;
use crate::error::Result;
use crate::llm::{ChatClient, ChatMessage, ChatRequest};
use crate::stores::{update_project_metadata, ChapterPatch, ChapterRepository, ProjectRepository};
use crate::types::{Chapter, Project};

pub struct RecursiveMemory {
    llm: Arc<dyn ChatClient>,
    projects: Arc<dyn ProjectRepository>,
    chapters: Arc<dyn ChapterRepository>,
    settings: Arc<Settings>,
}

impl RecursiveMemory {
    #[must_use]
    pub fn new(
        llm: Arc<dyn ChatClient>,
        projects: Arc<dyn ProjectRepository>,
        chapters: Arc<dyn ChapterRepository>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            llm,
            projects,
            chapters,
            settings,
        }
    }

    /// Working context for a chapter: global synopsis, the current arc's
    /// summary, then detailed summaries of the recent chapters.
    pub async fn build_context(&self, project: &Project, current_chapter: u32) -> Result<String> {
        let mut blocks: Vec<String> = Vec::new();

        let synopsis = &project.metadata.recursive_memory.global_synopsis;
        if !synopsis.is_empty() {
            blocks.push(format!("SYNOPSIS GLOBAL:\n{synopsis}"));
        }

        if let Some(plan) = &project.metadata.plan {
            if let Some(arc) = plan.data.arc_for_chapter(current_chapter) {
                if let Some(summary) = project.metadata.recursive_memory.arc_summaries.get(&arc.name)
                {
                    blocks.push(format!("ARC EN COURS ({}):\n{summary}", arc.name));
                }
            }
        }

        let recent = self
            .recent_chapter_summaries(project.id, current_chapter)
            .await?;
        if !recent.is_empty() {
            blocks.push(format!("CHAPITRES RECENTS:\n{}", recent.join("\n")));
        }

        Ok(blocks.join("\n\n"))
    }

    /// Refresh the pyramid after an approval.
    pub async fn update_after_chapter(
        &self,
        project_id: Uuid,
        owner: Uuid,
        chapter_index: u32,
    ) -> Result<()> {
        let approved = self.chapters.list_approved(project_id).await?;
        let approved_count = approved.len() as u32;
        let project = self.projects.get(project_id, owner).await?;

        let mut new_arc_summary: Option<(String, String)> = None;
        if let Some(plan) = &project.metadata.plan {
            if let Some(arc) = plan.data.arc_for_chapter(chapter_index) {
                let last_mark = project
                    .metadata
                    .recursive_memory
                    .arc_summary_marks
                    .get(&arc.name)
                    .copied()
                    .unwrap_or(0);
                let at_boundary = chapter_index == arc.end_chapter;
                if at_boundary || approved_count >= last_mark + 5 {
                    let arc_chapters: Vec<&Chapter> = approved
                        .iter()
                        .filter(|chapter| {
                            let index = chapter.chapter_index();
                            arc.start_chapter <= index && index <= arc.end_chapter
                        })
                        .collect();
                    let summary = self.generate_arc_summary(arc, &arc_chapters).await?;
                    new_arc_summary = Some((arc.name.clone(), summary));
                }
            }
        }

        let mut new_synopsis: Option<String> = None;
        let synopsis_mark = project.metadata.recursive_memory.synopsis_chapter_count;
        if approved_count >= synopsis_mark + 10 {
            new_synopsis = Some(self.generate_global_synopsis(&project, &approved).await?);
        }

        if new_arc_summary.is_none() && new_synopsis.is_none() {
            return Ok(());
        }

        update_project_metadata(self.projects.as_ref(), project_id, owner, |metadata| {
            if let Some((arc_name, summary)) = &new_arc_summary {
                metadata
                    .recursive_memory
                    .arc_summaries
                    .insert(arc_name.clone(), summary.clone());
                metadata
                    .recursive_memory
                    .arc_summary_marks
                    .insert(arc_name.clone(), approved_count);
            }
            if let Some(synopsis) = &new_synopsis {
                metadata.recursive_memory.global_synopsis = synopsis.clone();
                metadata.recursive_memory.synopsis_chapter_count = approved_count;
            }
        })
        .await?;
        Ok(())
    }

    /// L1 summaries of the chapters just before `current_chapter`, generated
    /// and stored lazily when a chapter has none.
    async fn recent_chapter_summaries(
        &self,
        project_id: Uuid,
        current_chapter: u32,
    ) -> Result<Vec<String>> {
        let window = self.settings.recursive_memory_recent_chapters as u32;
        let first = current_chapter.saturating_sub(window).max(1);
        let mut summaries = Vec::new();
        for index in first..current_chapter {
            let Some(chapter) = self.chapters.chapter_by_index(project_id, index).await? else {
                continue;
            };
            let summary = match &chapter.metadata.summary {
                Some(summary) if !summary.is_empty() => summary.clone(),
                _ => {
                    let generated = self.generate_chapter_summary(&chapter.content).await?;
                    let mut metadata = chapter.metadata.clone();
                    metadata.summary = Some(generated.clone());
                    self.chapters
                        .update(
                            chapter.id,
                            ChapterPatch {
                                metadata: Some(metadata),
                                ..Default::default()
                            },
                        )
                        .await?;
                    generated
                }
            };
            summaries.push(format!("Ch.{index}: {summary}"));
        }
        Ok(summaries)
    }

    async fn generate_chapter_summary(&self, chapter_text: &str) -> Result<String> {
        let excerpt = crate::text::truncate_chars(chapter_text, 6000);
        let prompt = format!(
            "Resume ce chapitre en 2 a 3 phrases, en francais, \
             en te concentrant sur les evenements et les personnages.\n\n{excerpt}"
        );
        let response = self
            .llm
            .chat(
                ChatRequest::new(vec![ChatMessage::user(prompt)])
                    .with_temperature(0.3)
                    .with_max_tokens(200),
            )
            .await?;
        Ok(response.content.trim().to_string())
    }

    async fn generate_arc_summary(
        &self,
        arc: &crate::types::StoryArc,
        chapters: &[&Chapter],
    ) -> Result<String> {
        let material: Vec<String> = chapters
            .iter()
            .map(|chapter| {
                let summary = chapter
                    .metadata
                    .summary
                    .clone()
                    .unwrap_or_else(|| crate::text::truncate_chars(&chapter.content, 800).to_string());
                format!("Ch.{}: {summary}", chapter.chapter_index())
            })
            .collect();
        let prompt = format!(
            "Redige un resume d'arc narratif d'environ {} mots, en francais.\n\
             Arc: {}\nChapitres couverts:\n{}",
            self.settings.recursive_memory_arc_summary_words,
            arc.name,
            material.join("\n")
        );
        let response = self
            .llm
            .chat(
                ChatRequest::new(vec![ChatMessage::user(prompt)])
                    .with_temperature(0.3)
                    .with_max_tokens(1200),
            )
            .await?;
        Ok(response.content.trim().to_string())
    }

    async fn generate_global_synopsis(
        &self,
        project: &Project,
        approved: &[Chapter],
    ) -> Result<String> {
        let mut material: Vec<String> = Vec::new();
        let existing = &project.metadata.recursive_memory.global_synopsis;
        if !existing.is_empty() {
            material.push(format!("Synopsis precedent:\n{existing}"));
        }
        for summary in project.metadata.recursive_memory.arc_summaries.values() {
            material.push(summary.clone());
        }
        for chapter in approved.iter().rev().take(10) {
            if let Some(summary) = &chapter.metadata.summary {
                material.push(format!("Ch.{}: {summary}", chapter.chapter_index()));
            }
        }
        let prompt = format!(
            "Redige le synopsis global du roman en environ {} mots, en francais, \
             fidele aux elements suivants:\n{}",
            self.settings.recursive_memory_global_synopsis_words,
            material.join("\n")
        );
        let response = self
            .llm
            .chat(
                ChatRequest::new(vec![ChatMessage::user(prompt)])
                    .with_temperature(0.3)
                    .with_max_tokens(2000),
            )
            .await?;
        Ok(response.content.trim().to_string())
    }
}
