//! Chapter planning node and plan pregeneration.

use feuilleton::error::{Error, Result};
use feuilleton::llm::{chat_json, ChatMessage, ChatRequest};
use feuilleton::stores::update_project_metadata;
use feuilleton::text::truncate_chars;
use feuilleton::types::{ChapterPlan, PlanChapter};
use uuid::Uuid;

use crate::pipeline::WritingPipeline;
use crate::state::PipelineState;

impl WritingPipeline {
    /// Resolve the working plan: keep a preset plan, else the pregenerated
    /// cache, else a detailed plan entry, else call the planner LLM.
    /// Plan-entry constraints are merged into the result so they are never
    /// dropped.
    pub(crate) async fn plan_chapter(&self, state: &mut PipelineState) -> Result<()> {
        if state.current_plan.is_some() {
            return Ok(());
        }
        let metadata = &state.project_context.project.metadata;

        if let Some(pregenerated) = metadata.pregenerated_plans.get(&state.chapter_index) {
            tracing::info!(chapter_index = state.chapter_index, "using pregenerated plan");
            state.current_plan = Some(pregenerated.clone());
            return Ok(());
        }

        let plan_entry = metadata
            .plan
            .as_ref()
            .and_then(|plan| plan.data.chapter(state.chapter_index).cloned());
        if let Some(entry) = &plan_entry {
            if entry.has_details() {
                let mut plan = ChapterPlan {
                    scene_beats: entry.scene_beats.clone(),
                    target_emotion: entry.emotional_stake.clone(),
                    cliffhanger_type: entry.cliffhanger_type.clone(),
                    estimated_word_count: entry.estimated_word_count.unwrap_or(0),
                    ..Default::default()
                }
                .normalize(state.chapter_index, Some(state.target_word_count));
                plan.merge_entry_constraints(entry);
                state.current_plan = Some(plan);
                return Ok(());
            }
        }

        let plan = self.plan_with_llm(state, plan_entry.as_ref()).await?;
        state.current_plan = Some(plan);
        Ok(())
    }

    async fn plan_with_llm(
        &self,
        state: &PipelineState,
        plan_entry: Option<&PlanChapter>,
    ) -> Result<ChapterPlan> {
        let project = &state.project_context.project;
        let concept = &project.metadata.concept;
        let global_summary = project
            .metadata
            .plan
            .as_ref()
            .map(|plan| plan.data.global_summary.clone())
            .unwrap_or_default();
        let summaries = &project.metadata.recent_chapter_summaries;
        let summary_block = if summaries.is_empty() {
            "aucun".to_string()
        } else {
            summaries
                .iter()
                .rev()
                .take(5)
                .rev()
                .map(|summary| format!("- {summary}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let memory_block = truncate_chars(
            &state.memory_context,
            self.settings.memory_context_max_chars,
        );

        let mut prompt = format!(
            "Tu es un assistant de planification de romans feuilleton. \
             Reponds en francais uniquement. \
             Retourne un JSON strict avec les cles: chapter_number, scene_beats (3 a 7), \
             target_emotion, required_plot_points, optional_subplots, arc_constraints, \
             forbidden_actions, success_criteria, cliffhanger_type, estimated_word_count. \
             Le cliffhanger doit etre fort et adapte au pay-to-read.\n\
             Genre: {}\nPremisse: {}\nTon: {}\nTropes: {}\n\
             Synopsis global: {global_summary}\nIndex du chapitre: {}\n\
             Resume du chapitre: {}\nEnjeu emotionnel: {}\n\
             Recents resumes:\n{summary_block}\n\
             Contexte memoire:\n{memory_block}\n\
             Si des contraintes du plan global sont fournies, reutilise-les dans les \
             champs correspondants.\nRetourne uniquement le JSON.",
            project.genre,
            concept.premise,
            concept.tone,
            concept.tropes.join(", "),
            state.chapter_index,
            state.chapter_summary,
            state.chapter_emotional_stake,
        );
        if let Some(entry) = plan_entry {
            if !entry.required_plot_points.is_empty() {
                prompt.push_str(&format!(
                    "\nPoints d'intrigue requis (plan global): {}",
                    entry.required_plot_points.join(", ")
                ));
            }
            if !entry.optional_subplots.is_empty() {
                prompt.push_str(&format!(
                    "\nSous-intrigues suggerees (plan global): {}",
                    entry.optional_subplots.join(", ")
                ));
            }
            if !entry.arc_constraints.is_empty() {
                prompt.push_str(&format!(
                    "\nContraintes d'arc (plan global): {}",
                    entry.arc_constraints.join(", ")
                ));
            }
            if !entry.forbidden_actions.is_empty() {
                prompt.push_str(&format!(
                    "\nActions interdites (plan global): {}",
                    entry.forbidden_actions.join(", ")
                ));
            }
            if !entry.success_criteria.is_empty() {
                prompt.push_str(&format!(
                    "\nCriteres de succes (plan global): {}",
                    entry.success_criteria
                ));
            }
        }

        let mut request = ChatRequest::new(vec![ChatMessage::user(prompt)])
            .with_temperature(0.4)
            .with_max_tokens(900);
        if self.should_use_reasoning(state.chapter_index, state.chapter_instruction.as_deref()) {
            request = request.with_model(self.settings.llm_reasoning_model.clone());
        }

        let plan = match chat_json(self.llm.as_ref(), request).await {
            Ok(value) => serde_json::from_value::<ChapterPlan>(value).unwrap_or_default(),
            Err(Error::LlmBadFormat(message)) => {
                tracing::warn!(%message, "planner payload unusable, using default beats");
                ChapterPlan::default()
            }
            Err(err) => {
                return Err(err.trace(state.project_id, Some(state.chapter_index), "plan_chapter"))
            }
        };
        let mut plan = plan.normalize(state.chapter_index, Some(state.target_word_count));
        if let Some(entry) = plan_entry {
            plan.merge_entry_constraints(entry);
        }
        Ok(plan)
    }

    /// Reasoning-model switch: early chapters, a fixed interval, or
    /// reasoning keywords in the user instruction.
    pub(crate) fn should_use_reasoning(&self, chapter_index: u32, instruction: Option<&str>) -> bool {
        if !self.settings.plan_reasoning_enabled {
            return false;
        }
        if chapter_index <= self.settings.plan_reasoning_first_chapters {
            return true;
        }
        let interval = self.settings.plan_reasoning_interval;
        if interval > 0 && chapter_index % interval == 0 {
            return true;
        }
        if let Some(instruction) = instruction {
            let lowered = instruction.to_lowercase();
            return self
                .settings
                .plan_reasoning_keywords
                .iter()
                .any(|keyword| lowered.contains(keyword.as_str()));
        }
        false
    }

    /// Produce plans ahead of time and store them under the project's
    /// pregenerated cache, keyed by chapter index.
    pub async fn pregenerate_plans(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        from_chapter: u32,
        count: u32,
    ) -> Result<Vec<u32>> {
        let mut produced = Vec::new();
        for index in from_chapter..from_chapter + count {
            let context = self.context_builder.build(project_id, user_id).await?;
            context.project.accepted_plan()?;
            if context.project.metadata.pregenerated_plans.contains_key(&index) {
                continue;
            }
            let request = crate::state::GenerateChapterRequest::new(project_id, user_id)
                .with_chapter_index(index);
            let mut state = self.collect_context(&request, context).await?;
            self.retrieve_context(&mut state).await?;
            self.plan_chapter(&mut state).await?;
            let Some(plan) = state.current_plan.clone() else {
                continue;
            };
            update_project_metadata(self.projects.as_ref(), project_id, user_id, |metadata| {
                metadata.pregenerated_plans.insert(index, plan.clone());
            })
            .await?;
            produced.push(index);
        }
        Ok(produced)
    }
}
