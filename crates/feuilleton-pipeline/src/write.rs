//! Beat expansion: turning the plan's scene beats into prose.
//!
//! Strategy ladder, first applicable wins:
//! 1. partial revision (only the last beat is rewritten),
//! 2. distributed fan-out on the task queue's `beats_high` lane,
//! 3. in-process parallel fan-out,
//! 4. sequential with a trailing continuation hint.
//!
//! Beat results are reassembled strictly in beat-index order; failed beats
//! contribute empty text and are counted, never reordered.

use feuilleton::error::{Error, Result};
use feuilleton::llm::{ChatClient, ChatMessage, ChatRequest};
use feuilleton::text::{tail_chars, truncate_chars, word_count};
use feuilleton::types::default_beats;
use feuilleton_tasks::Lane;

use crate::pipeline::WritingPipeline;
use crate::state::PipelineState;

const WRITER_SYSTEM_PROMPT: &str = "Tu es un auteur de fiction feuilleton.";
const CONTINUATION_HINT_CHARS: usize = 1200;

struct BeatBudget {
    target: u32,
    current_words: u32,
    remaining: u32,
    max_words: u32,
}

impl WritingPipeline {
    pub(crate) async fn write_chapter(&self, state: &mut PipelineState) -> Result<()> {
        let beats = state
            .current_plan
            .as_ref()
            .map(|plan| plan.scene_beats.clone())
            .filter(|beats| !beats.is_empty())
            .unwrap_or_else(default_beats);

        let target = state.target_word_count;
        let min_beat_words = self.settings.write_min_beat_words;
        let per_beat_target = min_beat_words
            .max((f64::from(target) / beats.len() as f64 * 0.85) as u32);

        let base_prompt = self.build_base_prompt(state);
        let beat_outline = build_beats_outline(&beats);
        state.failed_beats = 0;

        // 1. Partial revision: keep everything but the final beat.
        if self.settings.write_partial_revision
            && state.revision_count > 0
            && !state.beat_texts.is_empty()
            && state.beat_texts.len() == beats.len()
        {
            let kept = &state.beat_texts[..state.beat_texts.len() - 1];
            let previous_block = build_previous_beats_block(
                kept,
                self.settings.write_previous_beats_max_chars,
            );
            let current_words = word_count(&kept.join("\n\n"));
            let remaining = target.saturating_sub(current_words);
            let budget = BeatBudget {
                target: min_beat_words.max(if remaining == 0 { per_beat_target } else { remaining }),
                current_words,
                remaining,
                max_words: state.max_word_count,
            };
            let prompt = build_beat_prompt(
                &base_prompt,
                &beat_outline,
                &beats[beats.len() - 1],
                beats.len() - 1,
                beats.len(),
                &budget,
                "Assume les scenes precedentes deja ecrites. Commence directement cette scene.",
                Some(&previous_block),
            );
            let part = self
                .call_writer(&prompt, budget.target)
                .await
                .map_err(|err| err.trace(state.project_id, Some(state.chapter_index), "write_chapter"))?;
            let mut updated = state.beat_texts.clone();
            if !part.is_empty() {
                if let Some(last) = updated.last_mut() {
                    *last = part;
                }
            }
            state.chapter_text = join_beats(&updated);
            state.beat_texts = updated;
            return Ok(());
        }

        // 2. Distributed fan-out across queue workers.
        if self.settings.write_distributed_beats && beats.len() > 1 {
            if let Some(queue) = &self.queue {
                match self
                    .write_beats_distributed(queue, &base_prompt, &beat_outline, &beats, state, per_beat_target)
                    .await
                {
                    Ok((beat_texts, failed)) => {
                        state.failed_beats = failed;
                        state.chapter_text = join_beats(&beat_texts);
                        state.beat_texts = beat_texts;
                        return Ok(());
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "distributed beats failed, falling back");
                    }
                }
            }
        }

        // 3. In-process parallel fan-out.
        if self.settings.write_parallel_beats && beats.len() > 1 {
            let beat_futures: Vec<_> = beats
                .iter()
                .enumerate()
                .map(|(index, beat)| {
                    let current_words = per_beat_target * index as u32;
                    let remaining = target.saturating_sub(current_words);
                    let budget = BeatBudget {
                        target: min_beat_words
                            .max(per_beat_target.min(if remaining == 0 { per_beat_target } else { remaining })),
                        current_words,
                        remaining,
                        max_words: state.max_word_count,
                    };
                    let prompt = build_beat_prompt(
                        &base_prompt,
                        &beat_outline,
                        beat,
                        index,
                        beats.len(),
                        &budget,
                        "Assume les scenes precedentes deja ecrites. Commence directement cette scene.",
                        None,
                    );
                    let beat_target = budget.target;
                    async move { self.call_writer(&prompt, beat_target).await }
                })
                .collect();
            let results = futures::future::join_all(beat_futures).await;
            let mut beat_texts = Vec::with_capacity(results.len());
            for result in results {
                match result {
                    Ok(part) => beat_texts.push(part),
                    Err(err) => {
                        tracing::warn!(error = %err, "beat generation failed");
                        state.failed_beats += 1;
                        beat_texts.push(String::new());
                    }
                }
            }
            state.chapter_text = join_beats(&beat_texts);
            state.beat_texts = beat_texts;
            return Ok(());
        }

        // 4. Sequential fallback with continuation hints and early stop.
        let mut content = String::new();
        let mut beat_texts = Vec::new();
        for (index, beat) in beats.iter().enumerate() {
            let beats_left = (beats.len() - index) as u32;
            let current_words = word_count(&content);
            let remaining = target.saturating_sub(current_words);
            let beat_target = if remaining == 0 {
                min_beat_words.max(per_beat_target / 2)
            } else {
                min_beat_words.max(per_beat_target.min(remaining / beats_left.max(1)))
            };
            let budget = BeatBudget {
                target: beat_target,
                current_words,
                remaining,
                max_words: state.max_word_count,
            };
            let hint = tail_chars(&content, CONTINUATION_HINT_CHARS).to_string();
            let prompt = build_beat_prompt(
                &base_prompt,
                &beat_outline,
                beat,
                index,
                beats.len(),
                &budget,
                &hint,
                None,
            );
            let part = self
                .call_writer(&prompt, beat_target)
                .await
                .map_err(|err| err.trace(state.project_id, Some(state.chapter_index), "write_chapter"))?;
            if part.is_empty() {
                break;
            }
            if content.is_empty() {
                content = part.clone();
            } else {
                content = format!("{content}\n\n{part}");
            }
            beat_texts.push(part);
            let words = word_count(&content);
            if f64::from(words) >= f64::from(target) * self.settings.write_early_stop_ratio {
                break;
            }
        }
        state.chapter_text = content;
        state.beat_texts = beat_texts;
        Ok(())
    }

    async fn write_beats_distributed(
        &self,
        queue: &std::sync::Arc<feuilleton_tasks::TaskQueue>,
        base_prompt: &str,
        beat_outline: &str,
        beats: &[String],
        state: &PipelineState,
        per_beat_target: u32,
    ) -> Result<(Vec<String>, u32)> {
        let min_beat_words = self.settings.write_min_beat_words;
        let soft_limit = self.settings.beat_soft_time_limit;
        let receivers: Vec<_> = beats
            .iter()
            .enumerate()
            .map(|(index, beat)| {
                let current_words = per_beat_target * index as u32;
                let remaining = state.target_word_count.saturating_sub(current_words);
                let budget = BeatBudget {
                    target: min_beat_words
                        .max(per_beat_target.min(if remaining == 0 { per_beat_target } else { remaining })),
                    current_words,
                    remaining,
                    max_words: state.max_word_count,
                };
                let prompt = build_beat_prompt(
                    base_prompt,
                    beat_outline,
                    beat,
                    index,
                    beats.len(),
                    &budget,
                    "Assume les scenes precedentes deja ecrites. Commence directement cette scene.",
                    None,
                );
                let llm = self.llm.clone();
                let beat_target = budget.target;
                let max_tokens = self.max_tokens_for_words(beat_target);
                queue.submit(Lane::BeatsHigh, async move {
                    // Soft limit: an overdue beat yields empty content so
                    // the assembly barrier can proceed.
                    let request = ChatRequest::new(vec![
                        ChatMessage::system(WRITER_SYSTEM_PROMPT),
                        ChatMessage::user(prompt),
                    ])
                    .with_temperature(0.7)
                    .with_max_tokens(max_tokens);
                    match tokio::time::timeout(soft_limit, llm.chat(request)).await {
                        Ok(Ok(response)) => Some(response.content.trim().to_string()),
                        Ok(Err(err)) => {
                            tracing::warn!(beat = index, error = %err, "distributed beat failed");
                            None
                        }
                        Err(_) => {
                            tracing::warn!(beat = index, "distributed beat hit soft limit");
                            None
                        }
                    }
                })
            })
            .collect();

        // Chord barrier with a chapter-level deadline; on miss the caller
        // falls back to in-process generation.
        let barrier = futures::future::join_all(receivers);
        let outcomes = tokio::time::timeout(self.settings.distributed_chapter_timeout, barrier)
            .await
            .map_err(|_| Error::Cancelled {
                phase: "write_chapter.distributed".to_string(),
            })?;

        let mut beat_texts = Vec::with_capacity(beats.len());
        let mut failed = 0u32;
        for outcome in outcomes {
            match outcome {
                Ok(Some(part)) if !part.is_empty() => beat_texts.push(part),
                _ => {
                    failed += 1;
                    beat_texts.push(String::new());
                }
            }
        }
        Ok((beat_texts, failed))
    }

    async fn call_writer(&self, prompt: &str, beat_target: u32) -> Result<String> {
        let request = ChatRequest::new(vec![
            ChatMessage::system(WRITER_SYSTEM_PROMPT),
            ChatMessage::user(prompt.to_string()),
        ])
        .with_temperature(0.7)
        .with_max_tokens(self.max_tokens_for_words(beat_target));
        let response = self.llm.chat(request).await?;
        Ok(response.content.trim().to_string())
    }

    pub(crate) fn max_tokens_for_words(&self, words: u32) -> u32 {
        let estimated = (f64::from(words) * self.settings.write_tokens_per_word) as u32 + 200;
        estimated.min(self.settings.write_max_tokens)
    }

    /// Shared prefix of every beat prompt: concept, constraints, bible,
    /// memory, style, RAG excerpts, and revision notes.
    fn build_base_prompt(&self, state: &PipelineState) -> String {
        let plan = state.current_plan.clone().unwrap_or_default();
        let concept = &state.project_context.project.metadata.concept;

        let mut prompt = format!(
            "Ecris en francais le chapitre suivant d'un roman feuilleton. \
             Si des informations ci-dessous sont en anglais, adapte-les en francais. \
             Paragraphes courts pour lecture mobile. Termine par un cliffhanger fort \
             et une phrase complete.\n\
             Objectif principal: environ {} mots.\n\
             Objectif: {}-{} mots. Reste dans cette plage.\n\
             Titre du chapitre: {}\n\
             Resume du chapitre: {}\n\
             Enjeu emotionnel: {}\n\
             Emotion cible: {}\n\
             Type de cliffhanger: {}\n\
             Premisse: {}\n\
             Ton: {}\n\
             Tropes: {}\n",
            state.target_word_count,
            state.min_word_count,
            state.max_word_count,
            state.chapter_title,
            state.chapter_summary,
            state.chapter_emotional_stake,
            plan.target_emotion,
            plan.cliffhanger_type,
            concept.premise,
            concept.tone,
            concept.tropes.join(", "),
        );

        if !plan.required_plot_points.is_empty() {
            prompt.push_str("Points d'intrigue requis:\n");
            for point in &plan.required_plot_points {
                prompt.push_str(&format!("- {point}\n"));
            }
        }
        if !plan.forbidden_actions.is_empty() {
            prompt.push_str("Actions interdites:\n");
            for action in &plan.forbidden_actions {
                prompt.push_str(&format!("- {action}\n"));
            }
        }
        if !plan.success_criteria.is_empty() {
            prompt.push_str(&format!("Criteres de succes: {}\n", plan.success_criteria));
        }

        let bible_block = state.project_context.project.metadata.story_bible.context_block();
        let bible_block = truncate_chars(&bible_block, self.settings.story_bible_max_chars);
        if !bible_block.is_empty() {
            prompt.push_str(&format!("Story bible (regles critiques):\n{bible_block}\n"));
        }

        let memory_block = truncate_chars(&state.memory_context, self.settings.memory_context_max_chars);
        prompt.push_str(&format!("Contexte memoire:\n{memory_block}\n"));

        let style_block: String = state.style_chunks.iter().take(3).cloned().collect::<Vec<_>>().join("\n");
        let style_block = truncate_chars(&style_block, self.settings.style_context_max_chars);
        if !style_block.is_empty() {
            prompt.push_str(&format!("References de style:\n{style_block}\n"));
        }

        let rag_block: String = state
            .retrieved_chunks
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n\n");
        let rag_block = truncate_chars(&rag_block, self.settings.rag_context_max_chars);
        if !rag_block.is_empty() {
            prompt.push_str(&format!("Extraits pertinents:\n{rag_block}\n"));
        }

        // Revision notes: critic feedback plus the plot-point verdicts from
        // the previous iteration.
        let mut notes: Vec<String> = state.critique_feedback.clone();
        let plot = &state.continuity_validation.plot_point_validation;
        if !plot.missing_points.is_empty() {
            notes.push(format!(
                "POINTS D'INTRIGUE MANQUANTS A AJOUTER: {}",
                plot.missing_points.join(", ")
            ));
        }
        if !plot.forbidden_violations.is_empty() {
            notes.push(format!(
                "ACTIONS INTERDITES A EVITER: {}",
                plot.forbidden_violations.join(", ")
            ));
        }
        if let Some(instruction) = &state.chapter_instruction {
            notes.push(instruction.clone());
        }
        if !notes.is_empty() {
            prompt.push_str("Axes de revision:\n");
            for note in &notes {
                prompt.push_str(&format!("- {note}\n"));
            }
        }
        prompt
    }
}

fn join_beats(beat_texts: &[String]) -> String {
    beat_texts
        .iter()
        .filter(|text| !text.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_beats_outline(beats: &[String]) -> String {
    let mut outline = String::from("Plan des scenes:\n");
    for (index, beat) in beats.iter().enumerate() {
        outline.push_str(&format!("{}. {beat}\n", index + 1));
    }
    outline
}

fn build_previous_beats_block(beats: &[String], max_chars: usize) -> String {
    let joined = beats.join("\n\n");
    tail_chars(&joined, max_chars).to_string()
}

#[allow(clippy::too_many_arguments)]
fn build_beat_prompt(
    base_prompt: &str,
    beat_outline: &str,
    beat: &str,
    beat_index: usize,
    total_beats: usize,
    budget: &BeatBudget,
    continuation_hint: &str,
    previous_block: Option<&str>,
) -> String {
    let mut prompt = format!(
        "{base_prompt}\n{beat_outline}\n\
         Scene a ecrire ({}/{total_beats}): {beat}\n\
         Mots deja ecrits: {}. Mots restants vises: {}.\n\
         Objectif pour cette scene: environ {} mots. \
         Ne depasse jamais {} mots au total.\n",
        beat_index + 1,
        budget.current_words,
        budget.remaining,
        budget.target,
        budget.max_words,
    );
    if let Some(previous) = previous_block {
        prompt.push_str(&format!("Scenes precedentes (extraits):\n{previous}\n"));
    }
    if !continuation_hint.is_empty() {
        prompt.push_str(&format!("Suite directe de:\n{continuation_hint}\n"));
    }
    prompt.push_str("Termine sur une phrase complete.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outline_numbers_beats_from_one() {
        let outline = build_beats_outline(&["a".to_string(), "b".to_string()]);
        assert!(outline.contains("1. a"));
        assert!(outline.contains("2. b"));
    }

    #[test]
    fn previous_block_keeps_the_tail() {
        let beats = vec!["x".repeat(3000), "fin".to_string()];
        let block = build_previous_beats_block(&beats, 100);
        assert!(block.len() <= 100);
        assert!(block.ends_with("fin"));
    }

    #[test]
    fn empty_beats_are_dropped_from_assembly() {
        let joined = join_beats(&[
            "scene 1".to_string(),
            String::new(),
            "scene 3".to_string(),
        ]);
        assert_eq!(joined, "scene 1\n\nscene 3");
    }

    #[test]
    fn beat_prompt_carries_budget_and_hint() {
        let budget = BeatBudget {
            target: 200,
            current_words: 150,
            remaining: 450,
            max_words: 800,
        };
        let prompt = build_beat_prompt(
            "BASE",
            "OUTLINE",
            "la poursuite",
            1,
            3,
            &budget,
            "elle ouvrit la porte",
            None,
        );
        assert!(prompt.contains("Scene a ecrire (2/3): la poursuite"));
        assert!(prompt.contains("environ 200 mots"));
        assert!(prompt.contains("Ne depasse jamais 800 mots"));
        assert!(prompt.contains("Suite directe de:\nelle ouvrit la porte"));
        assert!(prompt.ends_with("Termine sur une phrase complete."));
    }
}
