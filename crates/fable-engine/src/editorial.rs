//! Editorial convergence loop.
//!
//! Each pass critiques the current chapter, generates a revision
//! conditioned on the critique, and scores how much the text changed.
//! The loop stops when a revision changes less than the configured
//! threshold or the iteration cap is reached — fixed-point iteration with
//! a hard cap, so termination is guaranteed.

use fable_llm::{GenerationSpec, RolePreset};
use fable_types::{ChapterStatus, ChapterUnit, Result};

use crate::convergence::convergence_score;
use crate::events::{EventEmitter, WorkflowEvent};
use crate::retry::{AttemptLog, RetryExecutor};
use crate::validator::{OutputKind, OutputValidator};

#[derive(Debug, Clone, Copy)]
pub struct EditorialOutcome {
    pub iterations: u32,
    pub final_score: f64,
}

/// Stopping rule: converged below `threshold`, or the iteration budget is
/// spent.
pub fn should_stop(score: f64, iterations: u32, threshold: f64, max_iterations: u32) -> bool {
    score < threshold || iterations >= max_iterations
}

/// Run the critique → revise → score loop on a drafted chapter until it
/// converges. On success the chapter is marked Complete; the caller rolls
/// its word count into the project total. Attempt logs for every
/// generation are pushed into `attempt_logs` for error accounting.
pub async fn refine_chapter(
    executor: &RetryExecutor,
    validator: &OutputValidator,
    chapter: &mut ChapterUnit,
    story_arc: &str,
    threshold: f64,
    max_iterations: u32,
    events: &EventEmitter,
    attempt_logs: &mut Vec<AttemptLog>,
) -> Result<EditorialOutcome> {
    loop {
        let previous = chapter.content.clone();

        let critique_op = format!("critique_ch{}", chapter.number);
        let critique_spec = GenerationSpec::new(
            RolePreset::ContinuityEditor,
            format!(
                "Review chapter {} for pacing, character voice consistency, plot \
                 coherence, and prose quality. Focus on big-picture issues, not \
                 line edits.",
                chapter.number
            ),
        )
        .with_context(format!("STORY ARC:\n{story_arc}"))
        .with_context(format!("CHAPTER {}:\n{}", chapter.number, chapter.content));

        let mut critique_log = AttemptLog::new(&critique_op);
        let critique = executor
            .run(
                &critique_op,
                &critique_spec,
                OutputKind::Critique.min_len(),
                OutputKind::Critique,
                validator,
                &mut critique_log,
            )
            .await;
        attempt_logs.push(critique_log);
        let critique = critique?;

        let revision_op = format!("revision_ch{}", chapter.number);
        let revision_spec = GenerationSpec::new(
            RolePreset::StyleEditor,
            format!(
                "Revise chapter {} to implement the editorial feedback while \
                 preserving plot points and the author's voice. Return the full \
                 revised chapter.",
                chapter.number
            ),
        )
        .with_context(format!("ORIGINAL CHAPTER:\n{}", chapter.content))
        .with_context(format!("EDITORIAL FEEDBACK:\n{}", critique.text))
        .with_target_words(chapter.word_count.max(1));

        let mut revision_log = AttemptLog::new(&revision_op);
        let revision = executor
            .run(
                &revision_op,
                &revision_spec,
                OutputKind::Revision.min_len(),
                OutputKind::Revision,
                validator,
                &mut revision_log,
            )
            .await;
        attempt_logs.push(revision_log);
        let revision = revision?;

        chapter.content = revision.text;
        chapter.word_count = chapter.content.split_whitespace().count();
        chapter.editorial_iterations += 1;

        let score = convergence_score(&previous, &chapter.content);
        chapter.convergence_score = score;

        events.emit(WorkflowEvent::EditorialIteration {
            chapter: chapter.number,
            iteration: chapter.editorial_iterations,
            score,
        });
        tracing::info!(
            chapter = chapter.number,
            iteration = chapter.editorial_iterations,
            score,
            "Editorial pass complete"
        );

        if should_stop(score, chapter.editorial_iterations, threshold, max_iterations) {
            chapter.status = ChapterStatus::Complete;
            events.emit(WorkflowEvent::ChapterCompleted {
                chapter: chapter.number,
            });
            return Ok(EditorialOutcome {
                iterations: chapter.editorial_iterations,
                final_score: score,
            });
        }
    }
}
