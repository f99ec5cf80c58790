//! Phase engine — the core workflow state machine.
//!
//! Phases run in a fixed dependency order driven by one loop over an
//! explicit transition table ([`next_phase`]), so every transition is
//! independently testable. The engine is the sole mutator of
//! [`WorkflowState`], checkpointing at every step boundary and after every
//! scene-level unit. Review gates pause the run for an external
//! [`PhaseEngine::resume`] decision.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use fable_llm::{CallCounter, GenerationSpec, Generated, RolePreset};
use fable_types::{
    ChapterStatus, ChapterUnit, EntityBrief, EntityKind, EntityList, ErrorKind, FableError,
    Result, ReviewGate, ReviewGateStatus,
};

use crate::config::WorkflowConfig;
use crate::controller::Interrupter;
use crate::editorial;
use crate::events::{EventEmitter, WorkflowEvent};
use crate::extraction::{parse_chapter_outline, parse_entity_list};
use crate::retry::{AttemptLog, RetryExecutor};
use crate::state::WorkflowState;
use crate::store::{KnowledgeIndex, ProjectSnapshot, ProjectStore};
use crate::validator::{OutputKind, OutputValidator};

// ---------------------------------------------------------------------------
// Phase / RunStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Foundation,
    WorldBuilding,
    Structure,
    AwaitingReview,
    Writing,
    EditorialLoop,
    FinalReview,
    Complete,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Foundation => "foundation",
            Phase::WorldBuilding => "world_building",
            Phase::Structure => "structure",
            Phase::AwaitingReview => "awaiting_review",
            Phase::Writing => "writing",
            Phase::EditorialLoop => "editorial_loop",
            Phase::FinalReview => "final_review",
            Phase::Complete => "complete",
        }
    }
}

/// How a call to [`PhaseEngine::run`] ended. Failures surface as errors,
/// leaving a resumable checkpoint behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Complete,
    AwaitingReview,
    Paused,
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// The transition table: given the phase that just completed and the
/// current state, pick the next phase.
pub fn next_phase(phase: Phase, state: &WorkflowState, config: &WorkflowConfig) -> Phase {
    match phase {
        Phase::Foundation => Phase::WorldBuilding,
        Phase::WorldBuilding => Phase::Structure,
        Phase::Structure => {
            let approved = matches!(
                &state.review_gate,
                Some(gate) if gate.status == ReviewGateStatus::Approved
            );
            if config.gates_phase("structure") && !approved {
                Phase::AwaitingReview
            } else {
                Phase::Writing
            }
        }
        Phase::AwaitingReview => match state.review_gate.as_ref().map(|g| g.status) {
            Some(ReviewGateStatus::Approved) => Phase::Writing,
            Some(ReviewGateStatus::Rejected) => Phase::Structure,
            _ => Phase::AwaitingReview,
        },
        Phase::Writing => {
            if state.next_open_chapter().is_none() {
                Phase::FinalReview
            } else {
                Phase::EditorialLoop
            }
        }
        Phase::EditorialLoop => {
            if state.next_open_chapter().is_none() {
                Phase::FinalReview
            } else {
                Phase::Writing
            }
        }
        Phase::FinalReview => Phase::Complete,
        Phase::Complete => Phase::Complete,
    }
}

// ---------------------------------------------------------------------------
// PhaseEngine
// ---------------------------------------------------------------------------

pub struct PhaseEngine {
    config: WorkflowConfig,
    executor: RetryExecutor,
    validator: OutputValidator,
    store: Arc<dyn ProjectStore>,
    index: Arc<dyn KnowledgeIndex>,
    state: WorkflowState,
    events: EventEmitter,
    interrupter: Arc<Interrupter>,
}

impl PhaseEngine {
    pub fn new(
        config: WorkflowConfig,
        executor: RetryExecutor,
        store: Arc<dyn ProjectStore>,
        index: Arc<dyn KnowledgeIndex>,
        state: WorkflowState,
        interrupter: Arc<Interrupter>,
    ) -> Self {
        // Seed call accounting from the checkpoint so resumed runs keep
        // accumulating.
        let counter = Arc::new(CallCounter::seeded(
            state.total_calls,
            state.provider_usage.clone(),
        ));
        let validator = OutputValidator::new(config.validator.clone());
        Self {
            executor: executor.with_counter(counter),
            validator,
            config,
            store,
            index,
            state,
            events: EventEmitter::default(),
            interrupter,
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Persist current state unconditionally (used by the controller for
    /// emergency checkpoints).
    pub async fn emergency_checkpoint(&mut self) {
        self.sync_counters();
        self.state.checkpoint().await;
    }

    fn sync_counters(&mut self) {
        self.state.total_calls = self.executor.counter().total();
        self.state.provider_usage = self.executor.counter().snapshot();
    }

    /// Resolve a pending review gate and reposition the workflow.
    /// Approval proceeds to writing; rejection routes back to the
    /// structure phase, which re-runs with the feedback attached.
    pub async fn resume(&mut self, approved: bool, feedback: &str) {
        let status = if approved {
            ReviewGateStatus::Approved
        } else {
            ReviewGateStatus::Rejected
        };
        match self.state.review_gate.as_mut() {
            Some(gate) => {
                gate.status = status;
                gate.feedback = feedback.to_string();
            }
            None => {
                let mut gate = ReviewGate::pending("structure");
                gate.status = status;
                gate.feedback = feedback.to_string();
                self.state.review_gate = Some(gate);
            }
        }
        if approved {
            self.state.phase = Phase::Writing;
        } else {
            self.state.phase = Phase::Structure;
            self.state
                .completed_steps
                .retain(|s| s != "chapter_outlining");
        }
        self.state.checkpoint().await;
    }

    /// Drive the workflow until it completes, pauses, hits a review gate,
    /// or fails. Failure leaves a valid checkpoint behind.
    pub async fn run(&mut self) -> Result<RunStatus> {
        loop {
            if self.interrupter.check().await {
                self.sync_counters();
                self.state.checkpoint().await;
                let after = self
                    .state
                    .completed_steps
                    .last()
                    .cloned()
                    .unwrap_or_default();
                self.events
                    .emit(WorkflowEvent::WorkflowPaused { after_step: after });
                tracing::info!(project = %self.state.project_name, "Workflow paused");
                return Ok(RunStatus::Paused);
            }

            let phase = self.state.phase;
            let result = match phase {
                Phase::Complete => {
                    return Ok(RunStatus::Complete);
                }
                Phase::AwaitingReview => {
                    self.events.emit(WorkflowEvent::ReviewGatePending {
                        phase: "structure".into(),
                    });
                    return Ok(RunStatus::AwaitingReview);
                }
                Phase::Foundation => self.run_foundation().await,
                Phase::WorldBuilding => self.run_world_building().await,
                Phase::Structure => self.run_structure().await,
                Phase::Writing => self.run_writing().await,
                Phase::EditorialLoop => self.run_editorial().await,
                Phase::FinalReview => self.run_final_review().await,
            };

            self.sync_counters();
            if let Err(e) = result {
                self.events.emit(WorkflowEvent::WorkflowFailed {
                    step: self.state.failed_step.clone().unwrap_or_default(),
                    error: e.to_string(),
                });
                self.state.checkpoint().await;
                return Err(e);
            }

            self.events.emit(WorkflowEvent::PhaseCompleted {
                phase: phase.name().into(),
            });
            self.state.phase = next_phase(phase, &self.state, &self.config);
            self.state.checkpoint().await;
        }
    }

    /// Run one generation through the retry executor, folding failed
    /// attempts into the state's error log.
    async fn generate(
        &mut self,
        step: &str,
        operation: &str,
        spec: &GenerationSpec,
        kind: OutputKind,
    ) -> Result<Generated> {
        let mut log = AttemptLog::new(operation);
        let result = self
            .executor
            .run(operation, spec, kind.min_len(), kind, &self.validator, &mut log)
            .await;
        for attempt in log.failures() {
            self.state.log_error(
                step,
                attempt.error.clone().unwrap_or_default(),
                attempt.kind.unwrap_or(ErrorKind::Fatal),
            );
        }
        result
    }

    // -----------------------------------------------------------------------
    // Phase: Foundation
    // -----------------------------------------------------------------------

    async fn run_foundation(&mut self) -> Result<()> {
        const STEP: &str = "story_planning";
        if self.state.can_skip(STEP) && self.state.story_arc.is_some() {
            return Ok(());
        }
        self.state.mark_start(STEP).await;
        self.events.emit(WorkflowEvent::StepStarted { step: STEP.into() });

        let spec = GenerationSpec::new(
            RolePreset::StoryArchitect,
            format!(
                "Design the complete story arc for a {} novel of {} chapters.\n\
                 PREMISE: {}\n\
                 Cover act structure, stakes, themes, and the protagonist's arc.",
                self.config.genre, self.config.target_chapters, self.config.premise
            ),
        )
        .with_target_words(2000);

        match self.generate(STEP, STEP, &spec, OutputKind::StoryArc).await {
            Ok(generated) => {
                self.state.story_arc = Some(generated.text);
                self.state.mark_complete(STEP).await;
                self.events
                    .emit(WorkflowEvent::StepCompleted { step: STEP.into() });
                Ok(())
            }
            Err(e) => {
                self.state.mark_failed(STEP, &e).await;
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Phase: WorldBuilding (two-pass)
    // -----------------------------------------------------------------------

    async fn run_world_building(&mut self) -> Result<()> {
        let arc = self.state.story_arc.clone().ok_or_else(|| FableError::PhaseFailed {
            phase: "world_building".into(),
            message: "foundation artifact missing".into(),
        })?;

        // Pass 1: extract the entity roster. A failed or unparseable
        // extraction is not fatal — pass 2 falls back to batched calls.
        const EXTRACT: &str = "entity_extraction";
        if !self.state.can_skip(EXTRACT) {
            self.state.mark_start(EXTRACT).await;
            let spec = GenerationSpec::new(
                RolePreset::EntityExtractor,
                "List every character, location, and significant item this story \
                 needs. Use exactly these sections:\n\
                 ===== MAIN CHARACTERS =====\n1. [NAME] | [ROLE] | [ONE-LINE DESCRIPTION]\n\
                 ===== SUPPORTING CHARACTERS =====\n1. [NAME] | [ROLE] | [ONE-LINE DESCRIPTION]\n\
                 ===== KEY LOCATIONS =====\n1. [NAME] | [TYPE] | [ONE-LINE DESCRIPTION]\n\
                 ===== SIGNIFICANT ITEMS =====\n1. [NAME] | [CATEGORY] | [OWNER] | [ONE-LINE DESCRIPTION]\n\
                 Do not write profiles here; just identify what needs to be created.",
            )
            .with_context(format!("STORY ARC:\n{arc}"));

            match self.generate(EXTRACT, EXTRACT, &spec, OutputKind::EntityList).await {
                Ok(generated) => {
                    self.state.entity_list = parse_entity_list(&generated.text);
                    if self.state.entity_list.is_none() {
                        tracing::warn!("Entity extraction unparseable, using batched fallback");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Entity extraction failed, using batched fallback");
                    self.state
                        .log_error(EXTRACT, e.to_string(), e.kind());
                    self.state.entity_list = None;
                }
            }
            self.state.mark_complete(EXTRACT).await;
        }

        // Pass 2: individual generation with full context, or the batched
        // fallback when no roster is available.
        const STEP: &str = "world_building";
        if self.state.can_skip(STEP) {
            return Ok(());
        }
        self.state.mark_start(STEP).await;

        match self.state.entity_list.clone() {
            Some(list) => self.generate_entities(STEP, &arc, &list).await?,
            None => self.generate_batched(STEP, &arc).await?,
        }

        self.state.mark_complete(STEP).await;
        Ok(())
    }

    async fn generate_entities(&mut self, step: &str, arc: &str, list: &EntityList) -> Result<()> {
        let mut attempted = 0usize;
        let mut succeeded = 0usize;
        let mut created_names: Vec<String> = Vec::new();

        let supporting: Vec<EntityBrief> = list
            .supporting_characters
            .iter()
            .take(self.config.supporting_character_cap)
            .cloned()
            .collect();
        let items: Vec<EntityBrief> = list.items.iter().take(self.config.item_cap).cloned().collect();

        let groups: Vec<(Vec<EntityBrief>, EntityKind, OutputKind)> = vec![
            (
                list.main_characters.clone(),
                EntityKind::Character,
                OutputKind::MainCharacter,
            ),
            (supporting, EntityKind::Character, OutputKind::SupportingCharacter),
            (list.locations.clone(), EntityKind::Location, OutputKind::Location),
            (items, EntityKind::Item, OutputKind::Item),
        ];

        for (briefs, kind, output_kind) in groups {
            for brief in briefs {
                attempted += 1;
                match self
                    .generate_entity(step, arc, &brief, kind, output_kind, &created_names)
                    .await
                {
                    Ok(id) => {
                        succeeded += 1;
                        created_names.push(brief.name.clone());
                        match kind {
                            EntityKind::Character => self.state.characters_created.push(id),
                            EntityKind::Location => self.state.locations_created.push(id),
                            EntityKind::Item => self.state.items_created.push(id),
                        }
                        self.events.emit(WorkflowEvent::EntityGenerated {
                            kind: format!("{kind:?}"),
                            name: brief.name.clone(),
                        });
                    }
                    Err(e) => {
                        // One entity failing after exhausted retries does
                        // not abort the phase.
                        self.state.log_error(
                            step,
                            format!("{:?} '{}': {e}", kind, brief.name),
                            e.kind(),
                        );
                        self.events.emit(WorkflowEvent::EntitySkipped {
                            kind: format!("{kind:?}"),
                            name: brief.name.clone(),
                            error: e.to_string(),
                        });
                    }
                }
                self.sync_counters();
                self.state.checkpoint().await;
            }
        }

        let ratio = if attempted == 0 {
            1.0
        } else {
            succeeded as f64 / attempted as f64
        };
        tracing::info!(succeeded, attempted, ratio, "World building pass 2 finished");

        if ratio < self.config.min_phase_success_ratio {
            let err = FableError::PhaseFailed {
                phase: "world_building".into(),
                message: format!(
                    "entity success ratio {:.0}% below the {:.0}% minimum",
                    ratio * 100.0,
                    self.config.min_phase_success_ratio * 100.0
                ),
            };
            self.state.mark_failed(step, &err).await;
            return Err(err);
        }
        Ok(())
    }

    async fn generate_entity(
        &mut self,
        step: &str,
        arc: &str,
        brief: &EntityBrief,
        kind: EntityKind,
        output_kind: OutputKind,
        previous: &[String],
    ) -> Result<String> {
        let role = match kind {
            EntityKind::Character => RolePreset::CharacterDesigner,
            EntityKind::Location => RolePreset::LocationDesigner,
            EntityKind::Item => RolePreset::ItemCataloger,
        };
        let operation = format!(
            "entity_{}",
            brief.name.to_lowercase().replace(char::is_whitespace, "_")
        );

        let mut spec = GenerationSpec::new(
            role,
            format!(
                "Create the complete profile for {} ({}).\nBRIEF: {}",
                brief.name, brief.role, brief.brief
            ),
        )
        .with_context(format!("STORY ARC:\n{arc}"));
        if let Some(ref owner) = brief.owner {
            spec = spec.with_context(format!("OWNER: {owner}"));
        }
        if !previous.is_empty() {
            spec = spec.with_context(format!("ALREADY CREATED: {}", previous.join(", ")));
        }

        let generated = self.generate(step, &operation, &spec, output_kind).await?;
        self.store
            .create_entity(kind, &brief.name, &generated.text)
            .await
    }

    /// Batched fallback: one call per category when extraction produced
    /// nothing usable.
    async fn generate_batched(&mut self, step: &str, arc: &str) -> Result<()> {
        let categories = [
            ("characters", RolePreset::CharacterDesigner, OutputKind::SupportingCharacter),
            ("locations", RolePreset::LocationDesigner, OutputKind::Location),
            ("items", RolePreset::ItemCataloger, OutputKind::Item),
        ];
        for (category, role, output_kind) in categories {
            let operation = format!("batch_{category}");
            let spec = GenerationSpec::new(
                role,
                format!(
                    "Create the full roster of {category} for this story in one \
                     pass, with a profile for each."
                ),
            )
            .with_context(format!("STORY ARC:\n{arc}"));

            match self.generate(step, &operation, &spec, output_kind).await {
                Ok(generated) => {
                    self.state
                        .world_notes
                        .insert(category.to_string(), generated.text);
                    self.state.checkpoint().await;
                }
                Err(e) => {
                    self.state.mark_failed(step, &e).await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phase: Structure
    // -----------------------------------------------------------------------

    async fn run_structure(&mut self) -> Result<()> {
        const STEP: &str = "chapter_outlining";
        if self.state.can_skip(STEP) && !self.state.chapters.is_empty() {
            return Ok(());
        }
        let arc = self.state.story_arc.clone().unwrap_or_default();
        self.state.mark_start(STEP).await;

        let mut spec = GenerationSpec::new(
            RolePreset::OutlineArchitect,
            format!(
                "Outline all {} chapters of the novel. For each chapter use the \
                 header 'CHAPTER N: Title' followed by one line per scene:\n\
                 SCENE M | goal | conflict | outcome | pov | location",
                self.config.target_chapters
            ),
        )
        .with_context(format!("STORY ARC:\n{arc}"));

        if let Some(list) = &self.state.entity_list {
            let names: Vec<&str> = list
                .main_characters
                .iter()
                .chain(&list.supporting_characters)
                .map(|b| b.name.as_str())
                .collect();
            if !names.is_empty() {
                spec = spec.with_context(format!("CAST: {}", names.join(", ")));
            }
        }
        if let Some(gate) = &self.state.review_gate {
            if gate.status == ReviewGateStatus::Rejected && !gate.feedback.is_empty() {
                spec = spec.with_context(format!("REVISION FEEDBACK:\n{}", gate.feedback));
            }
        }

        match self.generate(STEP, STEP, &spec, OutputKind::ChapterOutline).await {
            Ok(generated) => {
                self.state.chapters =
                    parse_chapter_outline(&generated.text, self.config.target_chapters);
                if self.config.gates_phase("structure") {
                    self.state.review_gate = Some(ReviewGate::pending("structure"));
                }
                self.state.mark_complete(STEP).await;
                Ok(())
            }
            Err(e) => {
                self.state.mark_failed(STEP, &e).await;
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Phase: Writing
    // -----------------------------------------------------------------------

    async fn run_writing(&mut self) -> Result<()> {
        const STEP: &str = "prose_writing";
        if self.state.chapters.is_empty() {
            self.state.chapters = (1..=self.config.target_chapters)
                .map(ChapterUnit::new)
                .collect();
        }
        let Some(idx) = self.state.next_open_chapter() else {
            return Ok(());
        };

        // A chapter already in editorial resumes its refinement loop
        // without redrafting.
        if self.state.chapters[idx].status == ChapterStatus::Editorial {
            return Ok(());
        }

        self.state.mark_start(STEP).await;
        let arc = self.state.story_arc.clone().unwrap_or_default();
        let chapter_number = self.state.chapters[idx].number;
        let chapter_title = self.state.chapters[idx].title.clone();
        let scene_count = self.state.chapters[idx].scenes.len().max(1);
        let words_per_scene = self.config.target_words_per_chapter / scene_count;
        self.state.chapters[idx].status = ChapterStatus::Writing;

        let mut previous_scene: Option<String> = None;
        for scene_idx in 0..self.state.chapters[idx].scenes.len() {
            let scene = self.state.chapters[idx].scenes[scene_idx].clone();
            if !scene.content.is_empty() {
                previous_scene = Some(scene.content);
                continue;
            }

            let operation = format!("scene_{}", scene.id);
            let mut spec = GenerationSpec::new(
                RolePreset::SceneWriter,
                format!(
                    "Write scene {} of chapter {chapter_number} ('{chapter_title}') \
                     as full prose.\nGOAL: {}\nCONFLICT: {}\nOUTCOME: {}\n\
                     POV: {}\nLOCATION: {}\n\
                     Do not summarize; write the complete scene.",
                    scene.number, scene.goal, scene.conflict, scene.outcome, scene.pov,
                    scene.location
                ),
            )
            .with_context(format!("STORY ARC:\n{arc}"))
            .with_target_words(words_per_scene);
            if let Some(ref prev) = previous_scene {
                spec = spec.with_context(format!("PREVIOUS SCENE:\n{prev}"));
            }

            let generated = match self.generate(STEP, &operation, &spec, OutputKind::Scene).await {
                Ok(g) => g,
                Err(e) => {
                    self.state.mark_failed(STEP, &e).await;
                    return Err(e);
                }
            };

            let text = generated.text;
            let word_count = text.split_whitespace().count();
            {
                let unit = &mut self.state.chapters[idx].scenes[scene_idx];
                unit.content = text.clone();
                unit.word_count = word_count;
            }
            let stored = self.state.chapters[idx].scenes[scene_idx].clone();
            let scene_id = match self.store.append_scene(chapter_number, &stored).await {
                Ok(id) => id,
                Err(e) => {
                    self.state.mark_failed(STEP, &e).await;
                    return Err(e);
                }
            };
            self.state.scenes_written.push(scene_id);
            self.sync_counters();
            self.state.checkpoint().await;
            previous_scene = Some(text);
        }

        let chapter = &mut self.state.chapters[idx];
        chapter.content = chapter
            .scenes
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        chapter.word_count = chapter.content.split_whitespace().count();
        chapter.status = ChapterStatus::Editorial;
        let word_count = chapter.word_count;

        self.events.emit(WorkflowEvent::ChapterDrafted {
            chapter: chapter_number,
            word_count,
        });
        self.state.checkpoint().await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phase: EditorialLoop
    // -----------------------------------------------------------------------

    async fn run_editorial(&mut self) -> Result<()> {
        const STEP: &str = "editorial_refinement";
        let Some(idx) = self.state.next_open_chapter() else {
            return Ok(());
        };
        if self.state.chapters[idx].status != ChapterStatus::Editorial {
            // Not drafted yet; route back through writing.
            return Ok(());
        }

        let arc = self.state.story_arc.clone().unwrap_or_default();
        let prior_iterations = self.state.chapters[idx].editorial_iterations;
        let mut chapter = self.state.chapters[idx].clone();
        let mut logs: Vec<AttemptLog> = Vec::new();

        let result = editorial::refine_chapter(
            &self.executor,
            &self.validator,
            &mut chapter,
            &arc,
            self.config.convergence_threshold,
            self.config.max_editorial_iterations,
            &self.events,
            &mut logs,
        )
        .await;

        for log in &logs {
            for attempt in log.failures() {
                self.state.log_error(
                    STEP,
                    attempt.error.clone().unwrap_or_default(),
                    attempt.kind.unwrap_or(ErrorKind::Fatal),
                );
            }
        }

        match result {
            Ok(outcome) => {
                self.state.total_editorial_iterations +=
                    outcome.iterations.saturating_sub(prior_iterations);
                self.state.total_words_written += chapter.word_count;
                let scene_ids: Vec<String> =
                    chapter.scenes.iter().map(|s| s.id.clone()).collect();
                self.state.scenes_edited.extend(scene_ids);
                self.state.chapters[idx] = chapter;
                self.sync_counters();
                self.state.checkpoint().await;

                if self.state.next_open_chapter().is_none() {
                    self.state.mark_complete("prose_writing").await;
                    self.state.mark_complete(STEP).await;
                }
                Ok(())
            }
            Err(e) => {
                // The chapter keeps its drafted content and Editorial
                // status, so a resumed run retries exactly this chapter.
                self.state.mark_failed(STEP, &e).await;
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Phase: FinalReview
    // -----------------------------------------------------------------------

    async fn run_final_review(&mut self) -> Result<()> {
        const STEP: &str = "final_review";
        if !self.state.can_skip(STEP) {
            self.state.mark_start(STEP).await;
            self.state.manuscript = Some(self.state.export_manuscript());
            if let Err(e) = self.store.persist().await {
                self.state.mark_failed(STEP, &e).await;
                return Err(e);
            }
            self.state.mark_complete(STEP).await;
        }

        const SYNC: &str = "index_sync";
        if !self.state.can_skip(SYNC) {
            self.state.mark_start(SYNC).await;
            let snapshot = ProjectSnapshot {
                project_name: self.state.project_name.clone(),
                entity_count: self.state.characters_created.len()
                    + self.state.locations_created.len()
                    + self.state.items_created.len(),
                scene_count: self.state.scenes_written.len(),
                total_words: self.state.total_words_written,
            };
            match self.index.sync(&snapshot).await {
                Ok(stats) => {
                    tracing::info!(
                        entities = stats.entities_indexed,
                        scenes = stats.scenes_indexed,
                        "Knowledge index synced"
                    );
                }
                Err(e) => {
                    // Index failures never block the workflow.
                    tracing::warn!(error = %e, "Knowledge index sync failed");
                    self.state.log_error(SYNC, e.to_string(), e.kind());
                }
            }
            self.state.mark_complete(SYNC).await;
        }

        self.state.finished_at = Some(Utc::now());
        self.events.emit(WorkflowEvent::WorkflowCompleted {
            total_words: self.state.total_words_written,
        });
        Ok(())
    }
}
