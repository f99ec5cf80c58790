//! Durable workflow state and checkpointing.
//!
//! One checkpoint file per project, fully overwritten at every save. The
//! state is mutated exclusively by the phase engine and persisted after
//! every step start/complete/fail transition and after every scene-level
//! unit, so a crashed or interrupted run resumes at the last completed
//! boundary instead of starting over.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fable_types::{
    ChapterStatus, ChapterUnit, EntityList, ErrorKind, FableError, Result, ReviewGate,
};

use crate::phase::Phase;

/// Canonical workflow steps, in dependency order.
pub const WORKFLOW_STEPS: [&str; 8] = [
    "story_planning",
    "entity_extraction",
    "world_building",
    "chapter_outlining",
    "prose_writing",
    "editorial_refinement",
    "final_review",
    "index_sync",
];

/// One logged failure, kept in the checkpoint for post-mortems and for the
/// `status` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub step: String,
    pub message: String,
    pub kind: ErrorKind,
    pub timestamp: DateTime<Utc>,
}

/// Complete workflow state for pause/resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub project_name: String,
    pub phase: Phase,

    // Step completion tracking
    pub completed_steps: Vec<String>,
    pub current_step: Option<String>,
    pub failed_step: Option<String>,

    // Phase artifacts
    pub story_arc: Option<String>,
    pub entity_list: Option<EntityList>,
    pub characters_created: Vec<String>,
    pub locations_created: Vec<String>,
    pub items_created: Vec<String>,
    /// Batch-mode world notes, keyed by category, when entity extraction
    /// fell back to one call per category.
    #[serde(default)]
    pub world_notes: HashMap<String, String>,
    pub chapters: Vec<ChapterUnit>,
    pub scenes_written: Vec<String>,
    pub scenes_edited: Vec<String>,
    pub review_gate: Option<ReviewGate>,
    pub manuscript: Option<String>,

    // Counters
    pub total_calls: u64,
    pub provider_usage: HashMap<String, u64>,
    pub total_words_written: usize,
    pub total_editorial_iterations: u32,

    // Error tracking
    pub error_log: Vec<ErrorEntry>,

    // Timestamps
    pub started_at: Option<DateTime<Utc>>,
    pub last_checkpoint: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Directory holding the checkpoint file and pause marker.
    pub checkpoint_dir: PathBuf,
}

impl WorkflowState {
    pub fn new(project_name: impl Into<String>, checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_name: project_name.into(),
            phase: Phase::Foundation,
            completed_steps: Vec::new(),
            current_step: None,
            failed_step: None,
            story_arc: None,
            entity_list: None,
            characters_created: Vec::new(),
            locations_created: Vec::new(),
            items_created: Vec::new(),
            world_notes: HashMap::new(),
            chapters: Vec::new(),
            scenes_written: Vec::new(),
            scenes_edited: Vec::new(),
            review_gate: None,
            manuscript: None,
            total_calls: 0,
            provider_usage: HashMap::new(),
            total_words_written: 0,
            total_editorial_iterations: 0,
            error_log: Vec::new(),
            started_at: None,
            last_checkpoint: None,
            finished_at: None,
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    fn checkpoint_path(project_name: &str, dir: &Path) -> PathBuf {
        dir.join(format!("{project_name}_checkpoint.json"))
    }

    /// Serialize the full state to the project's checkpoint file,
    /// overwriting any previous snapshot.
    pub async fn save(&mut self) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.checkpoint_dir).await?;
        let path = Self::checkpoint_path(&self.project_name, &self.checkpoint_dir);
        self.last_checkpoint = Some(Utc::now());
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, json).await?;
        tracing::debug!(path = %path.display(), "Checkpoint saved");
        Ok(path)
    }

    /// Save, logging instead of failing. Checkpoint write failure is never
    /// fatal to the step that triggered it.
    pub async fn checkpoint(&mut self) {
        if let Err(e) = self.save().await {
            tracing::warn!(project = %self.project_name, error = %e, "Checkpoint write failed");
        }
    }

    /// Load the state for a project. Returns `Ok(None)` when no checkpoint
    /// exists (first run or after [`WorkflowState::clear`]).
    pub async fn load(project_name: &str, dir: &Path) -> Result<Option<Self>> {
        let path = Self::checkpoint_path(project_name, dir);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let json = tokio::fs::read_to_string(&path).await?;
        let state: Self = serde_json::from_str(&json)?;
        tracing::info!(
            project = %project_name,
            completed = state.completed_steps.len(),
            phase = ?state.phase,
            "Checkpoint loaded"
        );
        Ok(Some(state))
    }

    /// Delete the checkpoint after a clean completion.
    pub async fn clear(project_name: &str, dir: &Path) -> Result<()> {
        let path = Self::checkpoint_path(project_name, dir);
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    /// A step can be skipped iff it already completed.
    pub fn can_skip(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
    }

    pub async fn mark_start(&mut self, step: &str) {
        self.current_step = Some(step.to_string());
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        tracing::info!(step, "Starting step");
        self.checkpoint().await;
    }

    /// Record a step as complete. Idempotent: a step appears at most once
    /// in `completed_steps`.
    pub async fn mark_complete(&mut self, step: &str) {
        if !self.can_skip(step) {
            self.completed_steps.push(step.to_string());
        }
        self.current_step = None;
        self.failed_step = None;
        tracing::info!(step, "Completed step");
        self.checkpoint().await;
    }

    pub async fn mark_failed(&mut self, step: &str, error: &FableError) {
        self.failed_step = Some(step.to_string());
        self.current_step = None;
        self.error_log.push(ErrorEntry {
            step: step.to_string(),
            message: error.to_string(),
            kind: error.kind(),
            timestamp: Utc::now(),
        });
        tracing::error!(step, error = %error, "Step failed");
        self.checkpoint().await;
    }

    /// Record a non-fatal failure (a retried attempt, a skipped entity)
    /// without changing step status.
    pub fn log_error(&mut self, step: &str, message: impl Into<String>, kind: ErrorKind) {
        self.error_log.push(ErrorEntry {
            step: step.to_string(),
            message: message.into(),
            kind,
            timestamp: Utc::now(),
        });
    }

    pub fn progress_percentage(&self) -> f64 {
        (self.completed_steps.len() as f64 / WORKFLOW_STEPS.len() as f64) * 100.0
    }

    /// The next canonical step still to run, or `None` when all complete.
    pub fn next_step(&self) -> Option<&'static str> {
        WORKFLOW_STEPS.iter().find(|s| !self.can_skip(s)).copied()
    }

    pub fn chapters_completed(&self) -> usize {
        self.chapters
            .iter()
            .filter(|c| c.status == ChapterStatus::Complete)
            .count()
    }

    /// First chapter that still needs work, in ascending number order.
    pub fn next_open_chapter(&self) -> Option<usize> {
        self.chapters
            .iter()
            .position(|c| c.status != ChapterStatus::Complete)
    }

    /// Render the assembled manuscript as markdown.
    pub fn export_manuscript(&self) -> String {
        let mut lines = vec![
            format!("# {}", self.project_name),
            format!("\n*Total Words: {}*", self.total_words_written),
            "\n---\n".to_string(),
        ];
        for chapter in &self.chapters {
            if chapter.content.is_empty() {
                continue;
            }
            lines.push(format!("\n## Chapter {}", chapter.number));
            if !chapter.title.is_empty() {
                lines.push(format!("### {}", chapter.title));
            }
            lines.push(format!("\n{}\n", chapter.content));
        }
        lines.join("\n")
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            project_name: self.project_name.clone(),
            phase: self.phase,
            progress_percent: self.progress_percentage(),
            completed_steps: self.completed_steps.clone(),
            current_step: self.current_step.clone(),
            failed_step: self.failed_step.clone(),
            next_step: self.next_step().map(String::from),
            chapters_completed: self.chapters_completed(),
            total_chapters: self.chapters.len(),
            total_words_written: self.total_words_written,
            total_calls: self.total_calls,
            provider_usage: self.provider_usage.clone(),
            total_errors: self.error_log.len(),
            review_gate: self.review_gate.clone(),
            started_at: self.started_at,
            last_checkpoint: self.last_checkpoint,
        }
    }
}

/// Snapshot summary for the `status` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub project_name: String,
    pub phase: Phase,
    pub progress_percent: f64,
    pub completed_steps: Vec<String>,
    pub current_step: Option<String>,
    pub failed_step: Option<String>,
    pub next_step: Option<String>,
    pub chapters_completed: usize,
    pub total_chapters: usize,
    pub total_words_written: usize,
    pub total_calls: u64,
    pub provider_usage: HashMap<String, u64>,
    pub total_errors: usize,
    pub review_gate: Option<ReviewGate>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_checkpoint: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_in(dir: &Path) -> WorkflowState {
        WorkflowState::new("Test_Novel", dir)
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(dir.path());
        state.story_arc = Some("A three-act arc.".into());
        state.mark_start("story_planning").await;
        state.mark_complete("story_planning").await;

        let loaded = WorkflowState::load("Test_Novel", dir.path())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.project_name, "Test_Novel");
        assert_eq!(loaded.completed_steps, vec!["story_planning".to_string()]);
        assert_eq!(loaded.story_arc.as_deref(), Some("A three-act arc."));
        assert!(loaded.current_step.is_none());
        assert!(loaded.last_checkpoint.is_some());
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = WorkflowState::load("No_Such_Project", dir.path())
            .await
            .unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn clear_removes_the_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(dir.path());
        state.save().await.unwrap();

        WorkflowState::clear("Test_Novel", dir.path()).await.unwrap();
        assert!(WorkflowState::load("Test_Novel", dir.path())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn mark_complete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(dir.path());

        state.mark_complete("world_building").await;
        state.mark_complete("world_building").await;

        let occurrences = state
            .completed_steps
            .iter()
            .filter(|s| *s == "world_building")
            .count();
        assert_eq!(occurrences, 1);
    }

    #[tokio::test]
    async fn mark_start_sets_started_at_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(dir.path());

        state.mark_start("story_planning").await;
        let first = state.started_at;
        assert!(first.is_some());

        state.mark_start("entity_extraction").await;
        assert_eq!(state.started_at, first);
        assert_eq!(state.current_step.as_deref(), Some("entity_extraction"));
    }

    #[tokio::test]
    async fn mark_failed_records_error_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(dir.path());

        let err = FableError::Exhausted {
            operation: "scene_draft".into(),
            attempts: 6,
        };
        state.mark_failed("prose_writing", &err).await;

        assert_eq!(state.failed_step.as_deref(), Some("prose_writing"));
        assert!(state.current_step.is_none());
        assert_eq!(state.error_log.len(), 1);
        assert_eq!(state.error_log[0].step, "prose_writing");
        assert_eq!(state.error_log[0].kind, ErrorKind::Fatal);
    }

    #[tokio::test]
    async fn checkpoint_write_failure_is_nonfatal() {
        // Point the state at a path that cannot be a directory.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();

        let mut state = WorkflowState::new("Test_Novel", &blocker);
        // Must not panic or error out of the step transition.
        state.mark_complete("story_planning").await;
        assert_eq!(state.completed_steps, vec!["story_planning".to_string()]);
    }

    #[test]
    fn can_skip_and_next_step() {
        let dir = std::env::temp_dir();
        let mut state = WorkflowState::new("T", &dir);
        assert!(!state.can_skip("story_planning"));
        assert_eq!(state.next_step(), Some("story_planning"));

        state.completed_steps.push("story_planning".into());
        assert!(state.can_skip("story_planning"));
        assert_eq!(state.next_step(), Some("entity_extraction"));

        for step in WORKFLOW_STEPS {
            if !state.can_skip(step) {
                state.completed_steps.push(step.to_string());
            }
        }
        assert_eq!(state.next_step(), None);
        assert_eq!(state.progress_percentage(), 100.0);
    }

    #[test]
    fn next_open_chapter_finds_first_incomplete() {
        let dir = std::env::temp_dir();
        let mut state = WorkflowState::new("T", &dir);
        state.chapters = vec![
            ChapterUnit::new(1),
            ChapterUnit::new(2),
            ChapterUnit::new(3),
        ];
        state.chapters[0].status = ChapterStatus::Complete;
        state.chapters[1].status = ChapterStatus::Editorial;

        assert_eq!(state.next_open_chapter(), Some(1));
        assert_eq!(state.chapters_completed(), 1);

        for ch in &mut state.chapters {
            ch.status = ChapterStatus::Complete;
        }
        assert_eq!(state.next_open_chapter(), None);
    }

    #[test]
    fn status_report_reflects_state() {
        let dir = std::env::temp_dir();
        let mut state = WorkflowState::new("Report", &dir);
        state.completed_steps.push("story_planning".into());
        state.total_calls = 42;
        state.provider_usage.insert("groq".into(), 42);
        state.log_error("world_building", "entity failed", ErrorKind::InvalidOutput);

        let report = state.status_report();
        assert_eq!(report.project_name, "Report");
        assert_eq!(report.completed_steps.len(), 1);
        assert_eq!(report.next_step.as_deref(), Some("entity_extraction"));
        assert_eq!(report.total_calls, 42);
        assert_eq!(report.total_errors, 1);
    }
}
