//! Workflow controller: cooperative interruption and pause markers.
//!
//! Signals and pause markers never cancel an in-flight generation call;
//! they flip a flag that the engine observes at step boundaries, so the
//! checkpoint always reflects fully completed units.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fable_types::Result;

use crate::phase::{PhaseEngine, RunStatus};

/// Pause marker path for a project: a zero-byte file whose presence asks a
/// running workflow to checkpoint and stop.
pub fn pause_marker_path(project_name: &str, dir: &Path) -> PathBuf {
    dir.join(format!("{project_name}.pause"))
}

/// The shell command that resumes a paused or failed project.
pub fn resume_command(project_name: &str) -> String {
    format!("fable resume --project {project_name}")
}

// ---------------------------------------------------------------------------
// Interrupter
// ---------------------------------------------------------------------------

/// Shared stop condition checked by the engine at step boundaries.
pub struct Interrupter {
    flag: AtomicBool,
    pause_marker: PathBuf,
}

impl Interrupter {
    pub fn new(pause_marker: impl Into<PathBuf>) -> Self {
        Self {
            flag: AtomicBool::new(false),
            pause_marker: pause_marker.into(),
        }
    }

    /// Request a stop (called from signal handlers).
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// True when the workflow should stop: either a signal arrived or the
    /// pause marker exists. A detected marker is removed here; removal is
    /// the controller's responsibility, not the user's.
    pub async fn check(&self) -> bool {
        if self.is_triggered() {
            return true;
        }
        match tokio::fs::try_exists(&self.pause_marker).await {
            Ok(true) => {
                tracing::info!(marker = %self.pause_marker.display(), "Pause marker detected");
                if let Err(e) = tokio::fs::remove_file(&self.pause_marker).await {
                    tracing::warn!(error = %e, "Failed to remove pause marker");
                }
                self.trigger();
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Pause marker poll failed");
                false
            }
        }
    }
}

/// Create the pause marker for a project, asking any running workflow to
/// stop at its next step boundary.
pub async fn create_pause_marker(project_name: &str, dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = pause_marker_path(project_name, dir);
    tokio::fs::write(&path, b"").await?;
    tracing::info!(marker = %path.display(), "Pause marker created");
    Ok(path)
}

// ---------------------------------------------------------------------------
// WorkflowController
// ---------------------------------------------------------------------------

/// Wraps a [`PhaseEngine`] run with signal handling and emergency
/// checkpointing.
pub struct WorkflowController {
    interrupter: Arc<Interrupter>,
    signal_tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkflowController {
    pub fn new(project_name: &str, dir: &Path) -> Self {
        Self {
            interrupter: Arc::new(Interrupter::new(pause_marker_path(project_name, dir))),
            signal_tasks: Vec::new(),
        }
    }

    pub fn interrupter(&self) -> Arc<Interrupter> {
        self.interrupter.clone()
    }

    /// Spawn SIGINT/SIGTERM listeners that flip the stop flag. The
    /// in-flight step finishes (or fails) before the engine stops.
    pub fn install_signal_handlers(&mut self) {
        let interrupter = self.interrupter.clone();
        self.signal_tasks.push(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received; pausing at next step boundary");
                interrupter.trigger();
            }
        }));

        #[cfg(unix)]
        {
            let interrupter = self.interrupter.clone();
            self.signal_tasks.push(tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut term) => {
                        term.recv().await;
                        tracing::info!("Termination requested; pausing at next step boundary");
                        interrupter.trigger();
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to install SIGTERM handler"),
                }
            }));
        }
    }

    fn teardown(&mut self) {
        for task in self.signal_tasks.drain(..) {
            task.abort();
        }
    }

    /// Run the engine to its next stopping point. On any error an
    /// emergency checkpoint is persisted before the error propagates.
    pub async fn run(&mut self, engine: &mut PhaseEngine) -> Result<RunStatus> {
        self.install_signal_handlers();
        let result = engine.run().await;
        self.teardown();

        if result.is_err() {
            engine.emergency_checkpoint().await;
        }
        result
    }
}

impl Drop for WorkflowController {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::retry::{RetryExecutor, RetryPolicy};
    use crate::state::WorkflowState;
    use crate::store::{MemoryStore, NullIndex};
    use fable_llm::service::{ScriptedReply, ScriptedService};
    use fable_llm::DynService;
    use fable_types::FableError;

    #[tokio::test]
    async fn trigger_flips_check() {
        let dir = tempfile::tempdir().unwrap();
        let interrupter = Interrupter::new(dir.path().join("p.pause"));
        assert!(!interrupter.check().await);
        interrupter.trigger();
        assert!(interrupter.check().await);
        assert!(interrupter.is_triggered());
    }

    #[tokio::test]
    async fn pause_marker_is_detected_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = create_pause_marker("proj", dir.path()).await.unwrap();
        assert!(marker.exists());

        let interrupter = Interrupter::new(marker.clone());
        assert!(interrupter.check().await);
        assert!(!marker.exists(), "marker should be removed on detection");
        // The stop condition latches after detection.
        assert!(interrupter.check().await);
    }

    #[tokio::test]
    async fn missing_marker_does_not_stop() {
        let dir = tempfile::tempdir().unwrap();
        let interrupter = Interrupter::new(dir.path().join("never.pause"));
        assert!(!interrupter.check().await);
        assert!(!interrupter.check().await);
    }

    #[test]
    fn paths_and_commands() {
        let path = pause_marker_path("My_Novel", Path::new("output"));
        assert_eq!(path, PathBuf::from("output/My_Novel.pause"));
        assert_eq!(resume_command("My_Novel"), "fable resume --project My_Novel");
    }

    #[tokio::test]
    async fn failed_run_leaves_emergency_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WorkflowConfig::new("Crash_Test");
        config.checkpoint_dir = dir.path().to_path_buf();
        config.retry = RetryPolicy {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: 0.0,
        };

        // The very first generation dies with a fatal error.
        let service = Arc::new(DynService::new(ScriptedService::new(
            "primary",
            vec![ScriptedReply::Error(FableError::Other("backend gone".into()))],
        )));
        let state = WorkflowState::new("Crash_Test", dir.path());
        let mut controller = WorkflowController::new("Crash_Test", dir.path());
        let mut engine = PhaseEngine::new(
            config,
            RetryExecutor::new(vec![service], RetryPolicy::default()),
            Arc::new(MemoryStore::new()),
            Arc::new(NullIndex),
            state,
            controller.interrupter(),
        );

        let result = controller.run(&mut engine).await;
        assert!(result.is_err());

        let reloaded = WorkflowState::load("Crash_Test", dir.path())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.failed_step.as_deref(), Some("story_planning"));
        assert_eq!(reloaded.error_log.len(), 2);
    }
}
