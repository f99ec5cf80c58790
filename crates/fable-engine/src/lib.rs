//! Fable workflow engine: durable checkpointed state, an explicit phase
//! state machine with review gates, classified retry with provider
//! fallback, two-pass entity generation, and the editorial convergence loop.

pub mod config;
pub mod controller;
pub mod convergence;
pub mod editorial;
pub mod events;
pub mod extraction;
pub mod phase;
pub mod retry;
pub mod state;
pub mod store;
pub mod validator;

pub use config::WorkflowConfig;
pub use controller::{
    create_pause_marker, pause_marker_path, resume_command, Interrupter, WorkflowController,
};
pub use convergence::convergence_score;
pub use editorial::{refine_chapter, should_stop, EditorialOutcome};
pub use events::{EventEmitter, WorkflowEvent};
pub use extraction::{parse_chapter_outline, parse_entity_list};
pub use phase::{next_phase, Phase, PhaseEngine, RunStatus};
pub use retry::{AttemptLog, RetryAttempt, RetryExecutor, RetryPolicy};
pub use state::{ErrorEntry, StatusReport, WorkflowState, WORKFLOW_STEPS};
pub use store::{
    FileStore, KnowledgeIndex, MemoryStore, NullIndex, ProjectSnapshot, ProjectStore,
    RecordingIndex, SyncStats,
};
pub use validator::{OutputKind, OutputValidator, Rejection, ValidatorConfig};
