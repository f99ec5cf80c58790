//! Workflow event system for observability.
//!
//! Emits [`WorkflowEvent`]s via a [`tokio::sync::broadcast`] channel so
//! external observers (loggers, progress UIs) can follow a run without
//! coupling to the engine internals.

use serde::{Deserialize, Serialize};

/// Events emitted during workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkflowEvent {
    PhaseStarted {
        phase: String,
    },
    PhaseCompleted {
        phase: String,
    },
    StepStarted {
        step: String,
    },
    StepCompleted {
        step: String,
    },
    EntityGenerated {
        kind: String,
        name: String,
    },
    EntitySkipped {
        kind: String,
        name: String,
        error: String,
    },
    ChapterDrafted {
        chapter: u32,
        word_count: usize,
    },
    EditorialIteration {
        chapter: u32,
        iteration: u32,
        score: f64,
    },
    ChapterCompleted {
        chapter: u32,
    },
    ReviewGatePending {
        phase: String,
    },
    CheckpointSaved {
        step: String,
    },
    WorkflowPaused {
        after_step: String,
    },
    WorkflowFailed {
        step: String,
        error: String,
    },
    WorkflowCompleted {
        total_words: usize,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<WorkflowEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers. With no active receivers
    /// the event is silently dropped.
    pub fn emit(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
