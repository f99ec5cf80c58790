//! Shared types and errors for the Fable workflow engine.
//!
//! This crate provides the foundational types used across all other Fable crates:
//! - `FableError` — unified error taxonomy with retry classification
//! - `ErrorKind` — coarse error class driving backoff and provider fallback
//! - Manuscript model — chapters, scenes, review gates, entity briefs

use serde::{Deserialize, Serialize};

/// Unified error type for all Fable subsystems.
#[derive(Debug, thiserror::Error)]
pub enum FableError {
    // === Generation service errors ===
    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Provider {provider} unavailable: {message}")]
    Transient { provider: String, message: String },

    #[error("Generated output rejected: {reason}")]
    InvalidOutput { reason: String },

    #[error("Authentication failed for provider {provider}")]
    Auth { provider: String },

    #[error("Quota exhausted for provider {provider}")]
    QuotaExhausted { provider: String },

    // === Workflow errors ===
    #[error("All attempts exhausted for '{operation}' after {attempts} attempts")]
    Exhausted { operation: String, attempts: usize },

    #[error("Phase '{phase}' failed: {message}")]
    PhaseFailed { phase: String, message: String },

    #[error("Project store error: {0}")]
    Store(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse error class used by the retry executor to pick a backoff
/// multiplier and decide on provider fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    Transient,
    InvalidOutput,
    Auth,
    Fatal,
}

impl FableError {
    /// Classify the error for backoff and fallback decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FableError::RateLimited { .. } => ErrorKind::RateLimited,
            FableError::Transient { .. } => ErrorKind::Transient,
            FableError::InvalidOutput { .. } => ErrorKind::InvalidOutput,
            FableError::Auth { .. } | FableError::QuotaExhausted { .. } => ErrorKind::Auth,
            _ => ErrorKind::Fatal,
        }
    }

    /// Returns `true` if the operation may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimited | ErrorKind::Transient | ErrorKind::InvalidOutput
        )
    }

    /// Returns `true` if the error warrants an immediate switch to the next
    /// provider without retrying the current one.
    pub fn switches_provider(&self) -> bool {
        matches!(
            self,
            FableError::Auth { .. } | FableError::QuotaExhausted { .. }
        )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FableError::Exhausted { .. }
                | FableError::PhaseFailed { .. }
                | FableError::Auth { .. }
                | FableError::QuotaExhausted { .. }
        )
    }
}

/// A convenience alias for `Result<T, FableError>`.
pub type Result<T> = std::result::Result<T, FableError>;

// ---------------------------------------------------------------------------
// ChapterStatus / SceneUnit / ChapterUnit — manuscript model
// ---------------------------------------------------------------------------

/// Lifecycle of a single chapter through drafting and editorial refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    NotStarted,
    Outlining,
    Writing,
    Editorial,
    Complete,
}

/// A single scene inside a chapter. Content starts as a placeholder and is
/// filled in during the writing phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneUnit {
    pub id: String,
    pub chapter: u32,
    pub number: u32,
    pub goal: String,
    pub conflict: String,
    pub outcome: String,
    #[serde(default)]
    pub pov: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub word_count: usize,
}

impl SceneUnit {
    pub fn new(chapter: u32, number: u32) -> Self {
        Self {
            id: format!("ch{chapter}_sc{number}"),
            chapter,
            number,
            goal: String::new(),
            conflict: String::new(),
            outcome: String::new(),
            pov: String::new(),
            location: String::new(),
            content: String::new(),
            word_count: 0,
        }
    }
}

/// A chapter with its ordered scenes, aggregate word count, and editorial
/// convergence tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterUnit {
    pub number: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub scenes: Vec<SceneUnit>,
    #[serde(default)]
    pub content: String,
    pub status: ChapterStatus,
    #[serde(default)]
    pub word_count: usize,
    #[serde(default)]
    pub editorial_iterations: u32,
    #[serde(default = "default_convergence")]
    pub convergence_score: f64,
}

fn default_convergence() -> f64 {
    1.0
}

impl ChapterUnit {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            title: String::new(),
            scenes: Vec::new(),
            content: String::new(),
            status: ChapterStatus::NotStarted,
            word_count: 0,
            editorial_iterations: 0,
            convergence_score: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// ReviewGate — human-in-the-loop approval record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewGateStatus {
    NotRequired,
    Pending,
    Approved,
    Rejected,
}

/// A pause point requiring external approval. Created when a completed
/// phase matches the configured gate set; transitions only via an explicit
/// external decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewGate {
    pub phase: String,
    pub status: ReviewGateStatus,
    #[serde(default)]
    pub feedback: String,
}

impl ReviewGate {
    pub fn pending(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            status: ReviewGateStatus::Pending,
            feedback: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Entity model — world-building pass 1 output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Character,
    Location,
    Item,
}

/// One entry of the extracted entity list: just enough to drive an
/// individual full-context generation in pass 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityBrief {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub brief: String,
    #[serde(default)]
    pub owner: Option<String>,
}

/// Structured entity list produced by the extraction pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityList {
    pub main_characters: Vec<EntityBrief>,
    pub supporting_characters: Vec<EntityBrief>,
    pub locations: Vec<EntityBrief>,
    pub items: Vec<EntityBrief>,
}

impl EntityList {
    pub fn total(&self) -> usize {
        self.main_characters.len()
            + self.supporting_characters.len()
            + self.locations.len()
            + self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
