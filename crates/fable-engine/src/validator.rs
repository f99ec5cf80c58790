//! Output validation for generation results.
//!
//! Pure and deterministic: callable after every attempt with no side
//! effects. Rejections are mapped to `FableError::InvalidOutput` by the
//! retry executor, which drives the retry-then-fallback escalation.

use serde::{Deserialize, Serialize};

/// What kind of output is being validated. Each kind carries its own
/// minimum acceptable length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    StoryArc,
    EntityList,
    MainCharacter,
    SupportingCharacter,
    Location,
    Item,
    ChapterOutline,
    Scene,
    Critique,
    Revision,
}

impl OutputKind {
    /// Default minimum length in characters.
    pub fn min_len(&self) -> usize {
        match self {
            OutputKind::StoryArc => 500,
            OutputKind::EntityList => 200,
            OutputKind::MainCharacter => 2000,
            OutputKind::SupportingCharacter => 1000,
            OutputKind::Location => 1500,
            OutputKind::Item => 800,
            OutputKind::ChapterOutline => 500,
            OutputKind::Scene => 500,
            OutputKind::Critique => 200,
            OutputKind::Revision => 500,
        }
    }

    /// Sub-sections a structured kind is expected to contain. Missing
    /// sections warn rather than fail.
    fn expected_sections(&self) -> &'static [&'static str] {
        match self {
            OutputKind::MainCharacter | OutputKind::SupportingCharacter => {
                &["name", "personality", "background"]
            }
            OutputKind::Location => &["description", "atmosphere"],
            _ => &[],
        }
    }
}

/// Why an output was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    TooShort { len: usize, min: usize },
    FailureSignature { pattern: String },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Empty => write!(f, "output is empty"),
            Rejection::TooShort { len, min } => {
                write!(f, "output too short: {len} chars (min: {min})")
            }
            Rejection::FailureSignature { pattern } => {
                write!(f, "output contains failure signature: '{pattern}'")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Substrings that mark a refused or broken generation when found near
    /// the start of the output.
    pub failure_signatures: Vec<String>,
    /// How many leading characters to scan for failure signatures.
    pub scan_window: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            failure_signatures: vec![
                "your final answer must be".to_string(),
                "i cannot complete".to_string(),
                "i'm unable to".to_string(),
                "error:".to_string(),
                "failed to generate".to_string(),
                "insufficient context".to_string(),
            ],
            scan_window: 500,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutputValidator {
    config: ValidatorConfig,
}

impl OutputValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate an output against a minimum length and its kind's failure
    /// signatures. Missing sub-sections of structured kinds only warn.
    pub fn validate(
        &self,
        output: &str,
        min_length: usize,
        kind: OutputKind,
    ) -> Result<(), Rejection> {
        let trimmed = output.trim();
        if trimmed.is_empty() {
            return Err(Rejection::Empty);
        }

        if trimmed.len() < min_length {
            return Err(Rejection::TooShort {
                len: trimmed.len(),
                min: min_length,
            });
        }

        let window: String = trimmed
            .chars()
            .take(self.config.scan_window)
            .collect::<String>()
            .to_lowercase();
        for pattern in &self.config.failure_signatures {
            if window.contains(pattern.as_str()) {
                return Err(Rejection::FailureSignature {
                    pattern: pattern.clone(),
                });
            }
        }

        let lower = trimmed.to_lowercase();
        for section in kind.expected_sections() {
            if !lower.contains(section) {
                tracing::warn!(?kind, section, "Output may be missing expected section");
            }
        }

        Ok(())
    }

    /// Validate using the kind's default minimum length.
    pub fn validate_kind(&self, output: &str, kind: OutputKind) -> Result<(), Rejection> {
        self.validate(output, kind.min_len(), kind)
    }
}
