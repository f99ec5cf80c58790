//! Workflow configuration: project targets, review gates, and the tuning
//! knobs for retry, validation, and editorial convergence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use fable_types::Result;

use crate::retry::RetryPolicy;
use crate::validator::ValidatorConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub project_name: String,
    #[serde(default)]
    pub premise: String,
    #[serde(default = "default_genre")]
    pub genre: String,
    #[serde(default = "default_chapters")]
    pub target_chapters: u32,
    #[serde(default = "default_words_per_chapter")]
    pub target_words_per_chapter: usize,

    /// Convergence threshold for the editorial loop. A revision changing
    /// less than this fraction of the text counts as converged.
    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f64,
    #[serde(default = "default_max_editorial_iterations")]
    pub max_editorial_iterations: u32,

    /// Phases whose completion requires external approval.
    #[serde(default = "default_review_gates")]
    pub review_gates: Vec<String>,

    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub validator: ValidatorConfig,

    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Caps on pass-2 entity generation, matching the extraction prompt's
    /// expected ranges.
    #[serde(default = "default_supporting_cap")]
    pub supporting_character_cap: usize,
    #[serde(default = "default_item_cap")]
    pub item_cap: usize,

    /// World building is marked failed when fewer than this fraction of
    /// entities generate successfully.
    #[serde(default = "default_min_success_ratio")]
    pub min_phase_success_ratio: f64,
}

fn default_genre() -> String {
    "literary_fiction".to_string()
}
fn default_chapters() -> u32 {
    10
}
fn default_words_per_chapter() -> usize {
    3000
}
fn default_convergence_threshold() -> f64 {
    0.05
}
fn default_max_editorial_iterations() -> u32 {
    5
}
fn default_review_gates() -> Vec<String> {
    vec!["structure".to_string()]
}
fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_supporting_cap() -> usize {
    10
}
fn default_item_cap() -> usize {
    15
}
fn default_min_success_ratio() -> f64 {
    0.5
}

impl WorkflowConfig {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            premise: String::new(),
            genre: default_genre(),
            target_chapters: default_chapters(),
            target_words_per_chapter: default_words_per_chapter(),
            convergence_threshold: default_convergence_threshold(),
            max_editorial_iterations: default_max_editorial_iterations(),
            review_gates: default_review_gates(),
            retry: RetryPolicy::default(),
            validator: ValidatorConfig::default(),
            checkpoint_dir: default_checkpoint_dir(),
            supporting_character_cap: default_supporting_cap(),
            item_cap: default_item_cap(),
            min_phase_success_ratio: default_min_success_ratio(),
        }
    }

    pub fn gates_phase(&self, phase: &str) -> bool {
        self.review_gates.iter().any(|g| g == phase)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
