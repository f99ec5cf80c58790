use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RolePreset
// ---------------------------------------------------------------------------

/// Tagged role presets for generation calls.
///
/// Each preset carries the system-level framing for one kind of call. The
/// engine selects a preset per operation; adapters render it into whatever
/// their wire format needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolePreset {
    StoryArchitect,
    EntityExtractor,
    CharacterDesigner,
    LocationDesigner,
    ItemCataloger,
    OutlineArchitect,
    SceneWriter,
    ContinuityEditor,
    StyleEditor,
}

impl RolePreset {
    /// System framing sent ahead of the instructions.
    pub fn system_context(&self) -> &'static str {
        match self {
            RolePreset::StoryArchitect => {
                "You are a story architect. You design complete narrative arcs \
                 with clear act structure, stakes, and thematic throughlines."
            }
            RolePreset::EntityExtractor => {
                "You are a story analyst. You read narrative material and list \
                 every character, location, and significant item it implies, \
                 in the exact structured format requested."
            }
            RolePreset::CharacterDesigner => {
                "You are a character designer. You produce deep, internally \
                 consistent character profiles: name, personality, background, \
                 voice, and relationships."
            }
            RolePreset::LocationDesigner => {
                "You are a setting designer. You produce rich location \
                 profiles: description, atmosphere, sensory detail, and \
                 narrative significance."
            }
            RolePreset::ItemCataloger => {
                "You are a props and artifacts cataloger. You document \
                 significant items: appearance, history, ownership, and role \
                 in the story."
            }
            RolePreset::OutlineArchitect => {
                "You are a plot architect. You turn a story arc into ordered \
                 chapter outlines with scene-level goal, conflict, and outcome."
            }
            RolePreset::SceneWriter => {
                "You are a prose writer. You write full scenes of \
                 publication-quality narrative prose, never summaries."
            }
            RolePreset::ContinuityEditor => {
                "You are a continuity editor. You critique a chapter for \
                 pacing, coherence, and consistency, focusing on big-picture \
                 issues rather than line edits."
            }
            RolePreset::StyleEditor => {
                "You are a style editor. You revise prose to implement \
                 editorial feedback while preserving plot and voice."
            }
        }
    }

    /// Short operation label used in logs and call accounting.
    pub fn label(&self) -> &'static str {
        match self {
            RolePreset::StoryArchitect => "story_architect",
            RolePreset::EntityExtractor => "entity_extractor",
            RolePreset::CharacterDesigner => "character_designer",
            RolePreset::LocationDesigner => "location_designer",
            RolePreset::ItemCataloger => "item_cataloger",
            RolePreset::OutlineArchitect => "outline_architect",
            RolePreset::SceneWriter => "scene_writer",
            RolePreset::ContinuityEditor => "continuity_editor",
            RolePreset::StyleEditor => "style_editor",
        }
    }
}

// ---------------------------------------------------------------------------
// GenerationSpec
// ---------------------------------------------------------------------------

/// Abstract request handed to a [`crate::GenerationService`].
///
/// The spec carries only role context, instructions, prior artifacts, and a
/// target length — never model-specific payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSpec {
    pub role: RolePreset,
    pub instructions: String,
    /// Prior artifacts (story arc, earlier entities, previous scene text)
    /// supplied as continuity context, in order.
    #[serde(default)]
    pub context: Vec<String>,
    /// Desired output size in words, when the operation has one.
    pub target_words: Option<usize>,
    /// Hard cap on the response size.
    pub max_output_tokens: u32,
}

impl GenerationSpec {
    pub fn new(role: RolePreset, instructions: impl Into<String>) -> Self {
        Self {
            role,
            instructions: instructions.into(),
            context: Vec::new(),
            target_words: None,
            max_output_tokens: 8192,
        }
    }

    pub fn with_context(mut self, artifact: impl Into<String>) -> Self {
        self.context.push(artifact.into());
        self
    }

    pub fn with_target_words(mut self, words: usize) -> Self {
        self.target_words = Some(words);
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }
}

// ---------------------------------------------------------------------------
// Generated / Usage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Response from a generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generated {
    pub text: String,
    /// Name of the provider that produced the text.
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub usage: Usage,
}

impl Generated {
    /// Construct a response with no usage accounting (test doubles).
    pub fn text_only(text: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            provider: provider.into(),
            model: String::new(),
            usage: Usage::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_preset_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&RolePreset::SceneWriter).unwrap(),
            "\"scene_writer\""
        );
        let role: RolePreset = serde_json::from_str("\"continuity_editor\"").unwrap();
        assert_eq!(role, RolePreset::ContinuityEditor);
    }

    #[test]
    fn every_preset_has_nonempty_context_and_label() {
        let presets = [
            RolePreset::StoryArchitect,
            RolePreset::EntityExtractor,
            RolePreset::CharacterDesigner,
            RolePreset::LocationDesigner,
            RolePreset::ItemCataloger,
            RolePreset::OutlineArchitect,
            RolePreset::SceneWriter,
            RolePreset::ContinuityEditor,
            RolePreset::StyleEditor,
        ];
        for preset in presets {
            assert!(!preset.system_context().is_empty());
            assert!(!preset.label().is_empty());
        }
    }

    #[test]
    fn spec_builder_chains() {
        let spec = GenerationSpec::new(RolePreset::SceneWriter, "Write scene 2")
            .with_context("STORY ARC: ...")
            .with_context("PREVIOUS SCENE: ...")
            .with_target_words(1500)
            .with_max_output_tokens(4096);

        assert_eq!(spec.role, RolePreset::SceneWriter);
        assert_eq!(spec.context.len(), 2);
        assert_eq!(spec.target_words, Some(1500));
        assert_eq!(spec.max_output_tokens, 4096);
    }

    #[test]
    fn spec_round_trip() {
        let spec = GenerationSpec::new(RolePreset::StoryArchitect, "Design the arc")
            .with_target_words(2000);
        let json = serde_json::to_string(&spec).unwrap();
        let back: GenerationSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, RolePreset::StoryArchitect);
        assert_eq!(back.instructions, "Design the arc");
        assert_eq!(back.target_words, Some(2000));
    }

    #[test]
    fn generated_text_only_has_empty_usage() {
        let gen = Generated::text_only("hello", "scripted");
        assert_eq!(gen.text, "hello");
        assert_eq!(gen.provider, "scripted");
        assert_eq!(gen.usage.input_tokens, 0);
        assert_eq!(gen.usage.output_tokens, 0);
    }
}
