//! Parsers for structured generation output.
//!
//! Pass 1 of world building asks the model for a pipe-separated entity
//! roster; the structure phase asks for chapter outlines with scene lines.
//! Both parsers are deliberately tolerant — numbering, markdown headers,
//! and missing fields are absorbed rather than rejected, and the callers
//! fall back to coarser generation modes when nothing parses at all.

use regex::Regex;

use fable_types::{ChapterUnit, EntityBrief, EntityList, SceneUnit};

// ---------------------------------------------------------------------------
// Entity list (world building, pass 1)
// ---------------------------------------------------------------------------

/// Parse the extraction output into an [`EntityList`].
///
/// Expected shape, per section:
/// ```text
/// ===== MAIN CHARACTERS =====
/// 1. Mara Voss | Protagonist | A cartographer who maps dead cities
/// ```
/// Returns `None` when no section yields a single entity, signalling the
/// caller to use the batched fallback.
pub fn parse_entity_list(output: &str) -> Option<EntityList> {
    let mut list = EntityList {
        main_characters: parse_section(output, "MAIN CHARACTERS", false),
        supporting_characters: parse_section(output, "SUPPORTING CHARACTERS", false),
        locations: parse_section(output, "KEY LOCATIONS", false),
        items: parse_section(output, "SIGNIFICANT ITEMS", true),
    };

    // Items without an explicit owner default to Unknown.
    for item in &mut list.items {
        if item.owner.is_none() {
            item.owner = Some("Unknown".to_string());
        }
    }

    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

fn parse_section(output: &str, header: &str, has_owner: bool) -> Vec<EntityBrief> {
    let pattern = format!(r"(?is)=====\s*{header}\s*=====(.*?)(?:=====|\z)");
    let re = Regex::new(&pattern).expect("section regex");
    let numbering = Regex::new(r"^\d+[.)]\s*").expect("numbering regex");

    let Some(caps) = re.captures(output) else {
        return Vec::new();
    };

    let mut entries = Vec::new();
    for line in caps[1].lines() {
        let line = line.trim();
        if line.is_empty() || !line.contains('|') {
            continue;
        }
        let line = numbering.replace(line, "");
        let parts: Vec<&str> = line.split('|').map(str::trim).collect();
        if parts.len() < 2 || parts[0].is_empty() {
            continue;
        }

        let brief = if has_owner {
            // NAME | CATEGORY | OWNER | DESCRIPTION, owner optional.
            EntityBrief {
                name: parts[0].to_string(),
                role: parts[1].to_string(),
                owner: if parts.len() >= 4 {
                    Some(parts[2].to_string())
                } else {
                    None
                },
                brief: parts.last().map(|s| s.to_string()).filter(|_| parts.len() >= 3).unwrap_or_default(),
            }
        } else {
            // NAME | ROLE | DESCRIPTION, description optional.
            EntityBrief {
                name: parts[0].to_string(),
                role: parts[1].to_string(),
                brief: parts.get(2).map(|s| s.to_string()).unwrap_or_default(),
                owner: None,
            }
        };
        entries.push(brief);
    }
    entries
}

// ---------------------------------------------------------------------------
// Chapter outline (structure phase)
// ---------------------------------------------------------------------------

/// Parse a chapter outline into exactly `target_chapters` chapters.
///
/// Expected shape:
/// ```text
/// CHAPTER 1: The Drowned Archive
/// SCENE 1 | Mara finds the map | The archive floods | She escapes with it
/// ```
/// Chapters missing from the text (or with no parseable scene lines) get a
/// single placeholder scene so the writing phase always has work units.
pub fn parse_chapter_outline(output: &str, target_chapters: u32) -> Vec<ChapterUnit> {
    let header = Regex::new(r"(?im)^[#*\s]*CHAPTER\s+(\d+)\s*[:\-.]?\s*(.*)$").expect("header regex");
    let scene_line = Regex::new(r"(?i)^(?:SCENE\s+)?(\d+)\s*\|").expect("scene regex");

    // Slice the text into per-chapter blocks.
    let matches: Vec<_> = header.captures_iter(output).collect();
    let positions: Vec<usize> = header.find_iter(output).map(|m| m.start()).collect();

    let mut chapters: Vec<ChapterUnit> = (1..=target_chapters).map(ChapterUnit::new).collect();

    for (i, caps) in matches.iter().enumerate() {
        let Ok(number) = caps[1].parse::<u32>() else {
            continue;
        };
        if number == 0 || number > target_chapters {
            continue;
        }
        let chapter = &mut chapters[(number - 1) as usize];
        chapter.title = caps[2].trim().to_string();

        let block_start = positions[i];
        let block_end = positions.get(i + 1).copied().unwrap_or(output.len());
        let block = &output[block_start..block_end];

        for line in block.lines() {
            let line = line.trim();
            if !scene_line.is_match(line) {
                continue;
            }
            let parts: Vec<&str> = line.split('|').map(str::trim).collect();
            let number_in_chapter = chapter.scenes.len() as u32 + 1;
            let mut scene = SceneUnit::new(number, number_in_chapter);
            scene.goal = parts.get(1).unwrap_or(&"").to_string();
            scene.conflict = parts.get(2).unwrap_or(&"").to_string();
            scene.outcome = parts.get(3).unwrap_or(&"").to_string();
            scene.pov = parts.get(4).unwrap_or(&"").to_string();
            scene.location = parts.get(5).unwrap_or(&"").to_string();
            chapter.scenes.push(scene);
        }
    }

    for chapter in &mut chapters {
        if chapter.scenes.is_empty() {
            let mut scene = SceneUnit::new(chapter.number, 1);
            scene.goal = format!("Draft chapter {} following the outline", chapter.number);
            chapter.scenes.push(scene);
        }
    }

    chapters
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTRACTION_SAMPLE: &str = r#"
Here is the roster you asked for.

===== MAIN CHARACTERS =====
1. Mara Voss | Protagonist | A cartographer who maps dead cities
2. Brother Hallan | Antagonist | Keeper of the drowned archive

===== SUPPORTING CHARACTERS =====
1. Teo | Ally | Mara's boat-keeper brother
2. The Lamplighter | Mentor

===== KEY LOCATIONS =====
1. The Drowned Archive | Building | A library below the tide line
2. Saltmarket | City | Port town on stilts

===== SIGNIFICANT ITEMS =====
1. The Brass Compass | Artifact | Mara Voss | Points at what is lost
2. Tide Charts | Document | Folio of pre-flood maps
"#;

    #[test]
    fn parses_all_sections() {
        let list = parse_entity_list(EXTRACTION_SAMPLE).unwrap();
        assert_eq!(list.main_characters.len(), 2);
        assert_eq!(list.supporting_characters.len(), 2);
        assert_eq!(list.locations.len(), 2);
        assert_eq!(list.items.len(), 2);

        assert_eq!(list.main_characters[0].name, "Mara Voss");
        assert_eq!(list.main_characters[0].role, "Protagonist");
        assert_eq!(
            list.main_characters[0].brief,
            "A cartographer who maps dead cities"
        );
    }

    #[test]
    fn two_field_character_gets_empty_brief() {
        let list = parse_entity_list(EXTRACTION_SAMPLE).unwrap();
        assert_eq!(list.supporting_characters[1].name, "The Lamplighter");
        assert_eq!(list.supporting_characters[1].role, "Mentor");
        assert!(list.supporting_characters[1].brief.is_empty());
    }

    #[test]
    fn item_owner_parsed_or_defaulted() {
        let list = parse_entity_list(EXTRACTION_SAMPLE).unwrap();
        assert_eq!(list.items[0].owner.as_deref(), Some("Mara Voss"));
        assert_eq!(list.items[0].brief, "Points at what is lost");
        // Three-field item line: no owner column.
        assert_eq!(list.items[1].owner.as_deref(), Some("Unknown"));
        assert_eq!(list.items[1].brief, "Folio of pre-flood maps");
    }

    #[test]
    fn unparseable_output_returns_none() {
        assert!(parse_entity_list("The model rambled instead of listing.").is_none());
        assert!(parse_entity_list("").is_none());
    }

    #[test]
    fn section_headers_are_case_insensitive() {
        let output = "===== main characters =====\nIda | Protagonist | A thief\n";
        let list = parse_entity_list(output).unwrap();
        assert_eq!(list.main_characters.len(), 1);
        assert_eq!(list.main_characters[0].name, "Ida");
    }

    #[test]
    fn prose_lines_without_pipes_are_skipped() {
        let output = "===== MAIN CHARACTERS =====\nHere are the characters:\nIda | Protagonist | A thief\n";
        let list = parse_entity_list(output).unwrap();
        assert_eq!(list.main_characters.len(), 1);
    }

    const OUTLINE_SAMPLE: &str = r#"
# CHAPTER 1: The Drowned Archive
SCENE 1 | Mara finds the map | The archive floods | She escapes with it | Mara | The Drowned Archive
SCENE 2 | Hallan notices the theft | He alerts the wardens | Pursuit begins

CHAPTER 2 - Saltmarket
1 | Mara goes to ground | Teo refuses to hide her | She sleeps on the boat
"#;

    #[test]
    fn outline_parses_chapters_and_scenes() {
        let chapters = parse_chapter_outline(OUTLINE_SAMPLE, 2);
        assert_eq!(chapters.len(), 2);

        assert_eq!(chapters[0].number, 1);
        assert_eq!(chapters[0].title, "The Drowned Archive");
        assert_eq!(chapters[0].scenes.len(), 2);
        assert_eq!(chapters[0].scenes[0].goal, "Mara finds the map");
        assert_eq!(chapters[0].scenes[0].conflict, "The archive floods");
        assert_eq!(chapters[0].scenes[0].outcome, "She escapes with it");
        assert_eq!(chapters[0].scenes[0].pov, "Mara");
        assert_eq!(chapters[0].scenes[0].location, "The Drowned Archive");
        assert_eq!(chapters[0].scenes[0].id, "ch1_sc1");

        assert_eq!(chapters[1].title, "Saltmarket");
        assert_eq!(chapters[1].scenes.len(), 1);
        assert_eq!(chapters[1].scenes[0].goal, "Mara goes to ground");
    }

    #[test]
    fn missing_chapters_get_placeholder_scenes() {
        let chapters = parse_chapter_outline(OUTLINE_SAMPLE, 4);
        assert_eq!(chapters.len(), 4);
        assert_eq!(chapters[2].scenes.len(), 1);
        assert!(chapters[2].scenes[0].goal.contains("chapter 3"));
        assert_eq!(chapters[3].scenes[0].goal, "Draft chapter 4 following the outline");
    }

    #[test]
    fn garbage_outline_still_yields_target_chapters() {
        let chapters = parse_chapter_outline("no structure at all", 3);
        assert_eq!(chapters.len(), 3);
        for (i, ch) in chapters.iter().enumerate() {
            assert_eq!(ch.number, i as u32 + 1);
            assert_eq!(ch.scenes.len(), 1);
        }
    }

    #[test]
    fn out_of_range_chapter_numbers_are_ignored() {
        let output = "CHAPTER 9: Way beyond target\nSCENE 1 | g | c | o\n";
        let chapters = parse_chapter_outline(output, 2);
        assert_eq!(chapters.len(), 2);
        // Chapter 9 discarded; both targets fall back to placeholders.
        assert_eq!(chapters[0].scenes[0].goal, "Draft chapter 1 following the outline");
    }
}
