//! Instruction text for the text and image services.
//!
//! Everything here is a pure function of the story settings and the
//! character list, so prompts can be checked without a network.

use crate::core::config::StoryConfig;
use crate::core::state::Character;
use crate::services::llm::Part;

const QUALITY_REQUIREMENTS: &str = "\
- Create professional, clean, and coherent comic art.
- Pay close attention to anatomy. Figures should be anatomically correct and well-proportioned.
- Hands should be well-formed with the correct number of fingers.
- Faces must be clear, expressive, and symmetrical. Avoid distorted features.";

const NEGATIVE_PROMPTS: &str = "\
- Avoid disfigured, deformed, or mutated body parts. No amputees unless specified in the script.
- Avoid extra or missing limbs/fingers.
- Avoid blurry, noisy, or low-quality images.
- Avoid text, watermarks, or signatures in the image.";

fn named(characters: &[Character]) -> impl Iterator<Item = &Character> {
    characters.iter().filter(|c| !c.name.trim().is_empty())
}

pub fn additional_instructions(story: &StoryConfig) -> String {
    if story.additional_instructions.trim().is_empty() {
        String::new()
    } else {
        format!("\n\nADDITIONAL INSTRUCTIONS:\n{}", story.additional_instructions.trim())
    }
}

pub fn character_summaries(characters: &[Character]) -> String {
    named(characters)
        .map(|c| format!("- {}: {}", c.name, c.description_or_default()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn story_breakdown_system(story: &StoryConfig, characters: &[Character]) -> String {
    let summaries = character_summaries(characters);
    let summaries = if summaries.is_empty() {
        "No specific characters defined.".to_string()
    } else {
        summaries
    };

    format!(
        "You are a comic book scriptwriter. Your task is to take a story script and break it down into distinct comic book panels across {pages} page(s).
Each panel must be assigned a \"page\" number and a \"panel\" number (which resets for each page). Each panel must have a \"sceneDescription\" for the artist and \"panelText\" for the narrator or dialogue.
Pace the story appropriately across the requested number of pages.
Characters:
{summaries}
Art Style Guidelines:
- Style: {style}
- Era: {era}
Quality Requirements:
{QUALITY_REQUIREMENTS}
Negative Prompts (what to avoid):
{NEGATIVE_PROMPTS}
Output a valid JSON array of objects, where each object represents a panel and has the following structure: {{ \"page\": number, \"panel\": number, \"sceneDescription\": string, \"panelText\": string }}.
Ensure the \"sceneDescription\" is very detailed and visual for the image generation model. Describe characters, setting, actions, and mood.
Ensure the \"panelText\" is concise, suitable for a comic book panel. It can be narration or dialogue. If dialogue, prefix with character name (e.g., \"HERO: I'll save you!\").
The output must be only the JSON array, without any markdown formatting.{extra}",
        pages = story.pages,
        style = story.art_style,
        era = story.comic_era,
        extra = additional_instructions(story),
    )
}

pub fn story_breakdown_user(script: &str) -> String {
    format!("Generate a comic script breakdown for the following story: {}", script)
}

/// Discrete image prompt. The image model never sees the reference images,
/// so every character's description is repeated here.
pub fn panel_image_prompt(story: &StoryConfig, characters: &[Character], scene: &str) -> String {
    let reinforced = named(characters)
        .map(|c| {
            format!(
                "Crucially, when drawing \"{}\", ensure they match their description: {}",
                c.name,
                c.description_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Comic book panel in a {style} style, reminiscent of the {era}.
Scene: {scene}.
{reinforced}
Aspect ratio: {ratio}.
Quality Requirements:
{QUALITY_REQUIREMENTS}
Negative Prompts (what to avoid):
{NEGATIVE_PROMPTS}{extra}",
        style = story.art_style,
        era = story.comic_era,
        ratio = story.aspect_ratio,
        extra = additional_instructions(story),
    )
}

pub fn page_breakdown_system(story: &StoryConfig) -> String {
    format!(
        "You are a screenwriting assistant. Your task is to take a long story script and divide it into a series of smaller, self-contained page summaries for a comic book. The user will specify the total number of pages. You must divide the story's plot points, dialogue, and action evenly and logically across the requested number of pages. For each page, provide a concise but detailed summary of the events, character actions, and key dialogue that should occur on that page. Your output must be a valid JSON array of strings, where each string is the summary for one page. The array must have exactly {} elements.{}",
        story.pages,
        additional_instructions(story)
    )
}

pub fn page_breakdown_user(script: &str, pages: u32) -> String {
    format!("Story: \"{}\". Break this into {} page(s).", script, pages)
}

pub fn page_instructions(story: &StoryConfig) -> String {
    format!(
        "You are an AI Comic Creator. Your task is to generate a comic page based on a page summary and character reference images. For each panel on this page, you must do two things in order:
1. First, on its own line(s), write the panel's text (dialogue or narration).
2. Second, on the lines immediately following, write a detailed scene description for the artist that will be used to generate the image.
3. Finally, and most importantly, generate the image for that panel based on the description you just wrote.

The art style must be: {style}, from the {era}.
The aspect ratio for images must be {ratio}.
It is ESSENTIAL to use the provided character reference images. When a character is mentioned, you MUST draw them to look exactly like their reference photo. Do not mix features between characters.

Quality Requirements for Images:
{QUALITY_REQUIREMENTS}
Negative Prompts for Images (what to avoid):
{NEGATIVE_PROMPTS}

Repeat this process for all panels needed to tell the story for this page. Do not add any other text, titles, or commentary. Just start with the text for the first panel of this page.",
        style = story.art_style,
        era = story.comic_era,
        ratio = story.aspect_ratio,
    )
}

/// Message for one streamed page: references first, then the instructions
/// and the page summary.
pub fn page_prompt_parts(
    story: &StoryConfig,
    characters: &[Character],
    page_number: u32,
    summary: &str,
) -> Vec<Part> {
    let mut parts = vec![Part::text(
        "First, here are the character references you must use.",
    )];

    for character in named(characters) {
        let references = character.preferred_references();
        if references.is_empty() {
            continue;
        }
        let description = if character.description.trim().is_empty() {
            "N/A"
        } else {
            character.description.as_str()
        };
        parts.push(Part::text(format!(
            "This is the reference for \"{}\". Description: {}",
            character.name, description
        )));
        parts.extend(references.iter().cloned().map(Part::Image));
    }

    parts.push(Part::text(format!(
        "{}\n---\nPAGE {} SUMMARY:\n{}\n---\n{}",
        page_instructions(story),
        page_number,
        summary,
        additional_instructions(story)
    )));
    parts
}

pub fn model_sheet_prompt(character: &Character) -> String {
    format!(
        "Create a character model sheet for \"{name}\", a comic book character.
Description: {description}
Use the attached reference images as the source of truth for the character's face, build, hair, and clothing.
Draw one single image: a clean full-body turnaround (front, three-quarter, and side views) on a plain white background, with neutral lighting and a neutral expression.
Quality Requirements:
{QUALITY_REQUIREMENTS}
Respond with exactly one image and no text.",
        name = character.name,
        description = character.description_or_default(),
    )
}

pub fn model_sheet_parts(character: &Character) -> Vec<Part> {
    let mut parts: Vec<Part> = character
        .reference_images
        .iter()
        .cloned()
        .map(Part::Image)
        .collect();
    parts.push(Part::text(model_sheet_prompt(character)));
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::ImageData;

    fn story() -> StoryConfig {
        StoryConfig {
            script: "A knight meets a dragon.".to_string(),
            pages: 2,
            art_style: "ink wash".to_string(),
            comic_era: "Silver Age".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_breakdown_system_mentions_pages_and_characters() {
        let mut knight = Character::new("Knight", "silver armour");
        knight.reference_images.push(ImageData::new("image/png", vec![1]));
        let unnamed = Character::new("  ", "ignored");

        let prompt = story_breakdown_system(&story(), &[knight, unnamed]);
        assert!(prompt.contains("across 2 page(s)"));
        assert!(prompt.contains("- Knight: silver armour"));
        assert!(!prompt.contains("ignored"));
        assert!(prompt.contains("- Style: ink wash"));
        assert!(!prompt.contains("ADDITIONAL INSTRUCTIONS"));
    }

    #[test]
    fn test_breakdown_system_without_characters() {
        let mut s = story();
        s.additional_instructions = "Keep it funny.".to_string();
        let prompt = story_breakdown_system(&s, &[]);
        assert!(prompt.contains("No specific characters defined."));
        assert!(prompt.ends_with("ADDITIONAL INSTRUCTIONS:\nKeep it funny."));
    }

    #[test]
    fn test_panel_image_prompt_reinforces_descriptions() {
        let prompt = panel_image_prompt(&story(), &[Character::new("Dragon", "")], "A cave");
        assert!(prompt.starts_with("Comic book panel in a ink wash style"));
        assert!(prompt.contains("Scene: A cave."));
        assert!(prompt.contains("when drawing \"Dragon\", ensure they match their description: No description provided."));
        assert!(prompt.contains("Aspect ratio: 16:9."));
    }

    #[test]
    fn test_page_prompt_parts_order() {
        let mut knight = Character::new("Knight", "");
        knight.reference_images = vec![
            ImageData::new("image/png", vec![1]),
            ImageData::new("image/jpeg", vec![2]),
        ];
        let no_refs = Character::new("Ghost", "see-through");

        let parts = page_prompt_parts(&story(), &[knight, no_refs], 3, "The duel.");
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[1], Part::text("This is the reference for \"Knight\". Description: N/A"));
        assert!(matches!(parts[2], Part::Image(_)));
        match &parts[4] {
            Part::Text(t) => {
                assert!(t.contains("PAGE 3 SUMMARY:\nThe duel."));
                assert!(!t.contains("Ghost"));
            }
            other => panic!("unexpected part {:?}", other),
        }
    }

    #[test]
    fn test_page_prompt_uses_model_sheet_instead_of_uploads() {
        let mut knight = Character::new("Knight", "");
        knight.reference_images = vec![ImageData::new("image/png", vec![1]); 3];
        knight.model_sheet = Some(ImageData::new("image/png", vec![7]));

        let parts = page_prompt_parts(&story(), &[knight], 1, "s");
        let images: Vec<_> = parts.iter().filter(|p| matches!(p, Part::Image(_))).collect();
        assert_eq!(images, vec![&Part::Image(ImageData::new("image/png", vec![7]))]);
    }

    #[test]
    fn test_model_sheet_parts_end_with_instruction() {
        let mut c = Character::new("Ada", "engineer");
        c.reference_images.push(ImageData::new("image/png", vec![1]));
        let parts = model_sheet_parts(&c);
        assert_eq!(parts.len(), 2);
        match &parts[1] {
            Part::Text(t) => assert!(t.contains("exactly one image and no text")),
            other => panic!("unexpected part {:?}", other),
        }
    }
}
