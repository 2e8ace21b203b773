use crate::core::config::{CharacterConfig, Config, ASPECT_RATIOS};
use crate::utils::image::sniff_mime;
use anyhow::{anyhow, Result};
use inquire::validator::Validation;
use inquire::{Confirm, CustomType, Password, Select, Text};
use std::path::Path;

pub const TEXT_MODELS: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite-preview-06-17",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
    "gemini-1.5-flash",
    "gemini-1.5-flash-8b",
    "gemini-1.5-pro",
];

pub const IMAGE_MODELS: &[&str] = &[
    "imagen-4.0-generate-preview-06-06",
    "imagen-4.0-ultra-generate-preview-06-06",
    "imagen-3.0-generate-002",
    "gemini-2.0-flash-preview-image-generation",
];

const STORY_INLINE: &str = "Type or paste the story";
const STORY_FILE: &str = "Load the story from a text file";
const STORY_KEEP: &str = "Keep the current story";

/// Configuration and characters steps. Skipped entirely when unattended.
pub fn run_setup(config: &mut Config) -> Result<()> {
    if config.unattended {
        return Ok(());
    }

    println!("== Step 1: Configuration ==");
    configure_story(config)?;
    println!("== Step 2: Characters ==");
    configure_characters(config)?;

    if Confirm::new("Save these settings to config.yml?")
        .with_default(true)
        .prompt()?
    {
        config.save()?;
        println!("Configuration saved.");
    }
    Ok(())
}

pub fn configure_story(config: &mut Config) -> Result<()> {
    if config.resolve_api_key().is_none() {
        let key = Password::new("Gemini API key:")
            .without_confirmation()
            .with_help_message("Leave empty to use the GEMINI_API_KEY environment variable")
            .prompt_skippable()?;
        config.api.api_key = key.filter(|k| !k.trim().is_empty());
    }

    let story = &mut config.story;
    let has_story = !story.script.trim().is_empty() || story.script_file.is_some();
    let mut sources = vec![STORY_INLINE, STORY_FILE];
    if has_story {
        sources.insert(0, STORY_KEEP);
    }
    match Select::new("Story script:", sources).prompt()? {
        STORY_INLINE => {
            story.script = Text::new("Story:")
                .with_validator(|s: &str| {
                    Ok(if s.trim().is_empty() {
                        Validation::Invalid("The story cannot be empty".into())
                    } else {
                        Validation::Valid
                    })
                })
                .prompt()?;
            story.script_file = None;
        }
        STORY_FILE => {
            let path = Text::new("Path to story file:")
                .with_validator(|s: &str| {
                    Ok(if Path::new(s.trim()).is_file() {
                        Validation::Valid
                    } else {
                        Validation::Invalid("File not found".into())
                    })
                })
                .prompt()?;
            story.script_file = Some(path.trim().to_string());
        }
        _ => {}
    }

    story.title = Text::new("Comic title:").with_default(&story.title).prompt()?;
    story.text_model = select_model("Text model:", TEXT_MODELS, &story.text_model)?;
    story.image_model = select_model("Image model:", IMAGE_MODELS, &story.image_model)?;
    story.aspect_ratio = select_model("Aspect ratio:", ASPECT_RATIOS, &story.aspect_ratio)?;
    story.pages = CustomType::<u32>::new("Number of pages:")
        .with_default(story.pages.max(1))
        .with_error_message("Please enter a whole number")
        .with_validator(|n: &u32| {
            Ok(if *n >= 1 {
                Validation::Valid
            } else {
                Validation::Invalid("At least one page".into())
            })
        })
        .prompt()?;
    story.seed = seed_prompt(story.seed).prompt_skippable()?;
    story.art_style = Text::new("Art style:")
        .with_initial_value(&story.art_style)
        .with_placeholder("e.g. watercolor, manga, noir ink")
        .prompt()?;
    story.comic_era = Text::new("Comic era:")
        .with_initial_value(&story.comic_era)
        .with_placeholder("e.g. Golden Age, 1980s indie")
        .prompt()?;
    story.additional_instructions = Text::new("Additional instructions (optional):")
        .with_initial_value(&story.additional_instructions)
        .prompt()?;

    config.validate()
}

pub fn configure_characters(config: &mut Config) -> Result<()> {
    if !config.characters.is_empty() {
        for c in &config.characters {
            println!("  {}", describe_character(c));
        }
        if !Confirm::new("Keep these characters?").with_default(true).prompt()? {
            config.characters.clear();
        }
    }

    while Confirm::new("Add a character?")
        .with_default(config.characters.is_empty())
        .prompt()?
    {
        config.characters.push(prompt_character()?);
    }
    Ok(())
}

fn prompt_character() -> Result<CharacterConfig> {
    let name = Text::new("Name:")
        .with_validator(|s: &str| {
            Ok(if s.trim().is_empty() {
                Validation::Invalid("A character needs a name".into())
            } else {
                Validation::Valid
            })
        })
        .prompt()?;
    let description = Text::new("Description:").prompt()?;
    let images = Text::new("Reference images (comma separated paths):")
        .with_validator(|s: &str| match check_image_paths(&parse_image_paths(s)) {
            Ok(()) => Ok(Validation::Valid),
            Err(e) => Ok(Validation::Invalid(e.to_string().into())),
        })
        .prompt()?;
    let reference_images = parse_image_paths(&images);

    let generate_model_sheet = !reference_images.is_empty()
        && Confirm::new("Generate a model sheet from these images?")
            .with_default(false)
            .prompt()?;

    Ok(CharacterConfig {
        name: name.trim().to_string(),
        description: description.trim().to_string(),
        reference_images,
        model_sheet: None,
        generate_model_sheet,
    })
}

/// Prefilled with the configured seed, if any.
fn seed_prompt(current: Option<u32>) -> CustomType<'static, u32> {
    let prompt = CustomType::<u32>::new("Seed (optional):")
        .with_help_message("Same seed and prompt give the same image. Esc to skip");
    match current {
        Some(seed) => prompt.with_default(seed),
        None => prompt,
    }
}

fn select_model(prompt: &str, options: &[&str], current: &str) -> Result<String> {
    let selection = Select::new(prompt, options.to_vec())
        .with_starting_cursor(starting_index(options, current))
        .prompt()?;
    Ok(selection.to_string())
}

pub fn starting_index(options: &[&str], current: &str) -> usize {
    options.iter().position(|o| *o == current).unwrap_or(0)
}

pub fn parse_image_paths(input: &str) -> Vec<String> {
    input
        .split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Every path must be a readable PNG, JPEG or WebP file.
pub fn check_image_paths(paths: &[String]) -> Result<()> {
    for path in paths {
        let bytes = std::fs::read(path).map_err(|e| anyhow!("{}: {}", path, e))?;
        if sniff_mime(&bytes).is_none() {
            return Err(anyhow!("{} is not a PNG, JPEG or WebP image", path));
        }
    }
    Ok(())
}

pub fn describe_character(c: &CharacterConfig) -> String {
    let sheet = if c.model_sheet.is_some() {
        ", model sheet"
    } else if c.generate_model_sheet {
        ", model sheet requested"
    } else {
        ""
    };
    format!("{} ({} image(s){})", c.name, c.reference_images.len(), sheet)
}
