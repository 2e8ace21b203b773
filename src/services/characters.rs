use crate::core::config::{CharacterConfig, Config};
use crate::core::io::{join, Storage};
use crate::core::state::Character;
use crate::services::llm::GenAiClient;
use crate::services::model_sheet::refresh_model_sheet;
use crate::utils::image::{extension_for, load_image_file};
use anyhow::{Context, Result};
use log::{info, warn};

/// Builds the in-memory character list, reading every reference image.
pub async fn load_characters(storage: &dyn Storage, configs: &[CharacterConfig]) -> Result<Vec<Character>> {
    let mut characters = Vec::with_capacity(configs.len());
    for cfg in configs {
        let mut character = Character::new(cfg.name.trim(), cfg.description.trim());
        for path in &cfg.reference_images {
            let image = load_image_file(storage, path)
                .await
                .with_context(|| format!("Character \"{}\"", cfg.name))?;
            character.reference_images.push(image);
        }
        if let Some(path) = &cfg.model_sheet {
            match load_image_file(storage, path).await {
                Ok(sheet) => character.model_sheet = Some(sheet),
                Err(e) => warn!("Ignoring model sheet for {}: {:#}", cfg.name, e),
            }
        }
        characters.push(character);
    }
    Ok(characters)
}

fn sheet_file_name(character: &Character, mime_type: &str) -> String {
    let stem: String = character
        .name
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("sheet_{}.{}", stem, extension_for(mime_type))
}

/// Generates the sheets the configuration asks for and records where they
/// were written, so later runs reuse them. A failure only affects its own
/// character. Returns whether `config` changed.
pub async fn prepare_model_sheets(
    client: &dyn GenAiClient,
    storage: &dyn Storage,
    config: &mut Config,
    characters: &mut [Character],
) -> bool {
    let mut changed = false;
    let model = config.story.sheet_model.clone();

    for (cfg, character) in config.characters.iter_mut().zip(characters.iter_mut()) {
        if !cfg.generate_model_sheet || character.model_sheet.is_some() {
            continue;
        }
        println!("Generating model sheet for {}...", character.name);
        if let Err(e) = refresh_model_sheet(client, &model, character).await {
            eprintln!("{}", e);
            continue;
        }
        let Some(sheet) = &character.model_sheet else {
            continue;
        };

        let path = join(&config.build_folder, &sheet_file_name(character, &sheet.mime_type));
        match storage.write(&path, &sheet.bytes).await {
            Ok(()) => {
                info!("Model sheet for {} saved to {}", character.name, path);
                cfg.model_sheet = Some(path);
                changed = true;
            }
            Err(e) => warn!("Could not save model sheet for {}: {:#}", character.name, e),
        }
    }
    changed
}
