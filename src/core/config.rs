use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "config.yml";
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

pub const ASPECT_RATIOS: &[&str] = &["16:9", "4:3", "1:1", "3:4", "9:16"];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_build")]
    pub build_folder: String,

    #[serde(default)]
    pub unattended: bool,

    /// Print scene descriptions under the captions in the exported PDF.
    #[serde(default = "default_true")]
    pub show_descriptions: bool,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub story: StoryConfig,

    #[serde(default)]
    pub characters: Vec<CharacterConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiConfig {
    /// Falls back to `GEMINI_API_KEY` when unset.
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// No timeout when unset; a hung request stalls the run.
    pub timeout_seconds: Option<u64>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            timeout_seconds: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoryConfig {
    #[serde(default)]
    pub script: String,
    /// Read instead of `script` when set.
    pub script_file: Option<String>,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_sheet_model")]
    pub sheet_model: String,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default = "default_pages")]
    pub pages: u32,
    pub seed: Option<u32>,
    #[serde(default)]
    pub art_style: String,
    #[serde(default)]
    pub comic_era: String,
    #[serde(default)]
    pub additional_instructions: String,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            script: String::new(),
            script_file: None,
            title: default_title(),
            text_model: default_text_model(),
            image_model: default_image_model(),
            sheet_model: default_sheet_model(),
            aspect_ratio: default_aspect_ratio(),
            pages: default_pages(),
            seed: None,
            art_style: String::new(),
            comic_era: String::new(),
            additional_instructions: String::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CharacterConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Paths to PNG/JPEG files, in upload order.
    #[serde(default)]
    pub reference_images: Vec<String>,
    /// Path of a previously generated model sheet.
    pub model_sheet: Option<String>,
    #[serde(default)]
    pub generate_model_sheet: bool,
}

fn default_true() -> bool {
    true
}
fn default_output() -> String {
    "output".to_string()
}
fn default_build() -> String {
    "build".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/".to_string()
}
fn default_title() -> String {
    "ai-comic".to_string()
}
fn default_text_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_image_model() -> String {
    "imagen-3.0-generate-002".to_string()
}
fn default_sheet_model() -> String {
    "gemini-2.0-flash-preview-image-generation".to_string()
}
fn default_aspect_ratio() -> String {
    "16:9".to_string()
}
fn default_pages() -> u32 {
    1
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(CONFIG_FILE, content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.build_folder)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.story.pages == 0 {
            return Err(anyhow!("story.pages must be at least 1"));
        }
        if !ASPECT_RATIOS.contains(&self.story.aspect_ratio.as_str()) {
            return Err(anyhow!(
                "Unsupported aspect ratio '{}', expected one of {:?}",
                self.story.aspect_ratio,
                ASPECT_RATIOS
            ));
        }
        Ok(())
    }

    /// Clears the story and the cast for a new comic. Models, aspect ratio
    /// and API settings are kept.
    pub fn reset_story(&mut self) {
        self.story.script.clear();
        self.story.script_file = None;
        self.story.pages = default_pages();
        self.story.art_style.clear();
        self.story.comic_era.clear();
        self.story.additional_instructions.clear();
        self.characters.clear();
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        self.api
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

impl StoryConfig {
    /// The story text, read from `script_file` when one is configured.
    pub fn script_text(&self) -> Result<String> {
        match &self.script_file {
            Some(path) => fs::read_to_string(path)
                .with_context(|| format!("Failed to read story file {}", path)),
            None => Ok(self.script.clone()),
        }
    }

    /// Width and height terms of `aspect_ratio`, e.g. `(16, 9)`.
    pub fn aspect_dimensions(&self) -> (u32, u32) {
        parse_aspect_ratio(&self.aspect_ratio).unwrap_or((16, 9))
    }
}

pub fn parse_aspect_ratio(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.split_once(':')?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().parse().ok()?;
    if w == 0 || h == 0 {
        return None;
    }
    Some((w, h))
}
