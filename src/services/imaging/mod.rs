use crate::core::config::StoryConfig;
use crate::core::error::ComicError;
use crate::core::state::{Character, ComicState};
use crate::services::llm::GenAiClient;
use anyhow::Result;
use std::sync::Arc;

pub mod discrete;
pub mod streaming;

pub use discrete::DiscreteStrategy;
pub use streaming::{PanelStreamAssembler, StreamingStrategy};

/// Read-only inputs shared by both strategies for one run.
pub struct GenerationContext<'a> {
    pub client: &'a Arc<dyn GenAiClient>,
    pub story: &'a StoryConfig,
    pub script: &'a str,
    pub characters: &'a [Character],
}

/// How the images stage ended.
#[derive(Debug)]
pub enum ImagesOutcome {
    /// Every panel or page was attempted. Individual panels may still be in error.
    Completed,
    /// A streamed page failed; panels finished before it are kept.
    Truncated { page: u32, error: ComicError },
}

#[derive(Debug, Clone)]
pub enum GenerationStrategy {
    Discrete(DiscreteStrategy),
    Streaming(StreamingStrategy),
}

impl GenerationStrategy {
    /// Gemini models draw inline in a chat stream; anything else is treated
    /// as a still-image (Imagen) model.
    pub fn for_model(image_model: &str) -> Self {
        if image_model.starts_with("gemini-") {
            Self::Streaming(StreamingStrategy::new(image_model))
        } else {
            Self::Discrete(DiscreteStrategy::new(image_model))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Discrete(_) => "discrete",
            Self::Streaming(_) => "streaming",
        }
    }

    /// Story breakdown followed by image generation. An `Err` means the
    /// breakdown failed and no image request was made.
    pub async fn run(&self, ctx: &GenerationContext<'_>, state: &mut ComicState) -> Result<ImagesOutcome> {
        match self {
            Self::Discrete(strategy) => {
                strategy.break_down(ctx, state).await?;
                strategy.generate_images(ctx, state).await;
                Ok(ImagesOutcome::Completed)
            }
            Self::Streaming(strategy) => {
                let pages = strategy.break_down(ctx, state).await?;
                Ok(strategy.generate_images(ctx, &pages, state).await)
            }
        }
    }
}
