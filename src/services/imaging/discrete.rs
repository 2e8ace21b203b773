use super::GenerationContext;
use crate::core::error::ComicError;
use crate::core::state::{ComicState, GenerationStage, ImageData, PanelStatus};
use crate::services::llm::ImageRequest;
use crate::services::{prompt, script};
use anyhow::Result;
use log::{error, info, warn};

const IMAGES_START: f64 = 20.0;
const IMAGES_SPAN: f64 = 75.0;

/// One still-image request per panel, strictly in order.
#[derive(Debug, Clone)]
pub struct DiscreteStrategy {
    model: String,
}

impl DiscreteStrategy {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
        }
    }

    /// Fills `state` with pending panels from the text model's breakdown.
    pub async fn break_down(&self, ctx: &GenerationContext<'_>, state: &mut ComicState) -> Result<()> {
        state.set_progress(GenerationStage::Story, "Analyzing story script...", 0.0);
        let scripts =
            script::break_down_story(ctx.client.as_ref(), ctx.story, ctx.script, ctx.characters).await?;

        state.set_progress(GenerationStage::Story, "Parsing story structure...", 15.0);
        info!("Story broken down into {} panels", scripts.len());
        state.set_panels(script::number_panels(scripts));
        Ok(())
    }

    /// Never fails as a whole: a panel without an image is marked `Error`
    /// and the loop moves on.
    pub async fn generate_images(&self, ctx: &GenerationContext<'_>, state: &mut ComicState) {
        state.set_progress(GenerationStage::Images, "Generating panel images...", IMAGES_START);

        let work: Vec<(usize, u32, u32, String)> = state
            .panels()
            .iter()
            .map(|p| (p.id, p.page, p.panel, p.scene_description.clone()))
            .collect();
        let total = work.len();
        if total == 0 {
            warn!("Breakdown produced no panels");
            state.set_percentage(IMAGES_START + IMAGES_SPAN);
            return;
        }

        for (i, (id, page, panel, scene)) in work.into_iter().enumerate() {
            state.mark_panel(id, PanelStatus::Generating, None);
            state.set_message(format!("Generating image for panel {} on page {}...", panel, page));

            match self.generate_panel(ctx, page, panel, &scene).await {
                Ok(image) => {
                    state.mark_panel(id, PanelStatus::Done, Some(image));
                }
                Err(e) => {
                    error!("Image generation failed for panel {}: {:#}", panel, e);
                    state.mark_panel(id, PanelStatus::Error, None);
                }
            }

            state.set_percentage(IMAGES_START + ((i + 1) as f64 / total as f64) * IMAGES_SPAN);
        }
    }

    async fn generate_panel(
        &self,
        ctx: &GenerationContext<'_>,
        page: u32,
        panel: u32,
        scene: &str,
    ) -> Result<ImageData> {
        let request = ImageRequest {
            model: self.model.clone(),
            prompt: prompt::panel_image_prompt(ctx.story, ctx.characters, scene),
            aspect_ratio: ctx.story.aspect_ratio.clone(),
            seed: ctx.story.seed,
        };
        let images = ctx.client.generate_images(&request).await?;
        images
            .into_iter()
            .find(|img| !img.is_empty())
            .ok_or_else(|| ComicError::PanelImageMissing { page, panel }.into())
    }
}
